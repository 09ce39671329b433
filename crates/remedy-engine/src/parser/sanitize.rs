// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Repair pass for model-produced JSON. Models wrap JSON in prose, double
//! up escapes, emit raw newlines inside string literals and leave trailing
//! commas; every transform here is safe on already-valid JSON.

use once_cell::sync::Lazy;
use regex::Regex;

static TRAILING_COMMA_OBJ: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\}").unwrap());
static TRAILING_COMMA_ARR: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\]").unwrap());

/// Contents of the first fenced code block, when the model wrapped its
/// answer in one.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Cut the text down to its outermost `{ ... }` envelope, preferring the
/// inside of a markdown fence when one is present. Returns `None` when no
/// object is present.
pub fn extract_envelope(text: &str) -> Option<&str> {
    let candidate = fenced_block(text).filter(|b| b.contains('{')).unwrap_or(text);
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&candidate[start..=end])
}

fn collapse_double_escapes(text: &str) -> String {
    text.replace("\\\\\"", "\\\"")
        .replace("\\\\n", "\\n")
        .replace("\\\\t", "\\t")
        .replace("\\\\r", "\\r")
}

/// Escape raw control characters that appear inside string literals and
/// drop the ones that appear outside them.
fn repair_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                out.push(ch);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            c if (c as u32) < 0x20 && in_string => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if (c as u32) < 0x20 && c != '\n' && c != '\r' && c != '\t' => {
                // stray control byte between tokens, drop it
            }
            c => out.push(c),
        }
    }
    out
}

/// Full sanitation pipeline. Returns `None` when the text contains no JSON
/// object at all.
pub fn sanitize(text: &str) -> Option<String> {
    let envelope = extract_envelope(text)?;
    let collapsed = collapse_double_escapes(envelope);
    let repaired = repair_control_chars(&collapsed);
    let no_obj_commas = TRAILING_COMMA_OBJ.replace_all(&repaired, "}");
    let cleaned = TRAILING_COMMA_ARR.replace_all(&no_obj_commas, "]");
    Some(cleaned.into_owned())
}
