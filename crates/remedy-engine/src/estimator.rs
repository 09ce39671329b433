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

//! Token and cost estimation used when the endpoint omits usage data, and
//! prompt-side trimming to keep oversized snippets inside the budget.

use remedy_contracts::PricingConfig;

/// Minimum input tokens assumed for any real invocation.
pub const MIN_INPUT_TOKENS: u32 = 100;
/// Minimum output tokens assumed for any real invocation.
pub const MIN_OUTPUT_TOKENS: u32 = 50;

const CHARS_PER_TOKEN: usize = 4;

/// Rough token count for a piece of text. Four characters per token is a
/// deliberate overestimate for dense code, which errs on the safe side of
/// the budget.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() / CHARS_PER_TOKEN) as u32
}

/// Split a total token count into input/output when the endpoint reports
/// only the total. The 60/40 split mirrors the observed ratio for
/// prompt-heavy remediation calls.
pub fn split_total_tokens(total: u32) -> (u32, u32) {
    let input = ((total as f64) * 0.6) as u32;
    let output = total.saturating_sub(input);
    (input.max(MIN_INPUT_TOKENS), output.max(MIN_OUTPUT_TOKENS))
}

pub fn estimate_cost(input_tokens: u32, output_tokens: u32, pricing: &PricingConfig) -> f64 {
    (input_tokens as f64 / 1_000_000.0) * pricing.input_per_million
        + (output_tokens as f64 / 1_000_000.0) * pricing.output_per_million
}

/// Trim a code snippet to at most `max_bytes`, cutting on a line boundary
/// where one exists so the model never sees a half line. The byte limit is
/// backed off to a character boundary first, so multibyte snippets never
/// split mid-character.
pub fn truncate_code(code: &str, max_bytes: usize) -> String {
    if code.len() <= max_bytes {
        return code.to_string();
    }

    let mut boundary = max_bytes;
    while !code.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let head = &code[..boundary];
    let cut = head.rfind('\n').unwrap_or(head.len());
    format!("{}\n... (truncated)", &head[..cut])
}
