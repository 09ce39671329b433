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

//! Total parser for model responses. Parsing never fails: a clean parse,
//! a field-level recovery and a fixed generic suggestion form a strict
//! fallback chain, so every invocation yields a usable suggestion.

pub mod sanitize;

use once_cell::sync::Lazy;
use regex::Regex;
use remedy_contracts::{
    BestPractice, ImmediateFix, InvocationResult, Issue, Prevention, Suggestion, Testing,
};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSuggestion {
    immediate_fix: Option<ImmediateFix>,
    #[serde(default)]
    best_practice: Option<BestPractice>,
    #[serde(default)]
    testing: Option<Testing>,
    #[serde(default)]
    prevention: Option<Prevention>,
}

static FIELD_PATTERNS: Lazy<[(&'static str, Regex); 4]> = Lazy::new(|| {
    let field = |name: &str| {
        Regex::new(&format!(r#""{name}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).unwrap()
    };
    [
        ("title", field("title")),
        ("searchCode", field("searchCode")),
        ("replaceCode", field("replaceCode")),
        ("explanation", field("explanation")),
    ]
});

fn unescape(raw: &str) -> String {
    raw.replace("\\\"", "\"")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\\", "\\")
}

fn recover_field(text: &str, name: &str) -> Option<String> {
    FIELD_PATTERNS
        .iter()
        .find(|(field, _)| *field == name)
        .and_then(|(_, re)| re.captures(text))
        .map(|caps| unescape(&caps[1]))
}

/// Pull individual fields out of text that would not parse as JSON. Models
/// that truncate mid-object usually still emit the leading fields intact.
fn recover_fix(text: &str) -> Option<ImmediateFix> {
    let title = recover_field(text, "title")?;
    Some(ImmediateFix {
        title,
        search_code: recover_field(text, "searchCode").unwrap_or_default(),
        replace_code: recover_field(text, "replaceCode").unwrap_or_default(),
        explanation: recover_field(text, "explanation").unwrap_or_default(),
    })
}

fn generic_fix(issue: &Issue) -> ImmediateFix {
    ImmediateFix {
        title: format!("Review and remediate: {}", issue.issue_type),
        search_code: issue.code_snippet.clone(),
        replace_code: String::new(),
        explanation: format!(
            "Automated suggestion generation did not produce a usable fix for this {} finding. \
             Review the flagged code at {}:{} manually.",
            issue.severity.as_str(),
            issue.file,
            issue.line
        ),
    }
}

fn assemble(issue: &Issue, result: &InvocationResult, raw: RawSuggestion) -> Suggestion {
    let immediate_fix = raw.immediate_fix.unwrap_or_else(|| generic_fix(issue));
    Suggestion {
        issue_id: issue.id.clone(),
        issue_type: issue.issue_type.clone(),
        issue_category: issue.category,
        issue_severity: issue.severity,
        language: issue.language.clone(),
        issue_description: crate::templates::describe(issue),
        immediate_fix,
        best_practice: raw.best_practice,
        testing: raw.testing,
        prevention: raw.prevention,
        tokens_used: result.total_tokens,
        cost: result.estimated_cost,
        timestamp: result.timestamp.timestamp_millis(),
        model_used: result.model_id.clone(),
    }
}

/// Parse a model response into a suggestion. Never returns an error: the
/// fallback chain is sanitize-and-parse, then per-field recovery, then a
/// fixed generic suggestion marked with a `-fallback` model suffix.
pub fn parse_suggestion(issue: &Issue, result: &InvocationResult) -> Suggestion {
    if let Some(cleaned) = sanitize::sanitize(&result.text) {
        match serde_json::from_str::<RawSuggestion>(&cleaned) {
            Ok(raw) if raw.immediate_fix.is_some() => {
                debug!(issue_id = %issue.id, "parsed suggestion cleanly");
                return assemble(issue, result, raw);
            }
            Ok(_) => {
                warn!(issue_id = %issue.id, "response parsed but had no immediateFix");
            }
            Err(error) => {
                warn!(issue_id = %issue.id, %error, "response failed JSON parse, trying field recovery");
            }
        }
    }

    if let Some(fix) = recover_fix(&result.text) {
        debug!(issue_id = %issue.id, "recovered suggestion fields from malformed response");
        return assemble(
            issue,
            result,
            RawSuggestion {
                immediate_fix: Some(fix),
                best_practice: None,
                testing: None,
                prevention: None,
            },
        );
    }

    warn!(issue_id = %issue.id, "response unusable, emitting generic fallback suggestion");
    let mut suggestion = assemble(
        issue,
        result,
        RawSuggestion {
            immediate_fix: Some(generic_fix(issue)),
            best_practice: None,
            testing: None,
            prevention: None,
        },
    );
    suggestion.model_used = format!("{}-fallback", result.model_id);
    suggestion
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use remedy_contracts::{Category, Severity};

    fn issue() -> Issue {
        Issue {
            id: "i-1".to_string(),
            issue_type: "sql_injection".to_string(),
            category: Category::Security,
            severity: Severity::High,
            language: "java".to_string(),
            description: "concatenated query".to_string(),
            code_snippet: "execute(q + id)".to_string(),
            file: "Dao.java".to_string(),
            line: 12,
        }
    }

    fn result(text: &str) -> InvocationResult {
        InvocationResult {
            text: text.to_string(),
            input_tokens: 400,
            output_tokens: 200,
            total_tokens: 600,
            estimated_cost: 0.00096,
            model_id: "light-model".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn clean_json_parses_fully() {
        let text = r#"{
            "immediateFix": {"title": "Bind parameters", "searchCode": "a", "replaceCode": "b", "explanation": "c"},
            "bestPractice": {"title": "p", "code": "x", "benefits": ["b1"]},
            "testing": {"testCase": "t", "validationSteps": ["s"]},
            "prevention": {"guidelines": ["g"], "tools": [], "codeReviewChecklist": []}
        }"#;
        let s = parse_suggestion(&issue(), &result(text));
        assert_eq!(s.immediate_fix.title, "Bind parameters");
        assert!(s.best_practice.is_some());
        assert_eq!(s.tokens_used, 600);
        assert_eq!(s.model_used, "light-model");
        assert!(!s.is_fallback());
    }

    #[test]
    fn fenced_json_with_prose_still_parses() {
        let text = "Here is your fix:\n```json\n{\"immediateFix\": {\"title\": \"T\", \"searchCode\": \"s\", \"replaceCode\": \"r\", \"explanation\": \"e\"},}\n```";
        let s = parse_suggestion(&issue(), &result(text));
        assert_eq!(s.immediate_fix.title, "T");
    }

    #[test]
    fn truncated_json_recovers_leading_fields() {
        let text = r#"{"immediateFix": {"title": "Escape output", "searchCode": "print(x)", "replaceCode": "print(esc(x"#;
        let s = parse_suggestion(&issue(), &result(text));
        assert_eq!(s.immediate_fix.title, "Escape output");
        assert_eq!(s.immediate_fix.search_code, "print(x)");
        assert!(s.best_practice.is_none());
    }

    #[test]
    fn garbage_yields_generic_fallback() {
        let s = parse_suggestion(&issue(), &result("I cannot help with that."));
        assert!(s.immediate_fix.title.contains("sql_injection"));
        assert!(s.immediate_fix.explanation.contains("Dao.java:12"));
        assert!(s.model_used.ends_with("-fallback"));
        assert!(s.is_fallback());
        assert_eq!(s.issue_id, "i-1");
    }

    #[test]
    fn every_path_keeps_usage_accounting() {
        for text in ["{}", "garbage", r#"{"immediateFix": {"title": "t"}}"#] {
            let s = parse_suggestion(&issue(), &result(text));
            assert_eq!(s.tokens_used, 600);
            assert!((s.cost - 0.00096).abs() < 1e-12);
        }
    }
}
