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

//! Canned suggestion templates. These serve the template routing tier and
//! double as the degraded-path fallback when the endpoint cannot be
//! reached, so every attempted issue still yields a complete suggestion.

use chrono::Utc;
use once_cell::sync::Lazy;
use remedy_contracts::{
    BestPractice, ImmediateFix, Issue, Prevention, Suggestion, Testing, ToolRecommendation,
};

/// Model identifier stamped on template-generated suggestions.
pub const TEMPLATE_MODEL: &str = "template-engine-v1";

/// Synthetic usage recorded for a template render, so downstream accounting
/// never divides by zero.
pub const TEMPLATE_INPUT_TOKENS: u32 = 50;
pub const TEMPLATE_OUTPUT_TOKENS: u32 = 100;
pub const TEMPLATE_COST: f64 = 0.0001;

struct TemplateRule {
    /// Keywords of which at least one must appear.
    any: &'static [&'static str],
    /// Keywords which must all appear.
    all: &'static [&'static str],
    title: &'static str,
    explanation: &'static str,
    replace_hint: &'static str,
    practice_title: &'static str,
    practice_code: &'static str,
    benefits: &'static [&'static str],
    test_case: &'static str,
    guidelines: &'static [&'static str],
    tools: &'static [(&'static str, &'static str)],
}

impl TemplateRule {
    fn matches(&self, haystack: &str) -> bool {
        let any_hit = self.any.is_empty() || self.any.iter().any(|kw| haystack.contains(kw));
        let all_hit = self.all.iter().all(|kw| haystack.contains(kw));
        any_hit && all_hit
    }
}

static TEMPLATE_RULES: Lazy<Vec<TemplateRule>> = Lazy::new(|| {
    vec![
        TemplateRule {
            any: &["sql injection", "sqli", "sql_injection"],
            all: &[],
            title: "Use parameterized queries",
            explanation: "Concatenating untrusted input into SQL lets an attacker rewrite the query. Bind values as parameters so the driver keeps data and code separate.",
            replace_hint: "Replace string concatenation with a prepared statement and bound parameters.",
            practice_title: "Parameterize every query",
            practice_code: "let stmt = conn.prepare(\"SELECT * FROM users WHERE id = ?\")?;\nstmt.query([user_id])?;",
            benefits: &[
                "Eliminates SQL injection for the bound values",
                "Lets the database cache query plans",
            ],
            test_case: "Submit `' OR '1'='1` as input and assert the query returns no extra rows.",
            guidelines: &[
                "Never build SQL from user input with string concatenation",
                "Validate and constrain identifiers that cannot be bound",
            ],
            tools: &[("sqlmap", "Automated SQL injection probing for regression checks")],
        },
        TemplateRule {
            any: &["xss", "cross-site scripting", "cross site scripting"],
            all: &[],
            title: "Encode output before rendering",
            explanation: "Untrusted data written into HTML executes as markup. Encode for the exact output context so it renders as text.",
            replace_hint: "Route the value through the framework's context-aware escaping before it reaches the page.",
            practice_title: "Escape at the output boundary",
            practice_code: "let safe = html_escape::encode_text(&user_input);",
            benefits: &[
                "Stops script injection at render time",
                "Keeps the data intact for non-HTML consumers",
            ],
            test_case: "Render `<script>alert(1)</script>` and assert it appears as literal text.",
            guidelines: &[
                "Treat all request-derived data as untrusted",
                "Prefer auto-escaping template engines over manual encoding",
            ],
            tools: &[("OWASP ZAP", "Dynamic scanning for reflected and stored XSS")],
        },
        TemplateRule {
            any: &["credential", "password", "secret", "api key", "api_key"],
            all: &["hardcoded"],
            title: "Move secrets out of source",
            explanation: "Credentials committed to source are visible to everyone with repository access and survive in history after removal.",
            replace_hint: "Load the value from a secrets manager or environment variable at startup.",
            practice_title: "Resolve secrets at runtime",
            practice_code: "let api_key = std::env::var(\"SERVICE_API_KEY\")?;",
            benefits: &[
                "Secrets rotate without a code change",
                "Repository history stays free of live credentials",
            ],
            test_case: "Grep the built artifact for the old literal and assert no matches.",
            guidelines: &[
                "Rotate any credential that was ever committed",
                "Add secret scanning to the merge pipeline",
            ],
            tools: &[("gitleaks", "Scans commits and history for committed secrets")],
        },
        TemplateRule {
            any: &["memory leak", "resource leak", "unclosed"],
            all: &[],
            title: "Release resources deterministically",
            explanation: "Resources acquired without a guaranteed release path accumulate until the process degrades or crashes.",
            replace_hint: "Scope the resource so it is released on every exit path, including errors.",
            practice_title: "Tie lifetime to scope",
            practice_code: "{\n    let file = File::open(path)?;\n    process(&file)?;\n} // closed here on every path",
            benefits: &[
                "No leak on early returns or errors",
                "Resource usage stays bounded under load",
            ],
            test_case: "Run the operation in a loop and assert open-handle count stays flat.",
            guidelines: &[
                "Acquire late, release early",
                "Audit error paths for skipped cleanup",
            ],
            tools: &[("valgrind", "Detects leaked allocations and handles at exit")],
        },
        TemplateRule {
            any: &["loop", "n+1", "nested iteration"],
            all: &[],
            title: "Hoist work out of the loop",
            explanation: "Repeated work inside a hot loop multiplies its cost by the iteration count. Compute invariants once and reuse them.",
            replace_hint: "Move invariant computation and allocations out of the loop body.",
            practice_title: "Keep loop bodies minimal",
            practice_code: "let lookup: HashMap<_, _> = items.iter().map(|i| (i.id, i)).collect();\nfor key in keys {\n    if let Some(item) = lookup.get(&key) { handle(item); }\n}",
            benefits: &[
                "Linear instead of quadratic scaling",
                "Fewer allocations per iteration",
            ],
            test_case: "Benchmark with 10k elements and assert runtime grows linearly.",
            guidelines: &[
                "Profile before and after the change",
                "Prefer indexed lookups over nested scans",
            ],
            tools: &[("flamegraph", "Shows where loop time is actually spent")],
        },
        TemplateRule {
            any: &["database", "query", "slow query"],
            all: &[],
            title: "Batch and index database access",
            explanation: "Issuing one query per row pays the round-trip cost per element. Fetch the set in one query and make sure it is indexed.",
            replace_hint: "Collapse per-row queries into a single set-based query over an indexed column.",
            practice_title: "Fetch sets, not rows",
            practice_code: "SELECT * FROM orders WHERE customer_id = ANY($1);",
            benefits: &[
                "One round trip instead of N",
                "Predictable latency as data grows",
            ],
            test_case: "Count issued queries for a 100-row page and assert it stays constant.",
            guidelines: &[
                "Review generated queries from ORMs for N+1 shapes",
                "Add indexes to match the query's filter columns",
            ],
            tools: &[("pg_stat_statements", "Surfaces the most expensive query shapes")],
        },
    ]
});

fn generic_rule(issue: &Issue) -> TemplateRule {
    match issue.category {
        remedy_contracts::Category::Security => TemplateRule {
            any: &[],
            all: &[],
            title: "Harden the flagged code path",
            explanation: "The flagged code handles untrusted input or sensitive state without sufficient safeguards.",
            replace_hint: "Validate inputs at the boundary and fail closed on unexpected values.",
            practice_title: "Validate at trust boundaries",
            practice_code: "fn handle(input: &str) -> Result<(), ValidationError> {\n    validate(input)?;\n    process(input)\n}",
            benefits: &["Reduces the attack surface of the flagged path"],
            test_case: "Exercise the path with malformed input and assert it is rejected.",
            guidelines: &["Apply least privilege to the resources this code touches"],
            tools: &[("semgrep", "Pattern-based checks for recurring security defects")],
        },
        remedy_contracts::Category::Performance => TemplateRule {
            any: &[],
            all: &[],
            title: "Reduce work on the hot path",
            explanation: "The flagged code does avoidable work in a frequently executed path.",
            replace_hint: "Cache or precompute the repeated work identified in the finding.",
            practice_title: "Measure, then optimize",
            practice_code: "let cached = CACHE.get_or_insert_with(key, expensive_compute);",
            benefits: &["Lower latency where it is repeatedly paid"],
            test_case: "Benchmark the path before and after and assert an improvement.",
            guidelines: &["Keep a benchmark in place so the regression cannot return"],
            tools: &[("criterion", "Statistically sound micro-benchmarks")],
        },
        remedy_contracts::Category::Quality => TemplateRule {
            any: &[],
            all: &[],
            title: "Refactor for clarity",
            explanation: "The flagged code is hard to follow, which hides defects and slows review.",
            replace_hint: "Extract the tangled logic into small, named functions with clear inputs.",
            practice_title: "Small functions with one job",
            practice_code: "fn is_eligible(user: &User) -> bool {\n    user.active && user.verified\n}",
            benefits: &["Easier review and safer future changes"],
            test_case: "Add a unit test per extracted function covering its edge cases.",
            guidelines: &["Name functions after the question they answer"],
            tools: &[("clippy", "Lints for common clarity and correctness issues")],
        },
    }
}

/// Description to carry on the suggestion when the finding came without
/// one.
pub(crate) fn describe(issue: &Issue) -> String {
    if !issue.description.trim().is_empty() {
        return issue.description.clone();
    }
    let noun = match issue.category {
        remedy_contracts::Category::Security => "security finding",
        remedy_contracts::Category::Performance => "performance finding",
        remedy_contracts::Category::Quality => "code quality finding",
    };
    format!(
        "{} ({}) at {}:{}",
        issue.issue_type, noun, issue.file, issue.line
    )
}

fn build(issue: &Issue, rule: &TemplateRule, model: &str) -> Suggestion {
    Suggestion {
        issue_id: issue.id.clone(),
        issue_type: issue.issue_type.clone(),
        issue_category: issue.category,
        issue_severity: issue.severity,
        language: issue.language.clone(),
        issue_description: describe(issue),
        immediate_fix: ImmediateFix {
            title: rule.title.to_string(),
            search_code: issue.code_snippet.clone(),
            replace_code: rule.replace_hint.to_string(),
            explanation: rule.explanation.to_string(),
        },
        best_practice: Some(BestPractice {
            title: rule.practice_title.to_string(),
            code: rule.practice_code.to_string(),
            benefits: rule.benefits.iter().map(|b| b.to_string()).collect(),
        }),
        testing: Some(Testing {
            test_case: rule.test_case.to_string(),
            validation_steps: vec![
                "Apply the fix on a branch".to_string(),
                "Run the existing test suite".to_string(),
                "Re-run the analysis and confirm the finding clears".to_string(),
            ],
        }),
        prevention: Some(Prevention {
            guidelines: rule.guidelines.iter().map(|g| g.to_string()).collect(),
            tools: rule
                .tools
                .iter()
                .map(|(name, description)| ToolRecommendation {
                    name: name.to_string(),
                    description: description.to_string(),
                })
                .collect(),
            code_review_checklist: vec![format!(
                "Check new code for the same pattern: {}",
                issue.issue_type
            )],
        }),
        tokens_used: TEMPLATE_INPUT_TOKENS + TEMPLATE_OUTPUT_TOKENS,
        cost: TEMPLATE_COST,
        timestamp: Utc::now().timestamp_millis(),
        model_used: model.to_string(),
    }
}

/// Render the canned suggestion for an issue, keyword-matched against its
/// type and description with a per-category generic default.
pub fn generate(issue: &Issue) -> Suggestion {
    generate_with_model(issue, TEMPLATE_MODEL)
}

/// Same as [`generate`] but stamped with a caller-chosen model name, used by
/// the degraded fallback path to mark suggestions as such.
pub fn generate_with_model(issue: &Issue, model: &str) -> Suggestion {
    let haystack = format!("{} {}", issue.issue_type, issue.description).to_lowercase();
    match TEMPLATE_RULES.iter().find(|rule| rule.matches(&haystack)) {
        Some(rule) => build(issue, rule, model),
        None => build(issue, &generic_rule(issue), model),
    }
}
