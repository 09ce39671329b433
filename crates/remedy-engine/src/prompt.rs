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

//! Prompt assembly. One prompt per issue, tuned per category, always ending
//! with the strict JSON contract the parser expects back.

use crate::estimator;
use remedy_contracts::{Category, Issue};

/// Hard cap on snippet size inside a prompt. Anything longer is trimmed on
/// a line boundary before it reaches the model.
pub const MAX_SNIPPET_CHARS: usize = 1_500;

const JSON_CONTRACT: &str = r#"Respond with ONLY a JSON object, no prose before or after, matching exactly:
{
  "immediateFix": {
    "title": "short imperative title",
    "searchCode": "the exact code to find",
    "replaceCode": "the corrected code",
    "explanation": "why the replacement is correct"
  },
  "bestPractice": {
    "title": "the underlying practice",
    "code": "a small idiomatic example",
    "benefits": ["benefit 1", "benefit 2"]
  },
  "testing": {
    "testCase": "how to verify the fix",
    "validationSteps": ["step 1", "step 2"]
  },
  "prevention": {
    "guidelines": ["guideline 1"],
    "tools": [{"name": "tool", "description": "what it catches"}],
    "codeReviewChecklist": ["check 1"]
  }
}"#;

fn category_guidance(category: Category) -> &'static str {
    match category {
        Category::Security => {
            "Treat this as a security vulnerability. Explain the concrete attack the current \
             code allows, fix the root cause rather than the symptom, and keep the fix minimal \
             enough to backport."
        }
        Category::Performance => {
            "Treat this as a performance defect. State the complexity or cost of the current \
             code, give a fix with measurably better behavior, and mention how to verify the \
             improvement."
        }
        Category::Quality => {
            "Treat this as a maintainability defect. Improve clarity without changing observable \
             behavior, and keep the refactor small enough to review in isolation."
        }
    }
}

/// Build the generation prompt for one issue.
pub fn build_prompt(issue: &Issue) -> String {
    let snippet = estimator::truncate_code(&issue.code_snippet, MAX_SNIPPET_CHARS);
    let language = if issue.language.is_empty() {
        "unknown"
    } else {
        &issue.language
    };

    format!(
        "You are a senior engineer producing a remediation for a static-analysis finding.\n\
         {guidance}\n\n\
         Finding:\n\
         - type: {issue_type}\n\
         - severity: {severity}\n\
         - language: {language}\n\
         - file: {file}:{line}\n\
         - description: {description}\n\n\
         Code:\n```\n{snippet}\n```\n\n\
         {contract}",
        guidance = category_guidance(issue.category),
        issue_type = issue.issue_type,
        severity = issue.severity.as_str(),
        language = language,
        file = issue.file,
        line = issue.line,
        description = issue.description,
        snippet = snippet,
        contract = JSON_CONTRACT,
    )
}
