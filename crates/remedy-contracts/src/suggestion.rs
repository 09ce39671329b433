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

use crate::types::{Category, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmediateFix {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub search_code: String,
    #[serde(default)]
    pub replace_code: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestPractice {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub benefits: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Testing {
    #[serde(default)]
    pub test_case: String,
    #[serde(default)]
    pub validation_steps: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecommendation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prevention {
    #[serde(default)]
    pub guidelines: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolRecommendation>,
    #[serde(default)]
    pub code_review_checklist: Vec<String>,
}

/// The structured remediation output for one issue. Exactly one suggestion is
/// emitted per attempted issue; degraded paths fill in a fallback rather than
/// dropping the issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub issue_id: String,
    pub issue_type: String,
    pub issue_category: Category,
    pub issue_severity: Severity,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub issue_description: String,
    pub immediate_fix: ImmediateFix,
    #[serde(default)]
    pub best_practice: Option<BestPractice>,
    #[serde(default)]
    pub testing: Option<Testing>,
    #[serde(default)]
    pub prevention: Option<Prevention>,
    pub tokens_used: u32,
    pub cost: f64,
    pub timestamp: i64,
    pub model_used: String,
}

impl Suggestion {
    /// True when this suggestion came from a degraded path rather than a
    /// real model response.
    pub fn is_fallback(&self) -> bool {
        self.model_used.contains("fallback") || self.model_used.contains("template")
    }
}
