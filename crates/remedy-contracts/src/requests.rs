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
use std::collections::HashMap;

/// A single static-analysis finding. Deserialized once at the invocation
/// boundary and treated as immutable for the rest of processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub code_snippet: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u32,
}

impl Issue {
    /// Stable composite key used for deterministic routing.
    pub fn routing_key(&self) -> String {
        format!("{}_{}_{}_{}", self.id, self.issue_type, self.file, self.line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub analysis_id: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub scan_number: Option<u32>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Explicit model override; takes precedence over the routing policy.
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub issue_severity: Option<Severity>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub processing_mode: Option<String>,
}

impl GenerationRequest {
    pub fn is_valid(&self) -> bool {
        !self.session_id.trim().is_empty()
            && !self.analysis_id.trim().is_empty()
            && !self.issues.is_empty()
    }

    pub fn is_hybrid_mode(&self) -> bool {
        self.strategy.as_deref() == Some("hybrid") || self.model_id.is_some()
    }

    /// The request-level model choice, falling back to a severity-based
    /// default when no explicit identifier was supplied.
    pub fn effective_model_id(&self, primary: &str, light: &str) -> String {
        if let Some(model) = self.model_id.as_deref() {
            if !model.trim().is_empty() {
                return model.to_string();
            }
        }
        match self.issue_severity {
            Some(Severity::Critical) => primary.to_string(),
            _ => light.to_string(),
        }
    }
}
