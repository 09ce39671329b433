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

use crate::suggestion::Suggestion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A complete, successful invocation of the generation endpoint. Failures
/// travel as `GatewayError`; this type is never partially populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub model_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_suggestions: usize,
    pub by_severity: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
    pub tokens_used: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTime {
    pub start_time: i64,
    pub end_time: i64,
    pub total_processing_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub status: ResponseStatus,
    pub analysis_id: String,
    pub session_id: String,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub summary: Option<Summary>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub processing_time: ProcessingTime,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl GenerationResponse {
    pub fn error(analysis_id: &str, session_id: &str, message: &str) -> Self {
        Self {
            status: ResponseStatus::Error,
            analysis_id: analysis_id.to_string(),
            session_id: session_id.to_string(),
            suggestions: Vec::new(),
            summary: None,
            metadata: HashMap::new(),
            processing_time: ProcessingTime::default(),
            errors: vec![message.to_string()],
            warnings: Vec::new(),
        }
    }
}
