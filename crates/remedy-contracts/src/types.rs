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

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Performance,
    Quality,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Quality => "quality",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Quality
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "security" => Category::Security,
            "performance" => Category::Performance,
            _ => Category::Quality,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::from(s.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Numeric rank used when ordering issues inside a category.
    pub fn priority(&self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    pub fn is_high_priority(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        Severity::from(s.as_str())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("throttled by generation endpoint")]
    Throttled,

    #[error("model inference timed out")]
    ModelTimeout,

    #[error("service error {status}: {message}")]
    Service { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("circuit breaker is open, {remaining_ms}ms until reset")]
    CircuitOpen { remaining_ms: u64 },

    #[error("all {attempts} attempts failed: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Retryability classification. Throttling, inference timeouts, 5xx and
    /// explicit 429 responses are transient; other 4xx and unexpected
    /// conditions are not. Client-side errors are retried only when the
    /// message points at a timeout/connection/network condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Throttled | GatewayError::ModelTimeout => true,
            GatewayError::Service { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Network(message) => {
                let m = message.to_lowercase();
                m.contains("timeout") || m.contains("connection") || m.contains("network")
            }
            _ => false,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
