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

/// Sentinel model identifier that routes to the offline template generator,
/// bypassing all network and resilience state.
pub const TEMPLATE_MODE: &str = "TEMPLATE_MODE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Number of recent call timestamps tracked in the sliding window.
    pub window_size: usize,
    /// Minimum spacing between consecutive calls for one caller key.
    pub min_call_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_call_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            reset_timeout_ms: 120_000,
        }
    }
}

/// Hybrid routing traffic split, in integer percentage points of the hash
/// space. The remainder after `light_pct + template_pct` falls back to the
/// lightweight model so no issue is ever dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub premier_pct: u8,
    pub light_pct: u8,
    pub template_pct: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            premier_pct: 1,
            light_pct: 90,
            template_pct: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_per_million: 0.80,
            output_per_million: 3.20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub token_budget: u64,
    /// Tokens held back from the budget as a safety margin.
    pub token_buffer: u64,
    /// Wall-clock margin kept before the enclosing deadline.
    pub timeout_buffer_ms: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_concurrent: usize,
    pub max_issues: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            token_budget: 40_000,
            token_buffer: 5_000,
            timeout_buffer_ms: 30_000,
            batch_size: 1,
            batch_delay_ms: 2_000,
            max_concurrent: 2,
            max_issues: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub primary_model_id: String,
    pub light_model_id: String,
    pub endpoint_region: String,
    pub max_output_tokens: u32,
    pub template_mode_enabled: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_model_id: "amazon.nova-pro-v1:0".to_string(),
            light_model_id: "amazon.nova-lite-v1:0".to_string(),
            endpoint_region: "us-east-1".to_string(),
            max_output_tokens: 8_000,
            template_mode_enabled: false,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
            routing: RoutingConfig::default(),
            pricing: PricingConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}
