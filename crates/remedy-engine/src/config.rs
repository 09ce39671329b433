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

//! Environment-backed configuration. Every knob falls back to the compiled
//! default, so a bare environment yields a working engine.

use remedy_contracts::EngineConfig;
use std::str::FromStr;
use tracing::warn;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(name, raw = %raw, "unparseable environment value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Build an [`EngineConfig`] from the process environment.
pub fn load_from_env() -> EngineConfig {
    let defaults = EngineConfig::default();
    let mut config = EngineConfig {
        primary_model_id: env_string("PRIMARY_MODEL_ID", &defaults.primary_model_id),
        light_model_id: env_string("LIGHT_MODEL_ID", &defaults.light_model_id),
        endpoint_region: env_string("ENDPOINT_REGION", &defaults.endpoint_region),
        max_output_tokens: env_or("MAX_OUTPUT_TOKENS", defaults.max_output_tokens),
        template_mode_enabled: env_or("TEMPLATE_MODE_ENABLED", defaults.template_mode_enabled),
        ..defaults
    };

    config.retry.max_attempts = env_or("RETRY_MAX_ATTEMPTS", config.retry.max_attempts);
    config.retry.base_delay_ms = env_or("RETRY_BASE_DELAY_MS", config.retry.base_delay_ms);
    config.retry.max_delay_ms = env_or("RETRY_MAX_DELAY_MS", config.retry.max_delay_ms);

    config.rate_limit.window_size = env_or("RATE_LIMIT_WINDOW_SIZE", config.rate_limit.window_size);
    config.rate_limit.min_call_interval_ms =
        env_or("MIN_CALL_INTERVAL_MS", config.rate_limit.min_call_interval_ms);

    config.breaker.enabled = env_or("BREAKER_ENABLED", config.breaker.enabled);
    config.breaker.failure_threshold =
        env_or("BREAKER_FAILURE_THRESHOLD", config.breaker.failure_threshold);
    config.breaker.reset_timeout_ms =
        env_or("BREAKER_RESET_TIMEOUT_MS", config.breaker.reset_timeout_ms);

    config.routing.premier_pct = env_or("ROUTING_PREMIER_PCT", config.routing.premier_pct);
    config.routing.light_pct = env_or("ROUTING_LIGHT_PCT", config.routing.light_pct);
    config.routing.template_pct = env_or("ROUTING_TEMPLATE_PCT", config.routing.template_pct);

    config.budget.token_budget = env_or("TOKEN_BUDGET", config.budget.token_budget);
    config.budget.token_buffer = env_or("TOKEN_BUFFER", config.budget.token_buffer);
    config.budget.timeout_buffer_ms = env_or("TIMEOUT_BUFFER_MS", config.budget.timeout_buffer_ms);
    config.budget.batch_size = env_or("BATCH_SIZE", config.budget.batch_size);
    config.budget.batch_delay_ms = env_or("BATCH_DELAY_MS", config.budget.batch_delay_ms);
    config.budget.max_concurrent = env_or("MAX_CONCURRENT", config.budget.max_concurrent);
    config.budget.max_issues = env_or("MAX_ISSUES", config.budget.max_issues);

    config.pricing.input_per_million =
        env_or("PRICE_INPUT_PER_MILLION", config.pricing.input_per_million);
    config.pricing.output_per_million =
        env_or("PRICE_OUTPUT_PER_MILLION", config.pricing.output_per_million);

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_environment_yields_defaults() {
        let config = load_from_env();
        let defaults = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, defaults.retry.max_attempts);
        assert_eq!(config.budget.token_budget, defaults.budget.token_budget);
        assert_eq!(config.routing.light_pct, defaults.routing.light_pct);
    }
}
