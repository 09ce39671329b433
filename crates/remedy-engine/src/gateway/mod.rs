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

//! The resilience gateway. Every model invocation flows through here and
//! picks up circuit breaking, client-side rate limiting, retry with
//! backoff, usage accounting and the template-mode bypass.

pub mod backoff;
pub mod breaker;
pub mod rate_limit;

use crate::client::GenerationClient;
use crate::{estimator, templates};
use breaker::{BreakerState, CircuitBreaker};
use chrono::Utc;
use rate_limit::RateLimiter;
use remedy_contracts::{
    EngineConfig, GatewayError, GatewayResult, InvocationResult, Issue, Suggestion, TEMPLATE_MODE,
};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-call generation options. `top_p` is carried for callers that set it
/// but is not transmitted; the endpoint rejects it alongside temperature.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 8_000,
            temperature: 0.3,
            top_p: None,
        }
    }
}

/// Per-model slice of the gateway metrics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModelCallStats {
    pub calls: u64,
    pub throttled_calls: u64,
    pub total_latency_ms: u64,
}

#[derive(Debug, Default)]
struct GatewayMetrics {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    throttled_calls: AtomicU64,
    rejected_calls: AtomicU64,
    template_calls: AtomicU64,
    total_tokens: AtomicU64,
    total_cost_micros: AtomicU64,
    total_latency_ms: AtomicU64,
    by_model: DashMap<String, ModelCallStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub throttled_calls: u64,
    pub rejected_calls: u64,
    pub template_calls: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_latency_ms: u64,
    pub calls_by_model: HashMap<String, ModelCallStats>,
}

pub struct Gateway {
    client: Arc<dyn GenerationClient>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    config: EngineConfig,
    metrics: GatewayMetrics,
}

impl Gateway {
    pub fn new(client: Arc<dyn GenerationClient>, config: EngineConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new("generation-endpoint", config.breaker.clone()),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            client,
            config,
            metrics: GatewayMetrics::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate a remediation for one issue through `model_id`. The
    /// `TEMPLATE_MODE` sentinel renders a canned suggestion locally and
    /// touches neither the network nor the resilience state.
    pub async fn generate(
        &self,
        issue: &Issue,
        model_id: &str,
        prompt: &str,
        options: GenerationOptions,
    ) -> GatewayResult<InvocationResult> {
        if model_id == TEMPLATE_MODE {
            return Ok(self.render_template(issue));
        }

        if let Err(error) = self.breaker.check().await {
            self.metrics.rejected_calls.fetch_add(1, Ordering::Relaxed);
            warn!(issue_id = %issue.id, %error, "call rejected by circuit breaker");
            return Err(error);
        }

        let payload = build_payload(prompt, &options);
        let mut last_error: Option<GatewayError> = None;
        let started = Instant::now();

        for attempt in 1..=self.config.retry.max_attempts {
            self.limiter.acquire(model_id).await;

            self.metrics.total_calls.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .by_model
                .entry(model_id.to_string())
                .or_default()
                .calls += 1;
            debug!(issue_id = %issue.id, model_id, attempt, "invoking model");

            match self.client.invoke(model_id, &payload).await {
                Ok(response) => {
                    self.breaker.record_success().await;
                    let latency = started.elapsed().as_millis() as u64;
                    self.metrics
                        .total_latency_ms
                        .fetch_add(latency, Ordering::Relaxed);
                    self.metrics
                        .by_model
                        .entry(model_id.to_string())
                        .or_default()
                        .total_latency_ms += latency;
                    let result = self.account_success(model_id, prompt, response);
                    info!(
                        issue_id = %issue.id,
                        model_id,
                        attempt,
                        tokens = result.total_tokens,
                        "model invocation succeeded"
                    );
                    return Ok(result);
                }
                Err(error) => {
                    self.metrics.failed_calls.fetch_add(1, Ordering::Relaxed);
                    if matches!(error, GatewayError::Throttled) {
                        self.metrics.throttled_calls.fetch_add(1, Ordering::Relaxed);
                        self.metrics
                            .by_model
                            .entry(model_id.to_string())
                            .or_default()
                            .throttled_calls += 1;
                    }

                    // Only terminal failures count against the breaker.
                    // Retryable errors are endpoint pushback, not an
                    // endpoint outage, and are handled by this loop.
                    if !error.is_retryable() {
                        self.breaker.record_failure().await;
                        warn!(issue_id = %issue.id, %error, "non-retryable failure");
                        return Err(error);
                    }

                    warn!(issue_id = %issue.id, attempt, %error, "retryable failure");
                    last_error = Some(error);

                    if attempt < self.config.retry.max_attempts {
                        let delay = backoff::delay_for_attempt(attempt, &self.config.retry);
                        debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.breaker.record_failure().await;
        Err(GatewayError::RetriesExhausted {
            attempts: self.config.retry.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn render_template(&self, issue: &Issue) -> InvocationResult {
        self.metrics.template_calls.fetch_add(1, Ordering::Relaxed);
        let suggestion = templates::generate(issue);
        let text = suggestion_body_json(&suggestion);
        self.metrics
            .total_tokens
            .fetch_add(u64::from(suggestion.tokens_used), Ordering::Relaxed);
        self.metrics
            .total_cost_micros
            .fetch_add((templates::TEMPLATE_COST * 1e6) as u64, Ordering::Relaxed);

        InvocationResult {
            text,
            input_tokens: templates::TEMPLATE_INPUT_TOKENS,
            output_tokens: templates::TEMPLATE_OUTPUT_TOKENS,
            total_tokens: templates::TEMPLATE_INPUT_TOKENS + templates::TEMPLATE_OUTPUT_TOKENS,
            estimated_cost: templates::TEMPLATE_COST,
            model_id: templates::TEMPLATE_MODEL.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn account_success(&self, model_id: &str, prompt: &str, response: Value) -> InvocationResult {
        let text = extract_text(&response);
        let (input_tokens, output_tokens) = extract_usage(&response, prompt, &text);
        let total_tokens = input_tokens + output_tokens;
        let estimated_cost = estimator::estimate_cost(input_tokens, output_tokens, &self.config.pricing);

        self.metrics.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_tokens
            .fetch_add(u64::from(total_tokens), Ordering::Relaxed);
        self.metrics
            .total_cost_micros
            .fetch_add((estimated_cost * 1e6) as u64, Ordering::Relaxed);

        InvocationResult {
            text,
            input_tokens,
            output_tokens,
            total_tokens,
            estimated_cost,
            model_id: model_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Failure share across all real invocation attempts so far.
    pub fn failure_rate(&self) -> f64 {
        let total = self.metrics.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.metrics.failed_calls.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn throttle_count(&self) -> u64 {
        self.metrics.throttled_calls.load(Ordering::Relaxed)
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.breaker.state().await
    }

    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            total_calls: self.metrics.total_calls.load(Ordering::Relaxed),
            successful_calls: self.metrics.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.metrics.failed_calls.load(Ordering::Relaxed),
            throttled_calls: self.metrics.throttled_calls.load(Ordering::Relaxed),
            rejected_calls: self.metrics.rejected_calls.load(Ordering::Relaxed),
            template_calls: self.metrics.template_calls.load(Ordering::Relaxed),
            total_tokens: self.metrics.total_tokens.load(Ordering::Relaxed),
            total_cost: self.metrics.total_cost_micros.load(Ordering::Relaxed) as f64 / 1e6,
            total_latency_ms: self.metrics.total_latency_ms.load(Ordering::Relaxed),
            calls_by_model: self
                .metrics
                .by_model
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

/// Wire payload for the generation endpoint.
fn build_payload(prompt: &str, options: &GenerationOptions) -> Value {
    json!({
        "messages": [{
            "role": "user",
            "content": [{ "text": prompt }]
        }],
        "inferenceConfig": {
            "maxTokens": options.max_tokens,
            "temperature": options.temperature
        }
    })
}

/// Pull the generated text out of a response body. Falls back from the
/// structured shape to a bare `text` field to the whole body as a string,
/// so the parser downstream always has something to work with.
fn extract_text(response: &Value) -> String {
    if let Some(text) = response["output"]["message"]["content"][0]["text"].as_str() {
        return text.to_string();
    }
    if let Some(text) = response["text"].as_str() {
        return text.to_string();
    }
    response.to_string()
}

fn usage_field(usage: &Value, camel: &str, snake: &str) -> Option<u32> {
    usage[camel]
        .as_u64()
        .or_else(|| usage[snake].as_u64())
        .map(|v| v as u32)
}

fn extract_usage(response: &Value, prompt: &str, text: &str) -> (u32, u32) {
    if let Some(usage) = response.get("usage") {
        let input = usage_field(usage, "inputTokens", "input_tokens");
        let output = usage_field(usage, "outputTokens", "output_tokens");
        match (input, output) {
            (Some(i), Some(o)) => return (i, o),
            _ => {
                if let Some(total) = usage_field(usage, "totalTokens", "total_tokens") {
                    return estimator::split_total_tokens(total);
                }
            }
        }
    }
    (
        estimator::estimate_tokens(prompt).max(estimator::MIN_INPUT_TOKENS),
        estimator::estimate_tokens(text).max(estimator::MIN_OUTPUT_TOKENS),
    )
}

/// Serialize the remediation sections of a suggestion back into the JSON
/// shape a model response would carry, so template renders flow through the
/// same parser as real responses.
fn suggestion_body_json(suggestion: &Suggestion) -> String {
    json!({
        "immediateFix": suggestion.immediate_fix,
        "bestPractice": suggestion.best_practice,
        "testing": suggestion.testing,
        "prevention": suggestion.prevention,
    })
    .to_string()
}
