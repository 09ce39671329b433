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

use async_trait::async_trait;
use remedy_contracts::{
    Category, EngineConfig, GatewayError, GatewayResult, Issue, Severity, TEMPLATE_MODE,
};
use remedy_engine::client::GenerationClient;
use remedy_engine::gateway::breaker::BreakerState;
use remedy_engine::gateway::{Gateway, GenerationOptions};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

struct MockClient {
    script: Mutex<VecDeque<GatewayResult<Value>>>,
    repeat: Option<Value>,
    calls: AtomicU32,
    models: Mutex<Vec<String>>,
}

impl MockClient {
    fn scripted(responses: Vec<GatewayResult<Value>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            repeat: None,
            calls: AtomicU32::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    fn repeating(response: Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            calls: AtomicU32::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn invoke(&self, model_id: &str, _payload: &Value) -> GatewayResult<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.models.lock().unwrap().push(model_id.to_string());

        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        match &self.repeat {
            Some(value) => Ok(value.clone()),
            None => Err(GatewayError::Network("script exhausted".to_string())),
        }
    }
}

fn success_body(text: &str, input: u64, output: u64) -> Value {
    json!({
        "output": { "message": { "content": [{ "text": text }] } },
        "usage": { "inputTokens": input, "outputTokens": output }
    })
}

fn issue() -> Issue {
    Issue {
        id: "i-1".to_string(),
        issue_type: "sql_injection".to_string(),
        category: Category::Security,
        severity: Severity::High,
        language: "java".to_string(),
        description: "SQL injection via concatenation".to_string(),
        code_snippet: "execute(q + id)".to_string(),
        file: "Dao.java".to_string(),
        line: 3,
    }
}

fn gateway(client: Arc<MockClient>) -> Gateway {
    Gateway::new(client, EngineConfig::default())
}

#[tokio::test(start_paused = true)]
async fn success_carries_usage_and_cost() {
    let client = Arc::new(MockClient::repeating(success_body("fix json", 1000, 500)));
    let gateway = gateway(Arc::clone(&client));

    let result = gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text, "fix json");
    assert_eq!(result.input_tokens, 1000);
    assert_eq!(result.output_tokens, 500);
    assert_eq!(result.total_tokens, 1500);
    assert_eq!(result.model_id, "light");
    // 1000 in at $0.80/M plus 500 out at $3.20/M.
    assert!((result.estimated_cost - 0.0024).abs() < 1e-9);
    assert_eq!(client.calls(), 1);

    let snapshot = gateway.snapshot();
    assert_eq!(snapshot.successful_calls, 1);
    assert_eq!(snapshot.total_tokens, 1500);
}

#[tokio::test(start_paused = true)]
async fn throttle_is_retried_until_success() {
    let client = Arc::new(MockClient::scripted(vec![
        Err(GatewayError::Throttled),
        Err(GatewayError::Throttled),
        Ok(success_body("ok", 100, 50)),
    ]));
    let gateway = gateway(Arc::clone(&client));

    let result = gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.text, "ok");
    assert_eq!(client.calls(), 3);
    let snapshot = gateway.snapshot();
    assert_eq!(snapshot.throttled_calls, 2);
    assert_eq!(snapshot.failed_calls, 2);
    assert_eq!(snapshot.successful_calls, 1);
    // Throttles handled inside one call leave the breaker alone.
    assert_eq!(gateway.breaker_state().await, BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn one_exhausted_call_counts_as_one_breaker_failure() {
    let client = Arc::new(MockClient::scripted(
        (0..15).map(|_| Err(GatewayError::Throttled)).collect(),
    ));
    let gateway = gateway(Arc::clone(&client));

    let error = gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, GatewayError::RetriesExhausted { .. }));
    assert_eq!(gateway.breaker_state().await, BreakerState::Closed);

    for _ in 0..2 {
        let _ = gateway
            .generate(&issue(), "light", "prompt", GenerationOptions::default())
            .await;
    }
    assert_eq!(client.calls(), 15);
    assert_eq!(gateway.breaker_state().await, BreakerState::Open);

    let error = gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, GatewayError::CircuitOpen { .. }));
    assert_eq!(client.calls(), 15);
}

#[tokio::test(start_paused = true)]
async fn retry_attempts_respect_rate_limiter_spacing() {
    let client = Arc::new(MockClient::scripted(vec![
        Err(GatewayError::Throttled),
        Ok(success_body("ok", 100, 50)),
    ]));
    let gateway = gateway(Arc::clone(&client));

    let start = Instant::now();
    gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(client.calls(), 2);
    // Backoff alone would retry after roughly a second; the per-key
    // minimum spacing must hold between attempts as well.
    assert!(start.elapsed() >= Duration::from_millis(5_000));
}

#[tokio::test(start_paused = true)]
async fn metrics_are_kept_per_model() {
    let client = Arc::new(MockClient::scripted(vec![
        Err(GatewayError::Throttled),
        Ok(success_body("ok", 100, 50)),
        Ok(success_body("ok", 100, 50)),
    ]));
    let gateway = gateway(Arc::clone(&client));

    gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap();
    gateway
        .generate(&issue(), "primary", "prompt", GenerationOptions::default())
        .await
        .unwrap();

    let snapshot = gateway.snapshot();
    let light = &snapshot.calls_by_model["light"];
    assert_eq!(light.calls, 2);
    assert_eq!(light.throttled_calls, 1);
    assert!(light.total_latency_ms >= 5_000);
    let primary = &snapshot.calls_by_model["primary"];
    assert_eq!(primary.calls, 1);
    assert_eq!(primary.throttled_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn client_error_fails_without_retry() {
    let client = Arc::new(MockClient::scripted(vec![Err(GatewayError::Service {
        status: 400,
        message: "bad payload".to_string(),
    })]));
    let gateway = gateway(Arc::clone(&client));

    let error = gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(error, GatewayError::Service { status: 400, .. }));
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_exhaust_after_max_attempts() {
    let client = Arc::new(MockClient::scripted(vec![
        Err(GatewayError::Throttled),
        Err(GatewayError::Throttled),
        Err(GatewayError::Throttled),
        Err(GatewayError::Throttled),
        Err(GatewayError::Throttled),
    ]));
    let gateway = gateway(Arc::clone(&client));

    let error = gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap_err();

    match error {
        GatewayError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 5);
            assert!(last.contains("throttled"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(client.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn template_mode_bypasses_the_network() {
    let client = Arc::new(MockClient::repeating(success_body("unused", 1, 1)));
    let gateway = gateway(Arc::clone(&client));

    let result = gateway
        .generate(&issue(), TEMPLATE_MODE, "prompt", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(client.calls(), 0);
    assert_eq!(result.input_tokens, 50);
    assert_eq!(result.output_tokens, 100);
    assert!((result.estimated_cost - 0.0001).abs() < 1e-12);
    assert!(result.model_id.contains("template"));
    assert!(result.text.contains("immediateFix"));

    let snapshot = gateway.snapshot();
    assert_eq!(snapshot.template_calls, 1);
    assert_eq!(snapshot.total_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_rejects_before_the_client() {
    let client = Arc::new(MockClient::scripted(vec![
        Err(GatewayError::Service { status: 400, message: "no".to_string() }),
        Err(GatewayError::Service { status: 400, message: "no".to_string() }),
        Err(GatewayError::Service { status: 400, message: "no".to_string() }),
    ]));
    let gateway = gateway(Arc::clone(&client));

    for _ in 0..3 {
        let _ = gateway
            .generate(&issue(), "light", "prompt", GenerationOptions::default())
            .await;
    }
    assert_eq!(client.calls(), 3);

    let error = gateway
        .generate(&issue(), "light", "prompt", GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(error, GatewayError::CircuitOpen { .. }));
    assert_eq!(client.calls(), 3);
    assert_eq!(gateway.snapshot().rejected_calls, 1);
}
