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
    Category, EngineConfig, GatewayError, GatewayResult, GenerationRequest, Issue, RoutingConfig,
    Severity,
};
use remedy_engine::client::GenerationClient;
use remedy_engine::gateway::Gateway;
use remedy_engine::scheduler::Scheduler;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

struct MockClient {
    response: GatewayResult<Value>,
    calls: AtomicU32,
    models: Mutex<Vec<String>>,
}

impl MockClient {
    fn new(response: GatewayResult<Value>) -> Self {
        Self {
            response,
            calls: AtomicU32::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn invoke(&self, model_id: &str, _payload: &Value) -> GatewayResult<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.models.lock().unwrap().push(model_id.to_string());
        match &self.response {
            Ok(value) => Ok(value.clone()),
            Err(GatewayError::Service { status, message }) => Err(GatewayError::Service {
                status: *status,
                message: message.clone(),
            }),
            Err(other) => Err(GatewayError::Network(other.to_string())),
        }
    }
}

fn suggestion_body(input: u64, output: u64) -> Value {
    json!({
        "output": { "message": { "content": [{
            "text": "{\"immediateFix\": {\"title\": \"Fix it\", \"searchCode\": \"a\", \"replaceCode\": \"b\", \"explanation\": \"c\"}}"
        }] } },
        "usage": { "inputTokens": input, "outputTokens": output }
    })
}

fn issue(id: &str, category: Category, severity: Severity) -> Issue {
    Issue {
        id: id.to_string(),
        issue_type: "finding".to_string(),
        category,
        severity,
        language: "java".to_string(),
        description: "a finding".to_string(),
        code_snippet: "code".to_string(),
        file: "A.java".to_string(),
        line: 1,
    }
}

fn request(issues: Vec<Issue>) -> GenerationRequest {
    GenerationRequest {
        session_id: "session-1".to_string(),
        analysis_id: "analysis-1".to_string(),
        repository: None,
        branch: None,
        issues,
        stage: None,
        scan_number: None,
        timestamp: None,
        metadata: HashMap::new(),
        model_id: None,
        issue_severity: None,
        strategy: None,
        processing_mode: None,
    }
}

fn scheduler_with(client: Arc<MockClient>, config: EngineConfig) -> Scheduler {
    Scheduler::new(Arc::new(Gateway::new(client, config)))
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(3_600)
}

/// Routing disabled: everything goes to the light model, so tests exercise
/// the scheduler rather than the hash split.
fn light_only_config() -> EngineConfig {
    EngineConfig {
        routing: RoutingConfig {
            premier_pct: 0,
            light_pct: 100,
            template_pct: 0,
        },
        ..EngineConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn every_attempted_issue_yields_one_suggestion() {
    let client = Arc::new(MockClient::new(Ok(suggestion_body(200, 100))));
    let scheduler = scheduler_with(Arc::clone(&client), light_only_config());

    let issues = vec![
        issue("s-1", Category::Security, Severity::Critical),
        issue("p-1", Category::Performance, Severity::High),
        issue("q-1", Category::Quality, Severity::Low),
    ];
    let outcome = scheduler.process(&request(issues), far_deadline()).await;

    assert_eq!(outcome.attempted, 3);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.suggestions.len(), 3);
    assert_eq!(outcome.tokens_spent, 900);

    let ids: Vec<&str> = outcome.suggestions.iter().map(|s| s.issue_id.as_str()).collect();
    assert_eq!(ids, ["s-1", "p-1", "q-1"]);
    for suggestion in &outcome.suggestions {
        assert_eq!(suggestion.immediate_fix.title, "Fix it");
        assert!(!suggestion.is_fallback());
    }
}

#[tokio::test(start_paused = true)]
async fn endpoint_failure_degrades_to_template_fallback() {
    let client = Arc::new(MockClient::new(Err(GatewayError::Service {
        status: 400,
        message: "rejected".to_string(),
    })));
    let scheduler = scheduler_with(Arc::clone(&client), light_only_config());

    let issues = vec![
        issue("a", Category::Security, Severity::High),
        issue("b", Category::Quality, Severity::Medium),
    ];
    let outcome = scheduler.process(&request(issues), far_deadline()).await;

    assert_eq!(outcome.suggestions.len(), 2);
    for suggestion in &outcome.suggestions {
        assert!(suggestion.is_fallback());
        assert_eq!(suggestion.model_used, "template-fallback");
        assert!(!suggestion.immediate_fix.title.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn token_budget_cuts_off_processing() {
    let mut config = light_only_config();
    config.budget.token_budget = 10_000;
    config.budget.token_buffer = 5_000;

    // Each call burns 6000 tokens against a 5000-token usable budget.
    let client = Arc::new(MockClient::new(Ok(suggestion_body(4_000, 2_000))));
    let scheduler = scheduler_with(Arc::clone(&client), config);

    let issues = vec![
        issue("q-1", Category::Quality, Severity::High),
        issue("q-2", Category::Quality, Severity::High),
        issue("q-3", Category::Quality, Severity::High),
    ];
    let outcome = scheduler.process(&request(issues), far_deadline()).await;

    assert_eq!(outcome.suggestions.len(), 1);
    assert_eq!(outcome.skipped, 2);
    assert!(outcome.warnings.iter().any(|w| w.contains("budget")));
}

#[tokio::test(start_paused = true)]
async fn deadline_buffer_stops_early() {
    let client = Arc::new(MockClient::new(Ok(suggestion_body(200, 100))));
    let scheduler = scheduler_with(Arc::clone(&client), light_only_config());

    let issues = vec![
        issue("q-1", Category::Quality, Severity::High),
        issue("q-2", Category::Quality, Severity::High),
    ];
    // Deadline inside the 30s buffer: nothing should be attempted.
    let deadline = Instant::now() + Duration::from_secs(10);
    let outcome = scheduler.process(&request(issues), deadline).await;

    assert_eq!(outcome.attempted, 0);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(client.calls(), 0);
    assert!(outcome.warnings.iter().any(|w| w.contains("deadline")));
}

#[tokio::test(start_paused = true)]
async fn caller_model_override_wins_over_routing() {
    let client = Arc::new(MockClient::new(Ok(suggestion_body(200, 100))));
    let scheduler = scheduler_with(Arc::clone(&client), light_only_config());

    let mut req = request(vec![
        issue("a", Category::Security, Severity::Critical),
        issue("b", Category::Quality, Severity::Low),
    ]);
    req.model_id = Some("custom-model-v9".to_string());

    let outcome = scheduler.process(&req, far_deadline()).await;

    assert_eq!(outcome.suggestions.len(), 2);
    assert!(client.models().iter().all(|m| m == "custom-model-v9"));
    for suggestion in &outcome.suggestions {
        assert_eq!(suggestion.model_used, "custom-model-v9");
    }
}

#[tokio::test(start_paused = true)]
async fn template_only_routing_never_calls_the_endpoint() {
    let config = EngineConfig {
        routing: RoutingConfig {
            premier_pct: 0,
            light_pct: 0,
            template_pct: 100,
        },
        ..EngineConfig::default()
    };
    let client = Arc::new(MockClient::new(Ok(suggestion_body(200, 100))));
    let scheduler = scheduler_with(Arc::clone(&client), config);

    let issues = vec![
        issue("q-1", Category::Quality, Severity::Medium),
        issue("q-2", Category::Performance, Severity::Medium),
    ];
    let outcome = scheduler.process(&request(issues), far_deadline()).await;

    assert_eq!(client.calls(), 0);
    assert_eq!(outcome.suggestions.len(), 2);
    for suggestion in &outcome.suggestions {
        assert!(suggestion.model_used.contains("template"));
    }
}

#[tokio::test(start_paused = true)]
async fn global_template_mode_overrides_everything() {
    let mut config = light_only_config();
    config.template_mode_enabled = true;

    let client = Arc::new(MockClient::new(Ok(suggestion_body(200, 100))));
    let scheduler = scheduler_with(Arc::clone(&client), config);

    let mut req = request(vec![issue("a", Category::Security, Severity::Critical)]);
    req.model_id = Some("custom-model-v9".to_string());

    let outcome = scheduler.process(&req, far_deadline()).await;

    assert_eq!(client.calls(), 0);
    assert_eq!(outcome.suggestions.len(), 1);
    assert!(outcome.suggestions[0].model_used.contains("template"));
}
