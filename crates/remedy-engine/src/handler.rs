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

//! Request orchestration. Validates the request, drives the scheduler,
//! assembles the summary and persists results. Storage problems degrade to
//! warnings on the response; only an invalid request produces an error
//! status.

use crate::gateway::Gateway;
use crate::scheduler::Scheduler;
use crate::store::SuggestionStore;
use chrono::Utc;
use remedy_contracts::{
    GenerationRequest, GenerationResponse, ProcessingTime, ResponseStatus, Summary,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Default wall-clock allowance for one request.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(900);

pub struct SuggestionHandler {
    gateway: Arc<Gateway>,
    scheduler: Scheduler,
    store: Arc<dyn SuggestionStore>,
}

impl SuggestionHandler {
    pub fn new(gateway: Arc<Gateway>, store: Arc<dyn SuggestionStore>) -> Self {
        Self {
            scheduler: Scheduler::new(Arc::clone(&gateway)),
            gateway,
            store,
        }
    }

    pub async fn handle(&self, request: GenerationRequest) -> GenerationResponse {
        self.handle_with_deadline(request, Instant::now() + DEFAULT_DEADLINE)
            .await
    }

    pub async fn handle_with_deadline(
        &self,
        mut request: GenerationRequest,
        deadline: Instant,
    ) -> GenerationResponse {
        let invocation_id = Uuid::new_v4();
        let start_time = Utc::now().timestamp_millis();

        info!(
            %invocation_id,
            session_id = %request.session_id,
            analysis_id = %request.analysis_id,
            issues = request.issues.len(),
            "handling suggestion request"
        );

        if !request.is_valid() {
            warn!(%invocation_id, "rejecting invalid request");
            return GenerationResponse::error(
                &request.analysis_id,
                &request.session_id,
                "request must carry a session id, an analysis id and at least one issue",
            );
        }

        let mut warnings = Vec::new();

        if let Err(error) = self
            .store
            .update_progress(&request.session_id, &request.analysis_id, "started", 0)
            .await
        {
            warn!(%invocation_id, %error, "failed to record start progress");
        }

        let max_issues = self.gateway.config().budget.max_issues;
        if request.issues.len() > max_issues {
            warnings.push(format!(
                "issue list truncated from {} to {max_issues}",
                request.issues.len()
            ));
            request.issues.truncate(max_issues);
        }

        let outcome = self.scheduler.process(&request, deadline).await;
        warnings.extend(outcome.warnings);

        let mut by_severity: HashMap<String, u64> = HashMap::new();
        let mut by_category: HashMap<String, u64> = HashMap::new();
        for suggestion in &outcome.suggestions {
            *by_severity
                .entry(suggestion.issue_severity.as_str().to_string())
                .or_default() += 1;
            *by_category
                .entry(suggestion.issue_category.as_str().to_string())
                .or_default() += 1;
        }

        let summary = Summary {
            total_suggestions: outcome.suggestions.len(),
            by_severity,
            by_category,
            tokens_used: outcome.tokens_spent,
            estimated_cost: outcome.total_cost,
        };

        if let Err(error) = self
            .store
            .save_suggestions(&request.session_id, &request.analysis_id, &outcome.suggestions)
            .await
        {
            warn!(%invocation_id, %error, "failed to persist suggestions");
            warnings.push(format!("suggestions were not persisted: {error}"));
        }

        if let Err(error) = self
            .store
            .update_progress(
                &request.session_id,
                &request.analysis_id,
                "complete",
                outcome.suggestions.len(),
            )
            .await
        {
            warn!(%invocation_id, %error, "failed to record completion progress");
        }

        let end_time = Utc::now().timestamp_millis();
        let snapshot = self.gateway.snapshot();
        let mut metadata = HashMap::new();
        metadata.insert(
            "invocationId".to_string(),
            serde_json::Value::String(invocation_id.to_string()),
        );
        metadata.insert(
            "skippedIssues".to_string(),
            serde_json::Value::from(outcome.skipped),
        );
        metadata.insert(
            "gatewayTotalCalls".to_string(),
            serde_json::Value::from(snapshot.total_calls),
        );
        metadata.insert(
            "gatewayThrottledCalls".to_string(),
            serde_json::Value::from(snapshot.throttled_calls),
        );

        info!(
            %invocation_id,
            suggestions = summary.total_suggestions,
            tokens = summary.tokens_used,
            elapsed_ms = end_time - start_time,
            "suggestion request complete"
        );

        GenerationResponse {
            status: ResponseStatus::Success,
            analysis_id: request.analysis_id.clone(),
            session_id: request.session_id.clone(),
            suggestions: outcome.suggestions,
            summary: Some(summary),
            metadata,
            processing_time: ProcessingTime {
                start_time,
                end_time,
                total_processing_time: end_time - start_time,
            },
            errors: Vec::new(),
            warnings,
        }
    }
}
