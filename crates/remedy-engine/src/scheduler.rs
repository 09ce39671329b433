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

//! Budget-aware scheduler. Issues are grouped by category, ordered by
//! severity, and processed under a shared token budget and deadline, with
//! adaptive pacing that slows down when the endpoint shows distress.

use crate::gateway::{breaker::BreakerState, Gateway, GenerationOptions};
use crate::routing::{ModelRoute, Router};
use crate::{parser, prompt, templates};
use futures::stream::{self, StreamExt};
use remedy_contracts::{
    Category, GenerationRequest, Issue, Suggestion, TEMPLATE_MODE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Model name stamped on suggestions produced by the degraded path after
/// the gateway gave up on an issue.
pub const FALLBACK_MODEL: &str = "template-fallback";

const SECURITY_SHARE: f64 = 0.5;
const PERFORMANCE_SHARE: f64 = 0.3;
const QUALITY_SHARE: f64 = 0.2;

/// Guaranteed tokens per issue when computing a category floor.
const FLOOR_TOKENS_PER_ISSUE: u64 = 2_000;

const MIN_CALL_DELAY: Duration = Duration::from_millis(500);
const MAX_CALL_DELAY: Duration = Duration::from_millis(3_000);
const MIN_BATCH_DELAY: Duration = Duration::from_millis(5_000);
const MAX_BATCH_DELAY: Duration = Duration::from_millis(30_000);
const DISTRESS_COOLDOWN: Duration = Duration::from_millis(5_000);

#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub suggestions: Vec<Suggestion>,
    pub tokens_spent: u64,
    pub total_cost: f64,
    pub attempted: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

pub struct Scheduler {
    gateway: Arc<Gateway>,
    router: Router,
}

impl Scheduler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let router = Router::new(gateway.config().routing.clone());
        Self { gateway, router }
    }

    /// Token allocation per category. Each non-empty category gets the
    /// larger of its fixed share and a per-issue floor, with the floor
    /// capped at a third of the usable budget so one category cannot
    /// swallow everything.
    pub fn allocations(issues: &[Issue], usable_budget: u64) -> HashMap<Category, u64> {
        let mut counts: HashMap<Category, u64> = HashMap::new();
        for issue in issues {
            *counts.entry(issue.category).or_default() += 1;
        }

        let mut allocations = HashMap::new();
        for (category, share) in [
            (Category::Security, SECURITY_SHARE),
            (Category::Performance, PERFORMANCE_SHARE),
            (Category::Quality, QUALITY_SHARE),
        ] {
            let count = counts.get(&category).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }
            let share_tokens = (usable_budget as f64 * share) as u64;
            let floor = (FLOOR_TOKENS_PER_ISSUE * count).min(usable_budget / 3);
            allocations.insert(category, share_tokens.max(floor));
        }
        allocations
    }

    /// Processing order: categories by stake, issues by severity within
    /// each category.
    pub fn ordered(issues: &[Issue]) -> Vec<Issue> {
        let mut ordered = Vec::with_capacity(issues.len());
        for category in [Category::Security, Category::Performance, Category::Quality] {
            let mut group: Vec<Issue> = issues
                .iter()
                .filter(|i| i.category == category)
                .cloned()
                .collect();
            group.sort_by(|a, b| b.severity.cmp(&a.severity));
            ordered.extend(group);
        }
        ordered
    }

    /// Process a request's issues until they run out or a budget does.
    /// Every attempted issue yields exactly one suggestion; issues cut off
    /// by the budget or deadline are skipped, not failed.
    pub async fn process(&self, request: &GenerationRequest, deadline: Instant) -> ScheduleOutcome {
        let config = self.gateway.config().clone();
        let usable_budget = config.budget.token_budget.saturating_sub(config.budget.token_buffer);
        let timeout_buffer = Duration::from_millis(config.budget.timeout_buffer_ms);

        let ordered = Self::ordered(&request.issues);
        let allocations = Self::allocations(&ordered, usable_budget);
        let mut category_spent: HashMap<Category, u64> = HashMap::new();
        let mut outcome = ScheduleOutcome::default();

        info!(
            issues = ordered.len(),
            usable_budget,
            batch_size = config.budget.batch_size,
            "scheduling suggestion generation"
        );

        let batch_size = config.budget.batch_size.max(1);
        let batches: Vec<&[Issue]> = ordered.chunks(batch_size).collect();
        let total_batches = batches.len();

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let remaining_time = deadline.saturating_duration_since(Instant::now());
            if remaining_time <= timeout_buffer {
                let left = ordered.len() - outcome.attempted - outcome.skipped;
                warn!(left, "deadline buffer reached, stopping early");
                outcome
                    .warnings
                    .push(format!("deadline reached with {left} issues unprocessed"));
                outcome.skipped += left;
                break;
            }

            if outcome.tokens_spent >= usable_budget {
                let left = ordered.len() - outcome.attempted - outcome.skipped;
                warn!(left, spent = outcome.tokens_spent, "token budget exhausted, stopping early");
                outcome
                    .warnings
                    .push(format!("token budget exhausted with {left} issues unprocessed"));
                outcome.skipped += left;
                break;
            }

            // Issues whose category allocation is spent are skipped without
            // being attempted.
            let mut runnable = Vec::new();
            for issue in batch {
                let spent = category_spent.get(&issue.category).copied().unwrap_or(0);
                let allowed = allocations.get(&issue.category).copied().unwrap_or(0);
                if spent >= allowed {
                    debug!(issue_id = %issue.id, category = issue.category.as_str(), "category allocation spent, skipping");
                    outcome.skipped += 1;
                } else {
                    runnable.push(issue.clone());
                }
            }

            if runnable.is_empty() {
                continue;
            }

            let results = if config.budget.max_concurrent > 1 {
                stream::iter(runnable.iter())
                    .map(|issue| self.process_issue(issue, request))
                    .buffered(config.budget.max_concurrent)
                    .collect::<Vec<_>>()
                    .await
            } else {
                let mut results = Vec::with_capacity(runnable.len());
                for (index, issue) in runnable.iter().enumerate() {
                    results.push(self.process_issue(issue, request).await);
                    if index + 1 < runnable.len() {
                        tokio::time::sleep(self.call_delay()).await;
                    }
                }
                results
            };

            for (issue, suggestion) in runnable.iter().zip(results) {
                outcome.attempted += 1;
                outcome.tokens_spent += u64::from(suggestion.tokens_used);
                outcome.total_cost += suggestion.cost;
                *category_spent.entry(issue.category).or_default() +=
                    u64::from(suggestion.tokens_used);
                outcome.suggestions.push(suggestion);
            }

            if batch_index + 1 < total_batches {
                let delay = self.batch_delay(batch_index + 1, outcome.tokens_spent).await;
                tokio::time::sleep(delay).await;
            }
        }

        info!(
            suggestions = outcome.suggestions.len(),
            skipped = outcome.skipped,
            tokens = outcome.tokens_spent,
            "scheduling complete"
        );
        outcome
    }

    /// Output token ceiling for one issue. Higher-stakes categories get
    /// more room; a tenth of the usable budget is the hard cap so one
    /// response cannot dominate it.
    fn token_ceiling(issue: &Issue, usable_budget: u64) -> u32 {
        let by_class: u32 = match (issue.category, issue.severity.is_high_priority()) {
            (Category::Security, true) => 4_000,
            (Category::Security, false) => 3_000,
            (Category::Performance, true) => 3_500,
            (Category::Performance, false) => 2_500,
            (Category::Quality, true) => 2_500,
            (Category::Quality, false) => 1_500,
        };
        by_class.min((usable_budget / 10).max(1) as u32)
    }

    /// Generate one suggestion. Gateway failures degrade to a template
    /// fallback so the issue still gets an answer.
    async fn process_issue(&self, issue: &Issue, request: &GenerationRequest) -> Suggestion {
        let config = self.gateway.config();
        let model_id = self.pick_model(issue, request);
        let prompt = prompt::build_prompt(issue);
        let usable_budget = config.budget.token_budget.saturating_sub(config.budget.token_buffer);
        let options = GenerationOptions {
            max_tokens: Self::token_ceiling(issue, usable_budget).min(config.max_output_tokens),
            ..GenerationOptions::default()
        };

        match self.gateway.generate(issue, &model_id, &prompt, options).await {
            Ok(result) => parser::parse_suggestion(issue, &result),
            Err(error) => {
                warn!(issue_id = %issue.id, %error, "generation failed, using template fallback");
                templates::generate_with_model(issue, FALLBACK_MODEL)
            }
        }
    }

    /// Model selection order: global template mode, then the caller's
    /// explicit override, then the routing policy.
    fn pick_model(&self, issue: &Issue, request: &GenerationRequest) -> String {
        let config = self.gateway.config();
        if config.template_mode_enabled {
            return TEMPLATE_MODE.to_string();
        }
        if request.is_hybrid_mode() {
            return request.effective_model_id(&config.primary_model_id, &config.light_model_id);
        }
        match self.router.route(issue) {
            ModelRoute::Primary => config.primary_model_id.clone(),
            ModelRoute::Light => config.light_model_id.clone(),
            ModelRoute::Template => TEMPLATE_MODE.to_string(),
        }
    }

    /// Pacing between consecutive calls, scaled up as the observed failure
    /// rate climbs.
    fn call_delay(&self) -> Duration {
        let base = Duration::from_millis(self.gateway.config().budget.batch_delay_ms);
        let rate = self.gateway.failure_rate();
        let scaled = if rate == 0.0 {
            MIN_CALL_DELAY
        } else if rate > 0.5 {
            base * 2
        } else if rate > 0.25 {
            base.mul_f64(1.5)
        } else {
            base
        };
        scaled.clamp(MIN_CALL_DELAY, MAX_CALL_DELAY)
    }

    /// Pacing between batches. Grows with how far into the run we are and
    /// how many tokens it has burned, scales with the observed failure
    /// rate, and adds a cooldown while the endpoint is throttling or the
    /// breaker is not closed.
    async fn batch_delay(&self, batches_done: usize, tokens_spent: u64) -> Duration {
        let base = Duration::from_millis(self.gateway.config().budget.batch_delay_ms);
        let mut delay = base * batches_done.min(5) as u32
            + Duration::from_millis(tokens_spent / 1_000 * 500);

        let rate = self.gateway.failure_rate();
        if rate > 0.5 {
            delay *= 2;
        } else if rate > 0.25 {
            delay = delay.mul_f64(1.5);
        }
        let mut delay = delay.clamp(MIN_BATCH_DELAY, MAX_BATCH_DELAY);

        let distressed = self.gateway.throttle_count() > 2
            || self.gateway.breaker_state().await != BreakerState::Closed;
        if distressed {
            delay = (delay + DISTRESS_COOLDOWN).min(MAX_BATCH_DELAY);
        }
        delay
    }
}
