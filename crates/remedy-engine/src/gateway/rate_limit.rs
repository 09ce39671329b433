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

//! Client-side rate limiter in front of the generation endpoint. Two
//! constraints apply together: a sliding window capping recent calls
//! overall, and a minimum spacing between calls sharing a caller key.
//! Waiting is a plain loop; each pass recomputes the required delay from
//! current state, so the limiter never recurses and never oversleeps a
//! stale estimate.

use remedy_contracts::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Span of the sliding window.
const WINDOW_SPAN: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct LimiterState {
    window: VecDeque<Instant>,
    last_call: HashMap<String, Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                window: VecDeque::new(),
                last_call: HashMap::new(),
            }),
        }
    }

    /// Block until a call slot is available for `caller_key`, then claim it.
    pub async fn acquire(&self, caller_key: &str) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                while let Some(oldest) = state.window.front() {
                    if now.duration_since(*oldest) >= WINDOW_SPAN {
                        state.window.pop_front();
                    } else {
                        break;
                    }
                }

                let window_wait = if state.window.len() >= self.config.window_size {
                    let oldest = *state.window.front().unwrap_or(&now);
                    Some(WINDOW_SPAN.saturating_sub(now.duration_since(oldest)))
                } else {
                    None
                };

                let min_interval = Duration::from_millis(self.config.min_call_interval_ms);
                let spacing_wait = state.last_call.get(caller_key).and_then(|last| {
                    let elapsed = now.duration_since(*last);
                    if elapsed < min_interval {
                        Some(min_interval - elapsed)
                    } else {
                        None
                    }
                });

                match (window_wait, spacing_wait) {
                    (None, None) => {
                        state.window.push_back(now);
                        state.last_call.insert(caller_key.to_string(), now);
                        return;
                    }
                    (a, b) => a.into_iter().chain(b).max().unwrap_or(Duration::ZERO),
                }
            };

            debug!(caller_key, wait_ms = wait.as_millis() as u64, "rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls currently inside the sliding window.
    pub async fn window_len(&self) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .window
            .iter()
            .filter(|t| now.duration_since(**t) < WINDOW_SPAN)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_immediate() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Instant::now();
        limiter.acquire("model-a").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.window_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_calls_are_spaced() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Instant::now();
        limiter.acquire("model-a").await;
        limiter.acquire("model-a").await;
        assert!(start.elapsed() >= Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_are_not_spaced() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Instant::now();
        limiter.acquire("model-a").await;
        limiter.acquire("model-b").await;
        assert!(start.elapsed() < Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn full_window_forces_a_wait() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_size: 3,
            min_call_interval_ms: 0,
        });
        let start = Instant::now();
        for i in 0..3 {
            limiter.acquire(&format!("key-{i}")).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire("key-overflow").await;
        assert!(start.elapsed() >= WINDOW_SPAN);
    }
}
