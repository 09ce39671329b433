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

//! Circuit breaker guarding the generation endpoint. Consecutive failures
//! trip it open; after the reset timeout a single probe is let through in
//! half-open, and any success anywhere fully closes it again.

use remedy_contracts::{BreakerConfig, GatewayError, GatewayResult};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: RwLock<Inner>,
    failure_count: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicU32::new(0),
        }
    }

    /// Gate a call. In the open state this rejects with the time remaining
    /// until the next probe; once the reset timeout has elapsed it flips to
    /// half-open and lets the call through.
    pub async fn check(&self) -> GatewayResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let state = self.inner.read().await.state;
        if state != BreakerState::Open {
            return Ok(());
        }

        let mut inner = self.inner.write().await;
        // Re-read under the write lock; another task may have probed first.
        if inner.state != BreakerState::Open {
            return Ok(());
        }

        let elapsed_ms = inner
            .opened_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(u64::MAX);

        if elapsed_ms >= self.config.reset_timeout_ms {
            info!(breaker = %self.name, "circuit breaker half-open, allowing probe");
            inner.state = BreakerState::HalfOpen;
            Ok(())
        } else {
            Err(GatewayError::CircuitOpen {
                remaining_ms: self.config.reset_timeout_ms - elapsed_ms,
            })
        }
    }

    /// Any success closes the breaker and clears the failure count.
    pub async fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        if inner.state != BreakerState::Closed {
            info!(breaker = %self.name, "circuit breaker closing after success");
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
        }
    }

    pub async fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, circuit breaker re-opening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed if failures >= self.config.failure_threshold => {
                warn!(
                    breaker = %self.name,
                    failures,
                    "failure threshold reached, circuit breaker opening"
                );
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}
