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

use rand::Rng;
use remedy_contracts::RetryConfig;
use std::time::Duration;

/// Exponential backoff with jitter. Attempt numbering starts at 1; the
/// jitter adds up to 25% of the capped delay so concurrent retries fan out
/// instead of thundering back together.
pub fn delay_for_attempt(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let base = config
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    Duration::from_millis(base + (base as f64 * jitter) as u64)
}
