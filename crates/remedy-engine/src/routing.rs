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

//! Hybrid routing policy. Each issue is hashed into a 0..100 bucket and the
//! bucket decides which tier serves it. The hash is a hand-rolled FNV-1a so
//! the same issue lands on the same tier across processes and releases,
//! which `std::collections::hash_map::DefaultHasher` does not guarantee.

use remedy_contracts::{Category, Issue, RoutingConfig, Severity};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRoute {
    /// Full-capability model, reserved for the highest-stakes findings.
    Primary,
    /// Lightweight model, the default tier.
    Light,
    /// Offline template generator, no network call at all.
    Template,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(key: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    config: RoutingConfig,
}

impl Router {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    /// Deterministic 0..100 bucket for an issue.
    pub fn bucket(issue: &Issue) -> u8 {
        (fnv1a(&issue.routing_key()) % 100) as u8
    }

    /// Pick the serving tier for an issue. Critical security findings get a
    /// chance at the primary model; everything else splits between the
    /// light model and templates, with the light model absorbing the
    /// remainder so no bucket is left unserved.
    pub fn route(&self, issue: &Issue) -> ModelRoute {
        let bucket = Self::bucket(issue);

        let route = if issue.severity == Severity::Critical && issue.category == Category::Security
        {
            if bucket < self.config.premier_pct {
                ModelRoute::Primary
            } else {
                ModelRoute::Light
            }
        } else if bucket < self.config.light_pct {
            ModelRoute::Light
        } else if bucket < self.config.light_pct.saturating_add(self.config.template_pct) {
            ModelRoute::Template
        } else {
            ModelRoute::Light
        };

        debug!(
            issue_id = %issue.id,
            bucket,
            route = ?route,
            "routed issue"
        );
        route
    }
}
