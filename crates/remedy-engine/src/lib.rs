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

//! Orchestration engine that turns static-analysis findings into structured
//! remediation suggestions by driving a generative model endpoint through a
//! resilience gateway (retries, rate limiting, circuit breaking), a hybrid
//! routing policy and a budget-aware scheduler.

pub mod client;
pub mod config;
pub mod estimator;
pub mod gateway;
pub mod handler;
pub mod parser;
pub mod prompt;
pub mod routing;
pub mod scheduler;
pub mod store;
pub mod templates;

pub use client::{GenerationClient, HttpGenerationClient};
pub use gateway::{Gateway, GatewayMetricsSnapshot, ModelCallStats};
pub use handler::SuggestionHandler;
pub use routing::{ModelRoute, Router};
pub use scheduler::Scheduler;
pub use store::{InMemorySuggestionStore, SuggestionStore};
