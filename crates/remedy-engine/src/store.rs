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

//! Persistence seam. The handler treats storage as best-effort: failures
//! are logged and surfaced as warnings, never as request failures.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use remedy_contracts::Suggestion;
use serde::{Deserialize, Serialize};

/// Retention period for stored suggestion records.
const RECORD_TTL_DAYS: i64 = 7;

/// Coarse progress percentage reported for a processing status. Unknown
/// statuses land mid-range rather than erroring.
pub fn progress_percentage(status: &str) -> u8 {
    match status {
        "started" => 70,
        "in_progress" => 80,
        "complete" | "completed" => 100,
        _ => 75,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRecord {
    pub session_id: String,
    pub analysis_id: String,
    pub suggestions: Vec<Suggestion>,
    pub stored_at: i64,
    /// Unix epoch seconds after which the record may be reaped.
    pub expires_at: i64,
}

impl SuggestionRecord {
    pub fn new(session_id: &str, analysis_id: &str, suggestions: Vec<Suggestion>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            analysis_id: analysis_id.to_string(),
            suggestions,
            stored_at: now.timestamp(),
            expires_at: (now + Duration::days(RECORD_TTL_DAYS)).timestamp(),
        }
    }
}

#[async_trait]
pub trait SuggestionStore: Send + Sync {
    async fn save_suggestions(
        &self,
        session_id: &str,
        analysis_id: &str,
        suggestions: &[Suggestion],
    ) -> Result<()>;

    async fn update_progress(
        &self,
        session_id: &str,
        analysis_id: &str,
        status: &str,
        suggestion_count: usize,
    ) -> Result<()>;
}

/// Map-backed store used in tests and local runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEntry {
    pub percentage: u8,
    pub suggestion_count: usize,
}

#[derive(Debug, Default)]
pub struct InMemorySuggestionStore {
    records: DashMap<String, SuggestionRecord>,
    progress: DashMap<String, ProgressEntry>,
}

impl InMemorySuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(session_id: &str, analysis_id: &str) -> String {
        format!("{session_id}#{analysis_id}")
    }

    pub fn record(&self, session_id: &str, analysis_id: &str) -> Option<SuggestionRecord> {
        self.records
            .get(&Self::key(session_id, analysis_id))
            .map(|r| r.clone())
    }

    pub fn progress(&self, session_id: &str, analysis_id: &str) -> Option<ProgressEntry> {
        self.progress
            .get(&Self::key(session_id, analysis_id))
            .map(|p| *p)
    }
}

#[async_trait]
impl SuggestionStore for InMemorySuggestionStore {
    async fn save_suggestions(
        &self,
        session_id: &str,
        analysis_id: &str,
        suggestions: &[Suggestion],
    ) -> Result<()> {
        let record = SuggestionRecord::new(session_id, analysis_id, suggestions.to_vec());
        self.records
            .insert(Self::key(session_id, analysis_id), record);
        Ok(())
    }

    async fn update_progress(
        &self,
        session_id: &str,
        analysis_id: &str,
        status: &str,
        suggestion_count: usize,
    ) -> Result<()> {
        self.progress.insert(
            Self::key(session_id, analysis_id),
            ProgressEntry {
                percentage: progress_percentage(status),
                suggestion_count,
            },
        );
        Ok(())
    }
}
