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

//! Transport seam for the generation endpoint. The gateway speaks to this
//! trait only, which keeps retries, breaking and accounting testable with
//! an in-process fake.

use async_trait::async_trait;
use remedy_contracts::{GatewayError, GatewayResult};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Send one inference payload to `model_id` and return the raw response
    /// body. Transport and status problems map onto `GatewayError` so the
    /// gateway can classify them for retry.
    async fn invoke(&self, model_id: &str, payload: &Value) -> GatewayResult<Value>;
}

#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(region: &str, api_key: Option<String>, timeout_seconds: u64) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("https://bedrock-runtime.{region}.amazonaws.com"),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn invoke_url(&self, model_id: &str) -> String {
        format!("{}/model/{model_id}/invoke", self.base_url)
    }

    fn classify_status(status: StatusCode, body: String) -> GatewayError {
        match status.as_u16() {
            429 => GatewayError::Throttled,
            408 | 504 => GatewayError::ModelTimeout,
            code => GatewayError::Service {
                status: code,
                message: body,
            },
        }
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn invoke(&self, model_id: &str, payload: &Value) -> GatewayResult<Value> {
        debug!(model_id, "invoking generation endpoint");

        let mut request = self
            .client
            .post(self.invoke_url(model_id))
            .header("content-type", "application/json")
            .json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::ModelTimeout
            } else {
                GatewayError::Network(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("malformed response body: {e}")))
    }
}
