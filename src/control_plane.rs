// ABOUTME: REST side-channel to the control plane for API key validation and redundant heartbeats
// ABOUTME: Independent of the tunnel so either path keeps working when the other fails
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::control_plane::{REQUEST_TIMEOUT_SECS, VALIDATE_API_KEY_PATH};
use crate::errors::{AppError, AppResult};
use crate::tunnel::protocol::HeartbeatPayload;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const SERVICE: &str = "Control plane";

/// Response of the key validation endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValidationResponse {
    /// Whether the key is known and active
    pub valid: bool,
    /// Tenant owning the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Connector registered for the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    /// Reason when invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateKeyRequest<'a> {
    api_key: &'a str,
}

/// REST calls the agent makes outside the tunnel
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Confirm the key is known and active
    async fn validate_api_key(&self, api_key: &str) -> AppResult<KeyValidationResponse>;

    /// Deliver a heartbeat over HTTP
    async fn send_heartbeat(
        &self,
        connector_id: &str,
        api_key: &str,
        payload: &HeartbeatPayload,
    ) -> AppResult<()>;
}

/// `reqwest` implementation of [`ControlPlane`]
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: Url,
}

impl HttpControlPlane {
    /// Client for a control plane base URL
    ///
    /// # Errors
    ///
    /// Returns an internal error if the HTTP client cannot be built
    pub fn new(base_url: Url) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::config(format!("Invalid control plane path {path}: {e}")))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn validate_api_key(&self, api_key: &str) -> AppResult<KeyValidationResponse> {
        let url = self.endpoint(VALIDATE_API_KEY_PATH)?;
        let response = self
            .client
            .post(url)
            .json(&ValidateKeyRequest { api_key })
            .send()
            .await
            .map_err(|e| AppError::connection(format!("{SERVICE} unreachable: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(KeyValidationResponse {
                valid: false,
                message: Some(format!("API key rejected by control plane ({status})")),
                ..KeyValidationResponse::default()
            });
        }
        if !status.is_success() {
            return Err(AppError::external_service(
                SERVICE,
                format!("key validation returned {status}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::external_service(SERVICE, format!("JSON parse error: {e}")))
    }

    async fn send_heartbeat(
        &self,
        connector_id: &str,
        api_key: &str,
        payload: &HeartbeatPayload,
    ) -> AppResult<()> {
        let url = self.endpoint(&format!("/api/connectors/{connector_id}/heartbeat"))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::external_service(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external_service(
                SERVICE,
                format!("heartbeat returned {status}"),
            ));
        }
        debug!(connector_id, "Heartbeat delivered over HTTP");
        Ok(())
    }
}
