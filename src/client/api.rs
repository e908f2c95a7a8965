//! Reqwest-backed device API adapter.
//!
//! Owns transport details only: request serialisation, timeout and HTTP
//! error mapping, and JSON decoding into domain payloads. Controllers talk
//! to the [`DeviceTransport`] trait so they stay testable without a server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use crate::domain::{
    CalibrationRecord, CurrentItem, DeviceToken, ItemId, MesaId, MesaState, PairingInitResponse,
    PairingStatusResponse,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side failure categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl ClientError {
    /// Transient failures worth retrying on the next poll tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Timeout(_) | ClientError::Transport(_))
    }
}

/// Everything the client controllers need from the server.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn init_pairing(&self, mesa: Option<MesaId>)
    -> Result<PairingInitResponse, ClientError>;
    async fn pairing_status(&self, code: &str) -> Result<PairingStatusResponse, ClientError>;
    async fn device_state(&self, token: &DeviceToken) -> Result<MesaState, ClientError>;
    async fn heartbeat(&self, token: &DeviceToken) -> Result<(), ClientError>;
    async fn set_index(&self, token: &DeviceToken, index: i32) -> Result<(), ClientError>;
    async fn mark_done(&self, token: &DeviceToken) -> Result<(), ClientError>;
    async fn current_item(&self, mesa: MesaId) -> Result<CurrentItem, ClientError>;
    async fn marcar_hecho(&self, item: ItemId) -> Result<(), ClientError>;
    async fn set_blackout(&self, mesa: MesaId, blackout: bool) -> Result<(), ClientError>;
    async fn save_calibration(
        &self,
        mesa: MesaId,
        record: &CalibrationRecord,
    ) -> Result<(), ClientError>;
}

/// HTTP implementation of [`DeviceTransport`].
pub struct DeviceApi {
    client: Client,
    base: Url,
}

impl DeviceApi {
    /// Build an adapter with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(base: Url) -> Result<Self, reqwest::Error> {
        Self::with_timeout(base, DEFAULT_REQUEST_TIMEOUT)
    }

    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn with_timeout(base: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    /// Absolute URL for a path under the API base.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidRequest`] when the joined path is not a valid
    /// URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|error| ClientError::InvalidRequest(format!("bad endpoint {path}: {error}")))
    }

    async fn decode_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref()));
        }
        serde_json::from_slice(body.as_ref())
            .map_err(|error| ClientError::Decode(format!("invalid JSON payload: {error}")))
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await.map_err(map_transport_error)?;
        Err(map_status_error(status, body.as_ref()))
    }

    fn bearer(token: &DeviceToken) -> String {
        format!("Bearer {}", token.as_str())
    }
}

#[async_trait]
impl DeviceTransport for DeviceApi {
    async fn init_pairing(
        &self,
        mesa: Option<MesaId>,
    ) -> Result<PairingInitResponse, ClientError> {
        let response = self
            .client
            .post(self.endpoint("device/init/")?)
            .json(&json!({ "mesa_id": mesa }))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::decode_response(response).await
    }

    async fn pairing_status(&self, code: &str) -> Result<PairingStatusResponse, ClientError> {
        let response = self
            .client
            .get(self.endpoint("device/status/")?)
            .query(&[("code", code)])
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::decode_response(response).await
    }

    async fn device_state(&self, token: &DeviceToken) -> Result<MesaState, ClientError> {
        let response = self
            .client
            .get(self.endpoint("device/state/")?)
            .header(reqwest::header::AUTHORIZATION, Self::bearer(token))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::decode_response(response).await
    }

    async fn heartbeat(&self, token: &DeviceToken) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint("device/heartbeat/")?)
            .header(reqwest::header::AUTHORIZATION, Self::bearer(token))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }

    async fn set_index(&self, token: &DeviceToken, index: i32) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint("device/set_index/")?)
            .header(reqwest::header::AUTHORIZATION, Self::bearer(token))
            .json(&json!({ "index": index }))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }

    async fn mark_done(&self, token: &DeviceToken) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint("device/mark_done/")?)
            .header(reqwest::header::AUTHORIZATION, Self::bearer(token))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }

    async fn current_item(&self, mesa: MesaId) -> Result<CurrentItem, ClientError> {
        let response = self
            .client
            .get(self.endpoint(&format!("mesas/{mesa}/current_item/"))?)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::decode_response(response).await
    }

    async fn marcar_hecho(&self, item: ItemId) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint(&format!("mesa-queue-items/{item}/marcar_hecho/"))?)
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }

    async fn set_blackout(&self, mesa: MesaId, blackout: bool) -> Result<(), ClientError> {
        let response = self
            .client
            .patch(self.endpoint(&format!("mesas/{mesa}/"))?)
            .json(&json!({ "blackout": blackout }))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }

    async fn save_calibration(
        &self,
        mesa: MesaId,
        record: &CalibrationRecord,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint(&format!("mesas/{mesa}/calibration/"))?)
            .json(&json!({ "calibration_json": record }))
            .send()
            .await
            .map_err(map_transport_error)?;
        Self::expect_success(response).await
    }
}

fn map_transport_error(error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout(error.to_string())
    } else {
        ClientError::Transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> ClientError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), preview)
    };

    match status {
        StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::CONFLICT => ClientError::Conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ClientError::Timeout(message),
        _ if status.is_client_error() => ClientError::InvalidRequest(message),
        _ => ClientError::Transport(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
