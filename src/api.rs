//! API Adapter (§4.3): URL construction, retry with exponential backoff,
//! response-to-taxonomy error mapping, and online/offline inference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::errors::{ApiError, Error, Result};
use crate::events::{topics, EventBus};
use crate::model::{License, OfflineToken, PublicKey};
use crate::transport::Transport;

/// Statuses the adapter retries: network failures plus the classic
/// overload/unavailable family.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 0 | 408 | 429 | 502 | 503 | 504)
}

#[derive(Debug, Serialize)]
struct ActivateRequest<'a> {
    device_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateResponse {
    pub object: String,
    pub license: License,
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    device_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateResponse {
    pub object: String,
    pub valid: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
    #[serde(default)]
    pub license: Option<License>,
}

#[derive(Debug, Serialize)]
struct DeviceOnlyRequest<'a> {
    device_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateResponse {
    pub object: String,
    #[serde(default)]
    pub activation_id: Option<String>,
    pub deactivated_at: String,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    device_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatResponse {
    pub object: String,
    pub received_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SigningKeyResponse {
    pub object: String,
    pub key_id: String,
    pub algorithm: String,
    pub public_key: String,
    pub status: String,
}

impl From<SigningKeyResponse> for PublicKey {
    fn from(r: SigningKeyResponse) -> Self {
        PublicKey { key_id: r.key_id, public_key: r.public_key, algorithm: r.algorithm }
    }
}

/// Talks to the licensing service. Owns retry policy and network-status
/// inference; the Session Core consumes typed results only.
pub struct ApiAdapter {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: String,
    product_slug: String,
    max_retries: u32,
    retry_delay: Duration,
    events: Arc<EventBus>,
    online: AtomicBool,
}

impl ApiAdapter {
    pub fn new(config: &RuntimeConfig, transport: Arc<dyn Transport>, events: Arc<EventBus>) -> Self {
        Self {
            transport,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            product_slug: config.product_slug.clone(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            events,
            online: AtomicBool::new(true),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn license_path(&self, license_key: &str, action: &str) -> String {
        format!("products/{}/licenses/{}/{}", self.product_slug, license_key, action)
    }

    pub async fn activate(
        &self,
        license_key: &str,
        device_id: &str,
        device_name: Option<&str>,
        metadata: Option<Value>,
        telemetry: Option<Value>,
    ) -> Result<ActivateResponse> {
        let body = ActivateRequest { device_id, device_name, metadata, telemetry };
        let url = self.url(&self.license_path(license_key, "activate"));
        self.post_json(&url, &body).await
    }

    pub async fn validate(
        &self,
        license_key: &str,
        device_id: &str,
        telemetry: Option<Value>,
    ) -> Result<ValidateResponse> {
        let body = ValidateRequest { device_id, telemetry };
        let url = self.url(&self.license_path(license_key, "validate"));
        self.post_json(&url, &body).await
    }

    pub async fn deactivate(&self, license_key: &str, device_id: &str) -> Result<DeactivateResponse> {
        let body = DeviceOnlyRequest { device_id };
        let url = self.url(&self.license_path(license_key, "deactivate"));
        self.post_json(&url, &body).await
    }

    pub async fn heartbeat(
        &self,
        license_key: &str,
        device_id: &str,
        telemetry: Option<Value>,
    ) -> Result<HeartbeatResponse> {
        let body = HeartbeatRequest { device_id, telemetry };
        let url = self.url(&self.license_path(license_key, "heartbeat"));
        self.post_json(&url, &body).await
    }

    pub async fn fetch_offline_token(&self, license_key: &str, device_id: &str) -> Result<OfflineToken> {
        let body = DeviceOnlyRequest { device_id };
        let url = self.url(&self.license_path(license_key, "offline_token"));
        self.post_json(&url, &body).await
    }

    pub async fn fetch_signing_key(&self, key_id: &str) -> Result<SigningKeyResponse> {
        let url = self.url(&format!("signing_keys/{key_id}"));
        self.get_json(&url).await
    }

    /// `GET /health` using the configured credentials; true on any 2xx.
    pub async fn test_auth(&self) -> Result<bool> {
        let url = self.url("health");
        match self.send_with_retry(&url, None).await {
            Ok(_) => Ok(true),
            Err(Error::Api(ApiError::ClientError { status_code: 401, .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(&self, url: &str, body: &B) -> Result<T> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ApiError::DecodingError { message: e.to_string() })?;
        let raw = self.send_with_retry(url, Some(payload)).await?;
        serde_json::from_slice(&raw)
            .map_err(|e| ApiError::DecodingError { message: e.to_string() }.into())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let raw = self.send_with_retry(url, None).await?;
        serde_json::from_slice(&raw)
            .map_err(|e| ApiError::DecodingError { message: e.to_string() }.into())
    }

    /// Send one logical request, retrying on a retryable classification.
    /// Returns the raw success body; emits `network:{online,offline}` on
    /// status transitions. Every request carries the configured API key as
    /// a bearer token plus an explicit JSON `Accept`.
    async fn send_with_retry(&self, url: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let attempts = 1 + self.max_retries;
        let mut last_err: Option<Error> = None;
        let auth = self.auth_header_value();
        let headers: [(&str, &str); 2] = [("Authorization", &auth), ("Accept", "application/json")];

        for attempt in 0..attempts {
            let outcome = match &body {
                Some(body) => self.transport.post(url, body, &headers).await,
                None => self.transport.get(url, &headers).await,
            };

            match outcome {
                Ok(response) if (200..300).contains(&response.status) => {
                    self.note_online(true);
                    return Ok(response.body);
                }
                Ok(response) => {
                    let error = classify(response.status, &response.body);
                    let retryable = is_retryable_status(response.status);
                    if retryable && attempt + 1 < attempts {
                        last_err = Some(error);
                        tokio::time::sleep(self.retry_delay * 2u32.pow(attempt)).await;
                        continue;
                    }
                    if !retryable {
                        self.note_online(true);
                    }
                    return Err(error);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    if retryable && attempt + 1 < attempts {
                        last_err = Some(e);
                        tokio::time::sleep(self.retry_delay * 2u32.pow(attempt)).await;
                        continue;
                    }
                    if retryable {
                        self.note_online(false);
                    }
                    return Err(e);
                }
            }
        }

        Err(last_err.unwrap_or(Error::Api(ApiError::NetworkError {
            message: "retry budget exhausted".to_string(),
        })))
    }

    fn note_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::Relaxed);
        if previous != online {
            let topic = if online { topics::NETWORK_ONLINE } else { topics::NETWORK_OFFLINE };
            self.events.emit_unit(topic);
        }
    }

    pub fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

/// Map a non-2xx response to the ApiError taxonomy (§4.3).
fn classify(status: u16, body: &[u8]) -> Error {
    let (code, message) = parse_error_body(body);
    let response_body = std::str::from_utf8(body).ok().map(|s| s.to_string());
    let error = if status == 0 {
        ApiError::NetworkError { message }
    } else if (400..500).contains(&status) {
        ApiError::ClientError { status_code: status, code, message, response_body }
    } else {
        ApiError::ServerError { status_code: status, code, message, response_body }
    };
    Error::Api(error)
}

/// Parse the documented 4xx/5xx error body conventions:
/// `{error:{code,message}}` or a top-level `error`/`reason_code` string.
fn parse_error_body(body: &[u8]) -> (Option<String>, String) {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => return (None, "request failed".to_string()),
    };

    if let Some(error) = value.get("error") {
        if let Some(obj) = error.as_object() {
            let code = obj.get("code").and_then(Value::as_str).map(str::to_string);
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "request failed".to_string());
            return (code, message);
        }
        if let Some(message) = error.as_str() {
            return (None, message.to_string());
        }
    }

    let code = value.get("reason_code").and_then(Value::as_str).map(str::to_string);
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "request failed".to_string());
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_error_object() {
        let body = br#"{"error":{"code":"revoked","message":"license revoked"}}"#;
        let (code, message) = parse_error_body(body);
        assert_eq!(code.as_deref(), Some("revoked"));
        assert_eq!(message, "license revoked");
    }

    #[test]
    fn parses_top_level_reason_code() {
        let body = br#"{"reason_code":"not_found","message":"no such license"}"#;
        let (code, message) = parse_error_body(body);
        assert_eq!(code.as_deref(), Some("not_found"));
        assert_eq!(message, "no such license");
    }

    #[test]
    fn falls_back_when_body_is_not_json() {
        let (code, message) = parse_error_body(b"not json");
        assert_eq!(code, None);
        assert_eq!(message, "request failed");
    }

    #[test]
    fn classify_maps_status_ranges() {
        assert!(matches!(classify(0, b"{}"), Error::Api(ApiError::NetworkError { .. })));
        assert!(matches!(classify(422, b"{}"), Error::Api(ApiError::ClientError { .. })));
        assert!(matches!(classify(503, b"{}"), Error::Api(ApiError::ServerError { .. })));
    }

    #[test]
    fn retryable_statuses_match_spec_set() {
        for status in [0, 408, 429, 502, 503, 504] {
            assert!(is_retryable_status(status));
        }
        for status in [200, 400, 401, 404, 422, 500] {
            assert!(!is_retryable_status(status));
        }
    }
}
