//! HTTP transport capability (§4.3, §9): a two-method interface the API
//! Adapter is generic over. Transports never raise on non-2xx — status
//! classification happens one layer up, in the adapter.

use std::time::Duration;

use crate::errors::{ApiError, Result};

/// Raw HTTP response: status code plus body bytes, pre-classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// The two-method capability the API Adapter consumes. `headers` carries
/// caller-supplied header name/value pairs (e.g. `Authorization`, `Accept`)
/// layered on top of whatever the transport sets by default.
///
/// Implemented by the platform-default transport (`ReqwestTransport`) and,
/// in tests, by mocks that never touch the network.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse>;
    async fn post(&self, url: &str, body: &[u8], headers: &[(&str, &str)]) -> Result<RawResponse>;
}

/// Default transport: a single reused `reqwest::Client` with a fixed timeout,
/// matching the donor's `http_client()` builder.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder should not fail on a static config");
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::NetworkError { message: e.to_string() })?;
        to_raw(response).await
    }

    async fn post(&self, url: &str, body: &[u8], headers: &[(&str, &str)]) -> Result<RawResponse> {
        let mut request = self.client.post(url).header("Content-Type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| ApiError::NetworkError { message: e.to_string() })?;
        to_raw(response).await
    }
}

async fn to_raw(response: reqwest::Response) -> Result<RawResponse> {
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| ApiError::NetworkError { message: e.to_string() })?
        .to_vec();
    Ok(RawResponse { status, body })
}
