//! End-to-end scenarios (S1, S5, S6 from the offline-verifier-adjacent spec
//! properties) driven entirely through the public crate API, against a
//! scripted `Transport` so nothing here touches the network.

use std::sync::Arc;
use std::collections::HashMap;

use argus::cache::CacheStore;
use argus::errors::Result;
use argus::session::{ActivateOptions, SessionCore};
use argus::transport::{RawResponse, Transport};
use argus::{LicenseStatus, RuntimeConfig, SessionStatus};

use serde_json::json;
use tokio::sync::Mutex;

#[derive(Default)]
struct InMemoryCache {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().await.get(key).cloned())
    }
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data.lock().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().await.remove(key);
        Ok(())
    }
}

struct ScriptedTransport {
    responses: Mutex<Vec<(u16, String)>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<(u16, &str)>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|(s, b)| (s, b.to_string())).rev().collect()),
        }
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, _url: &str, _headers: &[(&str, &str)]) -> Result<RawResponse> {
        self.next().await
    }
    async fn post(&self, _url: &str, _body: &[u8], _headers: &[(&str, &str)]) -> Result<RawResponse> {
        self.next().await
    }
}

impl ScriptedTransport {
    async fn next(&self) -> Result<RawResponse> {
        let mut responses = self.responses.lock().await;
        let (status, body) = responses.pop().unwrap_or((500, "{}".to_string()));
        Ok(RawResponse { status, body: body.into_bytes() })
    }
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        api_base: "https://ex/api".to_string(),
        api_key: "test-key".to_string(),
        product_slug: "demo".to_string(),
        storage_prefix: "scenario-test:".to_string(),
        auto_validate_interval_secs: 0,
        heartbeat_interval_secs: 0,
        retry_delay_ms: 1,
        ..RuntimeConfig::default()
    }
}

async fn core_with(responses: Vec<(u16, &str)>) -> Arc<SessionCore> {
    let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCache::default());
    let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::new(responses));
    SessionCore::new(test_config(), cache, transport).await.unwrap()
}

/// S1 — happy activation: server confirms an active, pro-plan license and
/// the session reports Active status with the license's fields intact.
#[tokio::test]
async fn s1_happy_activation() {
    let activate_body = json!({
        "object": "activation",
        "license": {
            "key": "K",
            "device_id": "placeholder",
            "status": "active",
            "plan_key": "pro",
            "seat_limit": 5,
            "active_entitlements": [],
            "activated_at": "2026-01-01T00:00:00Z",
        }
    });
    let core = core_with(vec![(200, &activate_body.to_string())]).await;

    let license = core.activate("K", ActivateOptions::default(), None).await.unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
    assert_eq!(license.plan_key.as_deref(), Some("pro"));
    assert_eq!(core.get_status(), SessionStatus::Active);
    assert_eq!(core.get_current_license().unwrap().seat_limit, Some(5));
}

/// S5 — deactivating a license the server already considers revoked is
/// treated as a successful local deactivation, not an error.
#[tokio::test]
async fn s5_deactivate_with_already_gone_response() {
    let activate_body = json!({
        "object": "activation",
        "license": {
            "key": "K", "device_id": "d", "status": "active",
            "active_entitlements": [], "activated_at": "2026-01-01T00:00:00Z",
        }
    });
    let deactivate_body = json!({"error": {"code": "revoked"}});
    let core = core_with(vec![
        (200, &activate_body.to_string()),
        (422, &deactivate_body.to_string()),
    ])
    .await;

    core.activate("K", ActivateOptions::default(), None).await.unwrap();
    core.deactivate(None).await.unwrap();

    assert_eq!(core.get_status(), SessionStatus::Inactive);
    assert!(core.get_current_license().is_none());
}

/// S6 — under NetworkOnly offline fallback, a validation that fails with no
/// cached offline token returns a non-throwing failed verdict, not an error.
#[tokio::test]
async fn s6_offline_fallback_without_cached_token() {
    let activate_body = json!({
        "object": "activation",
        "license": {
            "key": "K", "device_id": "d", "status": "active",
            "active_entitlements": [], "activated_at": "2026-01-01T00:00:00Z",
        }
    });
    let core = core_with(vec![(200, &activate_body.to_string())]).await;
    core.activate("K", ActivateOptions::default(), None).await.unwrap();

    // The scripted transport has no more responses queued, so every retry
    // attempt gets a 500 and validate() falls back to the offline path with
    // no cached token available.
    let result = core.validate("K", None).await.unwrap();

    assert!(!result.valid);
    assert!(result.offline);
    assert_eq!(result.reason_code.as_deref(), Some("no_offline_token"));
}

/// reset()/purge_cached_license() are idempotent and leave the session Inactive.
#[tokio::test]
async fn purge_cached_license_is_idempotent() {
    let core = core_with(vec![]).await;
    core.purge_cached_license().await.unwrap();
    core.purge_cached_license().await.unwrap();
    assert_eq!(core.get_status(), SessionStatus::Inactive);
}

/// dispose() can be called twice without error, and rejects subsequent calls.
#[tokio::test]
async fn dispose_then_any_call_is_rejected() {
    let core = core_with(vec![]).await;
    core.dispose().await.unwrap();
    core.dispose().await.unwrap();

    let err = core.heartbeat("K", None).await.unwrap_err();
    assert_eq!(err.reason_code(), "disposed");
}
