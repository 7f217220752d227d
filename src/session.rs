//! Session Core (§4.1): the public orchestrator. Composes the Cache Store,
//! API Adapter, Offline Verifier, Scheduler and Event Bus into the
//! activate/validate/deactivate/heartbeat lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::api::ApiAdapter;
use crate::cache::{self, CacheStore, FileCacheStore};
use crate::cancel::CancelToken;
use crate::config::RuntimeConfig;
use crate::device_id;
use crate::encryption;
use crate::errors::{ApiError, Error, LicenseError, Result};
use crate::events::{topics, EventBus};
use crate::model::{
    ClockAnchor, EntitlementStatus, License, LicenseStatus, OfflineToken, PublicKey, SessionStatus,
    ValidationResult,
};
use crate::scheduler::Scheduler;
use crate::telemetry::{self, TelemetryHostInfo};
use crate::transport::{ReqwestTransport, Transport};
use crate::verifier::{self, VerifyInputs};

/// Caller-supplied extras for `activate`.
#[derive(Debug, Default, Clone)]
pub struct ActivateOptions {
    pub device_name: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Default)]
struct SessionState {
    license: Option<License>,
    offline_token: Option<OfflineToken>,
    public_keys: HashMap<String, PublicKey>,
    clock_anchor: Option<ClockAnchor>,
}

/// The licensing runtime's main entry point. Construct via [`SessionCore::configure`]
/// (file-backed cache, `reqwest` transport) or [`SessionCore::new`] (custom
/// cache/transport, e.g. for tests).
pub struct SessionCore {
    config: RuntimeConfig,
    cache: Arc<dyn CacheStore>,
    api: Arc<ApiAdapter>,
    scheduler: Arc<Scheduler>,
    events: Arc<EventBus>,
    device_id: String,
    state: RwLock<SessionState>,
    op_lock: AsyncMutex<()>,
    disposed: AtomicBool,
    self_weak: Weak<SessionCore>,
}

impl SessionCore {
    /// Build a runtime with the default file-backed cache and `reqwest` transport.
    pub async fn configure(config: RuntimeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let device_id = config.device_id_override.clone().unwrap_or_else(device_id::default_device_id);
        let encryption_key = derive_cache_key(&device_id);
        let cache: Arc<dyn CacheStore> = Arc::new(FileCacheStore::new(&config.storage_prefix, encryption_key)?);
        let transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs)));
        Self::new(config, cache, transport).await
    }

    /// Build a runtime with caller-supplied cache and transport implementations.
    pub async fn new(
        config: RuntimeConfig,
        cache: Arc<dyn CacheStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let device_id = config.device_id_override.clone().unwrap_or_else(device_id::default_device_id);
        let events = Arc::new(EventBus::new());
        let api = Arc::new(ApiAdapter::new(&config, transport, events.clone()));
        let scheduler = Arc::new(Scheduler::new());

        let core = Arc::new_cyclic(|weak| SessionCore {
            config,
            cache,
            api,
            scheduler,
            events,
            device_id,
            state: RwLock::new(SessionState::default()),
            op_lock: AsyncMutex::new(()),
            disposed: AtomicBool::new(false),
            self_weak: weak.clone(),
        });

        core.register_network_handlers();
        core.initialize().await?;
        Ok(core)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // ---- Public API surface (§4.1) -----------------------------------

    pub async fn activate(
        &self,
        license_key: &str,
        options: ActivateOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<License> {
        self.ensure_not_disposed()?;
        run_cancellable(self.activate_inner(license_key, options), cancel).await
    }

    pub async fn validate(&self, license_key: &str, cancel: Option<&CancelToken>) -> Result<ValidationResult> {
        self.ensure_not_disposed()?;
        run_cancellable(self.validate_inner(license_key), cancel).await
    }

    pub async fn deactivate(&self, cancel: Option<&CancelToken>) -> Result<()> {
        self.ensure_not_disposed()?;
        run_cancellable(self.deactivate_inner(), cancel).await
    }

    pub async fn heartbeat(&self, license_key: &str, cancel: Option<&CancelToken>) -> Result<()> {
        self.ensure_not_disposed()?;
        run_cancellable(self.heartbeat_inner(license_key), cancel).await
    }

    pub fn get_status(&self) -> SessionStatus {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        match &state.license {
            None => SessionStatus::Inactive,
            Some(license) => match &license.validation {
                None => SessionStatus::Pending,
                Some(v) if v.valid && !v.offline => SessionStatus::Active,
                Some(v) if v.valid && v.offline => SessionStatus::OfflineValid,
                Some(v) if !v.valid && v.offline => SessionStatus::OfflineInvalid,
                Some(_) => SessionStatus::Invalid,
            },
        }
    }

    pub fn get_current_license(&self) -> Option<License> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).license.clone()
    }

    pub fn check_entitlement(&self, key: &str) -> EntitlementStatus {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let Some(license) = &state.license else {
            return EntitlementStatus::NoLicense;
        };
        let Some(validation) = &license.validation else {
            return EntitlementStatus::NotFound;
        };
        let Some(entitlements) = &validation.active_entitlements else {
            return EntitlementStatus::NotFound;
        };
        match entitlements.iter().find(|e| e.key == key) {
            None => EntitlementStatus::NotFound,
            Some(e) if e.is_expired(Utc::now()) => EntitlementStatus::Expired,
            Some(_) => EntitlementStatus::Active,
        }
    }

    pub fn has_entitlement(&self, key: &str) -> bool {
        matches!(self.check_entitlement(key), EntitlementStatus::Active)
    }

    pub async fn reset(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        let _guard = self.op_lock.lock().await;
        self.clear_local_state().await?;
        self.events.emit_unit(topics::SDK_RESET);
        Ok(())
    }

    pub async fn purge_cached_license(&self) -> Result<()> {
        self.reset().await
    }

    pub async fn test_auth(&self) -> Result<bool> {
        self.ensure_not_disposed()?;
        self.events.emit_unit(topics::AUTH_TEST_START);
        match self.api.test_auth().await {
            Ok(ok) => {
                self.events.emit_unit(topics::AUTH_TEST_SUCCESS);
                Ok(ok)
            }
            Err(e) => {
                self.events.emit_unit(topics::AUTH_TEST_ERROR);
                Err(e)
            }
        }
    }

    /// Stop both cycles, cancel background work, release the event bus.
    /// Idempotent: a second call is a no-op and does not re-emit `sdk:destroyed`.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.stop_all().await;
        self.events.emit_unit(topics::SDK_DESTROYED);
        self.events.clear(None);
        Ok(())
    }

    // ---- Internals -----------------------------------------------------

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.config.storage_prefix, key)
    }

    fn telemetry_value(&self) -> Option<Value> {
        if !self.config.telemetry_enabled {
            return None;
        }
        let envelope = telemetry::build_envelope(&TelemetryHostInfo::default());
        serde_json::to_value(envelope).ok()
    }

    /// Stop both cycles on `network:offline`, restart them against the
    /// currently-known license key on `network:online`. Registered once,
    /// at construction, so cycles recover across transitions with no lost
    /// wakeups regardless of when activation happens.
    fn register_network_handlers(&self) {
        let weak = self.self_weak.clone();
        self.events.on(
            topics::NETWORK_OFFLINE,
            Arc::new(move |_payload| {
                let weak = weak.clone();
                tokio::spawn(async move {
                    if let Some(core) = weak.upgrade() {
                        core.scheduler.stop_all().await;
                    }
                });
            }),
        );

        let weak = self.self_weak.clone();
        self.events.on(
            topics::NETWORK_ONLINE,
            Arc::new(move |_payload| {
                let weak = weak.clone();
                tokio::spawn(async move {
                    if let Some(core) = weak.upgrade() {
                        let key = core.state.read().unwrap_or_else(|e| e.into_inner()).license.as_ref().map(|l| l.key.clone());
                        if let Some(key) = key {
                            core.start_cycles(key).await;
                        }
                    }
                });
            }),
        );
    }

    async fn initialize(&self) -> Result<()> {
        self.cache.set(&self.prefixed(cache::KEY_DEVICE_ID), self.device_id.as_bytes()).await?;

        let Some(bytes) = self.cache.get(&self.prefixed(cache::KEY_LICENSE)).await? else {
            return Ok(());
        };
        let license: License = serde_json::from_slice(&bytes)?;
        let key = license.key.clone();
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.license = Some(license);
        }
        self.load_offline_artifacts().await?;
        self.events.emit_unit(topics::LICENSE_LOADED);
        self.start_cycles(key.clone()).await;

        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            if let Some(core) = weak.upgrade() {
                if let Err(e) = core.validate(&key, None).await {
                    if matches!(
                        &e,
                        Error::Api(ApiError::ClientError { status_code: 401 | 501, .. })
                    ) {
                        core.events.emit_unit(topics::VALIDATION_AUTH_FAILED);
                    }
                }
            }
        });
        Ok(())
    }

    async fn load_offline_artifacts(&self) -> Result<()> {
        if let Some(bytes) = self.cache.get(&self.prefixed(cache::KEY_OFFLINE_TOKEN)).await? {
            let token: OfflineToken = serde_json::from_slice(&bytes)?;
            let key_id = token_key_id(&token);
            {
                let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                state.offline_token = Some(token);
            }
            if let Some(pk_bytes) =
                self.cache.get(&self.prefixed(&cache::public_key_entry(&key_id))).await?
            {
                let pk: PublicKey = serde_json::from_slice(&pk_bytes)?;
                self.state.write().unwrap_or_else(|e| e.into_inner()).public_keys.insert(key_id, pk);
            }
        }
        if let Some(bytes) = self.cache.get(&self.prefixed(cache::KEY_LAST_SEEN)).await? {
            let anchor: ClockAnchor = serde_json::from_slice(&bytes)?;
            self.state.write().unwrap_or_else(|e| e.into_inner()).clock_anchor = Some(anchor);
        }
        Ok(())
    }

    async fn start_cycles(&self, key: String) {
        if self.config.auto_validate_interval_secs > 0 {
            let weak = self.self_weak.clone();
            let key = key.clone();
            self.scheduler
                .start_validate(Duration::from_secs(self.config.auto_validate_interval_secs), move || {
                    let weak = weak.clone();
                    let key = key.clone();
                    async move {
                        if let Some(core) = weak.upgrade() {
                            core.auto_validate_tick(&key).await;
                        }
                    }
                })
                .await;
        }
        if self.config.heartbeat_interval_secs > 0 {
            let weak = self.self_weak.clone();
            self.scheduler
                .start_heartbeat(Duration::from_secs(self.config.heartbeat_interval_secs), move || {
                    let weak = weak.clone();
                    let key = key.clone();
                    async move {
                        if let Some(core) = weak.upgrade() {
                            let _ = core.heartbeat(&key, None).await;
                        }
                    }
                })
                .await;
        }
    }

    async fn auto_validate_tick(&self, key: &str) {
        match self.validate(key, None).await {
            Ok(result) => {
                let _ = self.heartbeat_inner(key).await;
                self.events.emit_unit(topics::AUTO_VALIDATION_CYCLE);
                if !result.valid {
                    self.scheduler.stop_validate().await;
                    self.events.emit_unit(topics::AUTO_VALIDATION_STOPPED);
                }
            }
            Err(_) => {
                self.events.emit_unit(topics::VALIDATION_AUTO_FAILED);
                self.scheduler.stop_validate().await;
                self.events.emit_unit(topics::AUTO_VALIDATION_STOPPED);
            }
        }
    }

    async fn activate_inner(&self, license_key: &str, options: ActivateOptions) -> Result<License> {
        let _guard = self.op_lock.lock().await;
        self.events.emit_unit(topics::ACTIVATION_START);
        let telemetry = self.telemetry_value();

        match self
            .api
            .activate(license_key, &self.device_id, options.device_name.as_deref(), options.metadata, telemetry)
            .await
        {
            Ok(response) => {
                let now = Utc::now();
                let mut license = response.license;
                license.device_id = self.device_id.clone();
                license.activated_at = now;
                license.last_validated = Some(now);
                license.validation = Some(ValidationResult {
                    valid: true,
                    offline: false,
                    optimistic: true,
                    ..ValidationResult::default()
                });

                {
                    let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                    state.license = Some(license.clone());
                }
                self.persist_license(&license).await?;
                self.start_cycles(license_key.to_string()).await;
                self.spawn_offline_license_fetch(license_key.to_string());
                self.events.emit_unit(topics::ACTIVATION_SUCCESS);
                Ok(license)
            }
            Err(e) => {
                self.events.emit_unit(topics::ACTIVATION_ERROR);
                Err(e)
            }
        }
    }

    async fn validate_inner(&self, license_key: &str) -> Result<ValidationResult> {
        self.events.emit_unit(topics::VALIDATION_START);
        let telemetry = self.telemetry_value();

        match self.api.validate(license_key, &self.device_id, telemetry).await {
            Ok(response) => {
                let result = ValidationResult {
                    valid: response.valid,
                    active_entitlements: response
                        .license
                        .as_ref()
                        .map(|l| l.active_entitlements.clone()),
                    license: response.license.clone(),
                    reason: response.message,
                    reason_code: response.code,
                    offline: false,
                    optimistic: false,
                };
                self.commit_online_validation(license_key, &result, response.license).await?;
                if result.valid {
                    self.events.emit_unit(topics::VALIDATION_SUCCESS);
                } else {
                    self.events.emit_unit(topics::VALIDATION_FAILED);
                }
                Ok(result)
            }
            Err(e) => {
                if self.should_fallback(&e) {
                    let result = self.validate_offline().await?;
                    if result.valid {
                        self.events.emit_unit(topics::VALIDATION_OFFLINE_SUCCESS);
                    } else {
                        self.events.emit_unit(topics::VALIDATION_OFFLINE_FAILED);
                    }
                    Ok(result)
                } else {
                    self.events.emit_unit(topics::VALIDATION_ERROR);
                    Err(e)
                }
            }
        }
    }

    fn should_fallback(&self, err: &Error) -> bool {
        use crate::config::OfflineFallbackMode;
        match self.config.offline_fallback_mode {
            OfflineFallbackMode::Disabled => false,
            OfflineFallbackMode::NetworkOnly => {
                matches!(err, Error::Api(ApiError::NetworkError { .. }) | Error::Api(ApiError::ServerError { .. }))
            }
            OfflineFallbackMode::Always => true,
        }
    }

    async fn validate_offline(&self) -> Result<ValidationResult> {
        let now_unix = Utc::now().timestamp();
        let (license, token, public_key, clock_anchor) = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            let license = state.license.clone();
            let token = state.offline_token.clone();
            let public_key = token
                .as_ref()
                .and_then(|t| state.public_keys.get(&token_key_id(t)).cloned());
            (license, token, public_key, state.clock_anchor)
        };

        let outcome = verifier::verify(VerifyInputs {
            license: license.as_ref(),
            token: token.as_ref(),
            public_key: public_key.as_ref(),
            clock_anchor,
            max_offline_days: self.config.max_offline_days,
            max_clock_skew_secs: self.config.max_clock_skew_secs,
            now_unix,
        });

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => verifier::VerifyOutcome {
                result: ValidationResult {
                    valid: false,
                    offline: true,
                    reason_code: Some(e.reason_code().to_string()),
                    ..ValidationResult::default()
                },
                new_clock_anchor: None,
            },
        };

        if let Some(anchor) = outcome.new_clock_anchor {
            self.persist_clock_anchor(anchor).await?;
        }

        if let Some(mut license) = license {
            license.validation = Some(outcome.result.clone());
            {
                self.state.write().unwrap_or_else(|e| e.into_inner()).license = Some(license.clone());
            }
            self.persist_license(&license).await?;
        }

        Ok(outcome.result)
    }

    async fn commit_online_validation(
        &self,
        license_key: &str,
        result: &ValidationResult,
        server_license: Option<License>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut license = match server_license {
            Some(license) => license,
            None => {
                let existing = self.state.read().unwrap_or_else(|e| e.into_inner()).license.clone();
                existing.unwrap_or_else(|| License {
                    key: license_key.to_string(),
                    device_id: self.device_id.clone(),
                    status: LicenseStatus::Pending,
                    plan_key: None,
                    seat_limit: None,
                    active_seats: None,
                    starts_at: None,
                    ends_at: None,
                    mode: None,
                    active_entitlements: vec![],
                    activated_at: now,
                    last_validated: None,
                    validation: None,
                })
            }
        };
        license.device_id = self.device_id.clone();
        license.last_validated = Some(now);
        license.validation = Some(result.clone());

        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.license = Some(license.clone());
        }
        self.persist_license(&license).await
    }

    async fn heartbeat_inner(&self, license_key: &str) -> Result<()> {
        let has_license = self.state.read().unwrap_or_else(|e| e.into_inner()).license.is_some();
        if !has_license {
            return Ok(());
        }
        let telemetry = self.telemetry_value();
        match self.api.heartbeat(license_key, &self.device_id, telemetry).await {
            Ok(_) => {
                self.events.emit_unit(topics::HEARTBEAT_SUCCESS);
                Ok(())
            }
            Err(e) => {
                self.events.emit_unit(topics::HEARTBEAT_ERROR);
                Err(e)
            }
        }
    }

    async fn deactivate_inner(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let license_key = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state.license.as_ref().map(|l| l.key.clone())
        };
        let Some(license_key) = license_key else {
            return Err(LicenseError::NoLicense.into());
        };

        self.events.emit_unit(topics::DEACTIVATION_START);
        match self.api.deactivate(&license_key, &self.device_id).await {
            Ok(_) => {
                self.clear_local_state().await?;
                self.events.emit_unit(topics::DEACTIVATION_SUCCESS);
                Ok(())
            }
            Err(e) if is_already_gone(&e) => {
                self.clear_local_state().await?;
                self.events.emit_unit(topics::DEACTIVATION_SUCCESS);
                Ok(())
            }
            Err(e) => {
                self.events.emit_unit(topics::DEACTIVATION_ERROR);
                Err(e)
            }
        }
    }

    async fn clear_local_state(&self) -> Result<()> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.license = None;
            state.offline_token = None;
        }
        self.cache.delete(&self.prefixed(cache::KEY_LICENSE)).await?;
        self.cache.delete(&self.prefixed(cache::KEY_OFFLINE_TOKEN)).await?;
        self.scheduler.stop_all().await;
        Ok(())
    }

    fn spawn_offline_license_fetch(&self, license_key: String) {
        let weak = self.self_weak.clone();
        tokio::spawn(async move {
            let Some(core) = weak.upgrade() else { return };
            core.events.emit_unit(topics::OFFLINE_LICENSE_FETCHING);
            match core.fetch_and_cache_offline_token(&license_key).await {
                Ok(()) => core.events.emit_unit(topics::OFFLINE_LICENSE_READY),
                Err(_) => core.events.emit_unit(topics::OFFLINE_LICENSE_FETCH_ERROR),
            }
        });
    }

    async fn fetch_and_cache_offline_token(&self, license_key: &str) -> Result<()> {
        let token = self.api.fetch_offline_token(license_key, &self.device_id).await?;
        let key_id = token_key_id(&token);

        let already_pinned = self.cache.get(&self.prefixed(&cache::public_key_entry(&key_id))).await?.is_some();
        if !already_pinned {
            let signing_key = self.api.fetch_signing_key(&key_id).await?;
            let public_key: PublicKey = signing_key.into();
            let bytes = serde_json::to_vec(&public_key)?;
            self.cache.set(&self.prefixed(&cache::public_key_entry(&key_id)), &bytes).await?;
            self.state.write().unwrap_or_else(|e| e.into_inner()).public_keys.insert(key_id, public_key);
        }

        let bytes = serde_json::to_vec(&token)?;
        self.cache.set(&self.prefixed(cache::KEY_OFFLINE_TOKEN), &bytes).await?;
        self.state.write().unwrap_or_else(|e| e.into_inner()).offline_token = Some(token);
        self.events.emit_unit(topics::OFFLINE_LICENSE_FETCHED);
        Ok(())
    }

    async fn persist_license(&self, license: &License) -> Result<()> {
        let bytes = serde_json::to_vec(license)?;
        self.cache.set(&self.prefixed(cache::KEY_LICENSE), &bytes).await
    }

    async fn persist_clock_anchor(&self, anchor: ClockAnchor) -> Result<()> {
        {
            self.state.write().unwrap_or_else(|e| e.into_inner()).clock_anchor = Some(anchor);
        }
        let bytes = serde_json::to_vec(&anchor)?;
        self.cache.set(&self.prefixed(cache::KEY_LAST_SEEN), &bytes).await
    }
}

fn token_key_id(token: &OfflineToken) -> String {
    if token.token.kid.is_empty() {
        token.signature.key_id.clone()
    } else {
        token.token.kid.clone()
    }
}

/// Deactivation success-equivalent responses (§4.1): already-gone on the
/// server is treated as a successful local deactivation.
fn is_already_gone(err: &Error) -> bool {
    const KNOWN_CODES: [&str; 6] =
        ["revoked", "already_deactivated", "not_active", "not_found", "suspended", "expired"];

    match err {
        Error::Api(ApiError::ClientError { status_code, code, message, .. }) => {
            if *status_code == 404 || *status_code == 410 {
                return true;
            }
            if *status_code != 422 {
                return false;
            }
            if code.as_ref().is_some_and(|c| KNOWN_CODES.contains(&c.to_lowercase().as_str())) {
                return true;
            }
            let lower = message.to_lowercase();
            KNOWN_CODES.iter().any(|known| lower.contains(known))
        }
        _ => false,
    }
}

fn derive_cache_key(device_id: &str) -> [u8; encryption::KEY_SIZE] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(device_id.as_bytes());
    let mut key = [0u8; encryption::KEY_SIZE];
    key.copy_from_slice(&digest);
    key
}

async fn run_cancellable<T>(fut: impl Future<Output = Result<T>>, cancel: Option<&CancelToken>) -> Result<T> {
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                result = fut => result,
            }
        }
        None => fut.await,
    }
}
