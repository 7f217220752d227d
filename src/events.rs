//! Event Bus (§4.7): named-topic publish/subscribe.
//!
//! Handlers are registered against a topic string and receive an untyped,
//! shared payload. `emit` runs all handlers of a topic synchronously on the
//! emitter's thread; a handler that panics is isolated and logged, it never
//! prevents the remaining handlers from running.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Shared, dynamically-typed event payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A registered handler.
pub type Handler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Complete topic catalog (§4.7), as plain string constants — the bus itself
/// does not restrict topics to this list, but every topic the runtime emits
/// on is named here.
pub mod topics {
    pub const ACTIVATION_START: &str = "activation:start";
    pub const ACTIVATION_SUCCESS: &str = "activation:success";
    pub const ACTIVATION_ERROR: &str = "activation:error";

    pub const VALIDATION_START: &str = "validation:start";
    pub const VALIDATION_SUCCESS: &str = "validation:success";
    pub const VALIDATION_FAILED: &str = "validation:failed";
    pub const VALIDATION_ERROR: &str = "validation:error";
    pub const VALIDATION_AUTO_FAILED: &str = "validation:auto-failed";
    pub const VALIDATION_AUTH_FAILED: &str = "validation:auth-failed";
    pub const VALIDATION_OFFLINE_SUCCESS: &str = "validation:offline-success";
    pub const VALIDATION_OFFLINE_FAILED: &str = "validation:offline-failed";

    pub const DEACTIVATION_START: &str = "deactivation:start";
    pub const DEACTIVATION_SUCCESS: &str = "deactivation:success";
    pub const DEACTIVATION_ERROR: &str = "deactivation:error";

    pub const HEARTBEAT_SUCCESS: &str = "heartbeat:success";
    pub const HEARTBEAT_ERROR: &str = "heartbeat:error";

    pub const AUTO_VALIDATION_CYCLE: &str = "auto-validation:cycle";
    pub const AUTO_VALIDATION_STOPPED: &str = "auto-validation:stopped";

    pub const LICENSE_LOADED: &str = "license:loaded";

    pub const OFFLINE_LICENSE_FETCHING: &str = "offline-license:fetching";
    pub const OFFLINE_LICENSE_FETCHED: &str = "offline-license:fetched";
    pub const OFFLINE_LICENSE_FETCH_ERROR: &str = "offline-license:fetch-error";
    pub const OFFLINE_LICENSE_READY: &str = "offline-license:ready";

    pub const NETWORK_ONLINE: &str = "network:online";
    pub const NETWORK_OFFLINE: &str = "network:offline";

    pub const AUTH_TEST_START: &str = "auth-test:start";
    pub const AUTH_TEST_SUCCESS: &str = "auth-test:success";
    pub const AUTH_TEST_ERROR: &str = "auth-test:error";

    pub const SDK_RESET: &str = "sdk:reset";
    pub const SDK_DESTROYED: &str = "sdk:destroyed";
}

struct Subscription {
    id: u64,
    handler: Handler,
}

/// Thread-safe named-topic pub/sub bus.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

/// Opaque handle returned by `on`, passed to `off` to remove that one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` against `topic`. Returns a handle for `off`.
    pub fn on(&self, topic: &str, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        subscriptions
            .entry(topic.to_string())
            .or_default()
            .push(Subscription { id, handler });
        SubscriptionId(id)
    }

    /// Remove a single registration previously returned by `on`.
    pub fn off(&self, topic: &str, id: SubscriptionId) {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(handlers) = subscriptions.get_mut(topic) {
            handlers.retain(|s| s.id != id.0);
        }
    }

    /// Remove all registrations, optionally scoped to one topic.
    pub fn clear(&self, topic: Option<&str>) {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        match topic {
            Some(topic) => {
                subscriptions.remove(topic);
            }
            None => subscriptions.clear(),
        }
    }

    /// Number of handlers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let subscriptions = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
        subscriptions.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Invoke every handler for `topic` with `payload`, synchronously, on the caller's thread.
    ///
    /// A panicking handler is caught and logged; it does not stop later handlers.
    pub fn emit(&self, topic: &str, payload: Payload) {
        let handlers: Vec<Handler> = {
            let subscriptions = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
            subscriptions
                .get(topic)
                .map(|v| v.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            let payload = payload.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload)));
            if result.is_err() {
                tracing::warn!(topic, "event handler panicked, isolated");
            }
        }
    }

    /// Convenience for topics with no payload.
    pub fn emit_unit(&self, topic: &str) {
        self.emit(topic, Arc::new(()));
    }
}
