//! Argus: an embeddable software-licensing runtime.
//!
//! [`SessionCore`] is the entry point — activate, validate, deactivate and
//! heartbeat a license against a remote licensing service, with offline
//! fallback via signed, locally-verified tokens when the service is
//! unreachable. See [`session::SessionCore::configure`] to get started.

pub mod api;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod device_id;
pub mod encryption;
pub mod errors;
pub mod events;
pub mod model;
pub mod scheduler;
pub mod session;
pub mod singleton;
pub mod telemetry;
pub mod transport;
pub mod verifier;

pub use cancel::CancelToken;
pub use config::{OfflineFallbackMode, RuntimeConfig};
pub use errors::{Error, Result};
pub use events::{topics, EventBus, SubscriptionId};
pub use model::{
    ClockAnchor, Entitlement, EntitlementStatus, License, LicenseStatus, OfflineToken, PublicKey,
    SessionStatus, ValidationResult,
};
pub use session::{ActivateOptions, SessionCore};
pub use singleton::{configure, shared, shutdown};
