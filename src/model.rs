//! Persisted and wire-level data model (§3).
//!
//! `License`, `Entitlement`, `ValidationResult` and `OfflineToken` are the
//! records the Cache Store holds; `PublicKey` and `ClockAnchor` back the
//! Offline Verifier. Everything here is plain serde data — no behavior beyond
//! small derived predicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-reported license status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Suspended,
    Expired,
    Revoked,
    Pending,
}

/// Named capability granted by a license, possibly time-limited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Entitlement {
    /// True once `expires_at` has passed; entitlements without an expiry never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}

/// Verdict of a single validation attempt (online or offline).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_entitlements: Option<Vec<Entitlement>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub offline: bool,
    /// Set immediately after activation, before the server has re-confirmed.
    /// Never treated as terminal truth — a later validation always supersedes it.
    #[serde(default)]
    pub optimistic: bool,
}

/// The authoritative local representation of an activated entitlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub key: String,
    pub device_id: String,
    pub status: LicenseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub active_entitlements: Vec<Entitlement>,
    pub activated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

impl License {
    /// Timestamp the Offline Verifier ages a missing-`exp` token's grace period against.
    pub fn grace_anchor(&self) -> DateTime<Utc> {
        self.last_validated.unwrap_or(self.activated_at)
    }
}

/// The signed inner payload of an offline token, as issued by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineTokenBody {
    pub license_key: String,
    pub product_slug: String,
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub nbf: i64,
    pub kid: String,
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitlements: Option<Vec<OfflineEntitlement>>,
}

/// Entitlement entry as it appears inside an offline token (Unix-seconds expiry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineEntitlement {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Signature envelope accompanying an offline token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineTokenSignature {
    pub algorithm: String,
    pub key_id: String,
    /// Base64URL, unpadded.
    pub value: String,
}

/// Server-signed capability to validate without contacting the server.
///
/// `canonical` is the byte-exact JSON the server signed; it is never
/// re-derived locally (§4.5's canonical-JSON rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineToken {
    pub token: OfflineTokenBody,
    pub signature: OfflineTokenSignature,
    pub canonical: String,
}

/// Pinned Ed25519 public key, keyed by `key_id`. Set once, never silently overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    pub key_id: String,
    /// Base64, 32 bytes after decoding.
    pub public_key: String,
    pub algorithm: String,
}

/// Clock-tamper detection anchor: the latest instant the core has confirmed validity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClockAnchor {
    pub last_seen_unix: i64,
}

/// Session Core state, derived purely from cache contents (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Inactive,
    Pending,
    Active,
    OfflineValid,
    Invalid,
    OfflineInvalid,
}

/// Result of `check_entitlement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    Active,
    Expired,
    NotFound,
    NoLicense,
}
