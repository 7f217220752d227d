//! Cache Store (§4.2): a durable keyed blob store for session artifacts.
//!
//! The Session Core is the sole writer; any number of readers may observe
//! committed state. Keys are opaque strings namespaced under a configurable
//! `storage_prefix`; values are opaque bytes the caller encodes/decodes.

mod file_store;

pub use file_store::FileCacheStore;

use crate::errors::Result;

/// Logical cache keys the Session Core reads and writes (before prefixing).
pub const KEY_LICENSE: &str = "license";
pub const KEY_OFFLINE_TOKEN: &str = "offline_token";
pub const KEY_DEVICE_ID: &str = "device_id";
pub const KEY_LAST_SEEN: &str = "last_seen";

/// Prefix for a pinned public key entry, `<prefix>/pk/<key_id>`.
pub fn public_key_entry(key_id: &str) -> String {
    format!("pk/{key_id}")
}

/// A durable map of string key to opaque bytes.
///
/// Implementations MUST serialize writes (no torn values) and MUST survive
/// process restart. All methods are async so a network- or disk-backed
/// implementation can suspend without blocking the caller's executor.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the current value for `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically write `value` for `key`.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`, if present. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// True iff `key` is present.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
