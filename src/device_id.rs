//! Default device identifier generation.
//!
//! Per §6: a stable, local, host-derived identifier used when the caller
//! doesn't override `device_id` in the runtime config. Deterministic from
//! machine name, user name and OS version, hashed (SHA-256) and truncated to
//! 32 hex characters — intentionally not a hardware attestation (that's a
//! non-goal); it only needs to be stable across runs on the same install.

#[cfg(target_os = "linux")]
#[path = "device_id/linux.rs"]
mod platform;
#[cfg(target_os = "macos")]
#[path = "device_id/macos.rs"]
mod platform;
#[cfg(target_os = "windows")]
#[path = "device_id/windows.rs"]
mod platform;

use sha2::{Digest, Sha256};

/// Compute the default device identifier for this host.
pub fn default_device_id() -> String {
    let (machine_name, user_name, os_version) = platform::host_attributes();
    hash_attributes(&machine_name, &user_name, &os_version)
}

/// The OS version string used in the device id hash, exposed separately for
/// the telemetry envelope's `os_version` field.
pub fn host_os_version() -> String {
    platform::host_attributes().2
}

fn hash_attributes(machine_name: &str, user_name: &str, os_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(machine_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(user_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(os_version.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..32].to_string()
}
