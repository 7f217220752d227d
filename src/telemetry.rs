//! Telemetry envelope (§6): an optional, host-configurable block attached to
//! outgoing requests when enabled. Fields do not affect licensing semantics;
//! null fields are omitted on the wire.

use serde::Serialize;

/// SDK/host telemetry attached to activate/validate/heartbeat requests.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEnvelope {
    pub sdk_name: String,
    pub sdk_version: String,
    pub os_name: String,
    pub os_version: String,
    /// Fixed tag identifying the embedding runtime. NOT a duplicate of `os_name`.
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    pub architecture: String,
    pub cpu_cores: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,
    pub locale: String,
    /// IANA timezone name, e.g. `"Europe/Athens"`.
    pub timezone: String,
    pub language: String,
    pub runtime_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_build: Option<String>,
}

/// Host-supplied fields the runtime cannot infer on its own.
#[derive(Debug, Clone, Default)]
pub struct TelemetryHostInfo {
    pub app_version: Option<String>,
    pub app_build: Option<String>,
    pub device_model: Option<String>,
    pub device_type: Option<String>,
}

/// Best-effort telemetry envelope for the current process/host.
///
/// Fields this process cannot determine (app version/build, device model)
/// are left `None` unless supplied by the caller via `host_info`.
pub fn build_envelope(host_info: &TelemetryHostInfo) -> TelemetryEnvelope {
    TelemetryEnvelope {
        sdk_name: "argus".to_string(),
        sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        os_name: std::env::consts::OS.to_string(),
        os_version: os_version(),
        platform: "rust".to_string(),
        device_model: host_info.device_model.clone(),
        device_type: host_info.device_type.clone(),
        architecture: std::env::consts::ARCH.to_string(),
        cpu_cores: std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        memory_gb: None,
        locale: locale(),
        timezone: timezone(),
        language: "rust".to_string(),
        runtime_version: rustc_runtime_tag(),
        app_version: host_info.app_version.clone(),
        app_build: host_info.app_build.clone(),
    }
}

fn os_version() -> String {
    crate::device_id::host_os_version()
}

fn locale() -> String {
    std::env::var("LANG").unwrap_or_else(|_| "en_US".to_string())
}

fn timezone() -> String {
    std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string())
}

fn rustc_runtime_tag() -> String {
    format!("rustc/{}", option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_unset_optional_fields_on_the_wire() {
        let envelope = build_envelope(&TelemetryHostInfo::default());
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("app_version").is_none());
        assert!(json.get("device_model").is_none());
    }

    #[test]
    fn envelope_includes_host_supplied_app_version() {
        let host_info = TelemetryHostInfo {
            app_version: Some("1.2.3".to_string()),
            ..Default::default()
        };
        let envelope = build_envelope(&host_info);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["app_version"], "1.2.3");
    }

    #[test]
    fn platform_tag_is_not_a_duplicate_of_os_name() {
        let envelope = build_envelope(&TelemetryHostInfo::default());
        assert_ne!(envelope.platform, envelope.os_name);
    }
}
