use std::process::Command;

/// `(machine_name, user_name, os_version)` for device id hashing on Windows.
pub(super) fn host_attributes() -> (String, String, String) {
    (machine_name(), user_name(), os_version())
}

fn machine_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "windows_host_unknown".to_string())
}

fn user_name() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "windows_user_unknown".to_string())
}

fn os_version() -> String {
    if let Some(value) = wmic_list("os", "Version") {
        return value;
    }

    "windows_os_unknown".to_string()
}

/// Parse WMIC's `/format:list` output (`key=value` lines).
fn wmic_list(class: &str, key: &str) -> Option<String> {
    let output = Command::new("wmic")
        .args([class, "get", key, "/format:list"])
        .output()
        .ok()?;

    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Some(value) = line.strip_prefix(&format!("{key}=")) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    None
}
