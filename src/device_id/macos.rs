use std::process::Command;

/// `(machine_name, user_name, os_version)` for device id hashing on macOS.
pub(super) fn host_attributes() -> (String, String, String) {
    (machine_name(), user_name(), os_version())
}

fn machine_name() -> String {
    if let Ok(output) = Command::new("scutil").args(["--get", "ComputerName"]).output() {
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !name.is_empty() {
            return name;
        }
    }

    "macos_host_unknown".to_string()
}

fn user_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "macos_user_unknown".to_string())
}

fn os_version() -> String {
    if let Ok(output) = Command::new("sw_vers").args(["-productVersion"]).output() {
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !version.is_empty() {
            return version;
        }
    }

    "macos_os_unknown".to_string()
}
