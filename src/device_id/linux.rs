use std::fs;
use std::process::Command;

/// `(machine_name, user_name, os_version)` for device id hashing on Linux.
pub(super) fn host_attributes() -> (String, String, String) {
    (machine_name(), user_name(), os_version())
}

fn machine_name() -> String {
    if let Ok(name) = fs::read_to_string("/proc/sys/kernel/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }

    if let Ok(output) = Command::new("hostname").output() {
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !name.is_empty() {
            return name;
        }
    }

    "linux_host_unknown".to_string()
}

fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "linux_user_unknown".to_string())
}

fn os_version() -> String {
    if let Ok(contents) = fs::read_to_string("/etc/os-release") {
        for line in contents.lines() {
            if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
                let value = value.trim_matches('"').trim();
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
    }

    if let Ok(output) = Command::new("uname").args(["-r"]).output() {
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !version.is_empty() {
            return version;
        }
    }

    "linux_os_unknown".to_string()
}
