//! Best-effort current-working-directory detection for a running shell
//! process (§3 "cwd tracking is best-effort and must never fail a
//! session"). Used by the Local & Container Session Registry to refresh a
//! terminal's reported cwd after it detects a `cd` in the output stream.

use std::path::PathBuf;

/// Returns the working directory of `pid`, or `"unknown"` if it cannot be
/// determined. Never errors; a missing or racily-exited process is just
/// another reason to fall back.
pub fn of_pid(pid: u32) -> String {
    best_effort(pid).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn best_effort(pid: u32) -> Option<String> {
    std::fs::read_link(format!("/proc/{pid}/cwd"))
        .ok()
        .map(|p: PathBuf| p.to_string_lossy().into_owned())
}

#[cfg(target_os = "macos")]
fn best_effort(pid: u32) -> Option<String> {
    let output = std::process::Command::new("lsof")
        .args(["-a", "-p", &pid.to_string(), "-d", "cwd", "-Fn"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .map(str::to_string)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn best_effort(_pid: u32) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_pid_falls_back() {
        // PID 1 is always something, but never this process; on platforms
        // without a read permission it still must not panic.
        let _ = of_pid(u32::MAX);
    }

    #[test]
    fn never_panics_on_self() {
        let result = of_pid(std::process::id());
        assert!(!result.is_empty());
    }
}
