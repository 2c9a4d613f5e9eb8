//! OS-specific paths and utilities.

use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Return the system hosts file path.
pub fn hosts_file_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".into());
        PathBuf::from(root).join(r"System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// Return the app's config directory.
///   macOS / Linux: ~/.qiantu-doctor/
///   Windows:       %APPDATA%\QiantuDoctor\
pub fn config_dir() -> PathBuf {
    if cfg!(target_os = "windows") {
        directories::BaseDirs::new()
            .map(|b| b.config_dir().join("QiantuDoctor"))
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData\QiantuDoctor"))
    } else {
        directories::BaseDirs::new()
            .map(|b| b.home_dir().join(".qiantu-doctor"))
            .unwrap_or_else(|| PathBuf::from("/tmp/.qiantu-doctor"))
    }
}

/// Flush the OS DNS cache so hosts-file changes take effect immediately.
///
/// Returns whether a flush command reported success. Never prompts: on
/// macOS and Linux the commands only succeed when already privileged.
pub fn flush_dns() -> bool {
    if cfg!(target_os = "windows") {
        run_quiet("ipconfig", &["/flushdns"])
    } else if cfg!(target_os = "macos") {
        let cache = run_quiet("dscacheutil", &["-flushcache"]);
        let responder = run_quiet("killall", &["-HUP", "mDNSResponder"]);
        cache && responder
    } else {
        run_quiet("resolvectl", &["flush-caches"])
            || run_quiet("systemd-resolve", &["--flush-caches"])
    }
}

fn run_quiet(program: &str, args: &[&str]) -> bool {
    match Command::new(program).args(args).output() {
        Ok(out) => {
            debug!(program, status = %out.status, "flush command finished");
            out.status.success()
        }
        Err(e) => {
            debug!(program, error = %e, "flush command unavailable");
            false
        }
    }
}

/// Whether the current process already holds administrator/root privilege.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    Command::new("id")
        .arg("-u")
        .output()
        .map(|out| is_root_uid(&String::from_utf8_lossy(&out.stdout)))
        .unwrap_or(false)
}

/// `id -u` output names the root user.
#[cfg(unix)]
fn is_root_uid(output: &str) -> bool {
    output.trim() == "0"
}

/// Whether the current process already holds administrator/root privilege.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    // S-1-16-12288 is the high mandatory integrity level of an elevated token.
    Command::new("whoami")
        .arg("/groups")
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains("S-1-16-12288"))
        .unwrap_or(false)
}

/// Short human-readable description of the running platform.
pub fn os_description() -> String {
    format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn root_uid_is_recognised() {
        assert!(is_root_uid("0\n"));
        assert!(!is_root_uid("1000\n"));
        assert!(!is_root_uid(""));
    }

    #[test]
    fn hosts_path_points_at_the_system_table() {
        let path = hosts_file_path();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("hosts"));
    }
}
