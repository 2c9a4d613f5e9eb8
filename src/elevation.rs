//! Privileged file operations through the OS's own elevation prompt.
//!
//! The commit protocol only sees the [`Elevator`] trait; the platform
//! implementation is chosen once at startup by [`platform_elevator`].
//!
//! - macOS:   `osascript … with administrator privileges` (GUI password dialog)
//! - Linux:   `sudo cp` (terminal password prompt)
//! - Windows: PowerShell `Start-Process -Verb RunAs` (UAC consent)

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound on how long a user may sit on an elevation prompt.
const HELPER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ElevationError {
    #[error("administrator prompt was cancelled")]
    Cancelled,

    #[error("elevation helper timed out")]
    TimedOut,

    #[error("elevation failed: {0}")]
    Failed(String),

    #[error("elevation I/O error: {0}")]
    Io(#[from] io::Error),
}

/// File operations performed with escalated privileges.
pub trait Elevator {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), ElevationError>;

    /// Replace `path` with `content`. The content is staged in a private
    /// temporary file, then copied into place with escalated privileges.
    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), ElevationError> {
        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(content)?;
        staged.flush()?;
        self.copy_file(staged.path(), path)
    }
}

/// Pick the elevation mechanism for this platform, or none when disabled.
pub fn platform_elevator(enabled: bool) -> Box<dyn Elevator> {
    if !enabled {
        return Box::new(NoElevation);
    }
    if cfg!(target_os = "windows") {
        Box::new(RunAs)
    } else if cfg!(target_os = "macos") {
        Box::new(Osascript)
    } else {
        Box::new(Sudo)
    }
}

/// Refuses every request. Used when elevation is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoElevation;

impl Elevator for NoElevation {
    fn copy_file(&self, _src: &Path, dst: &Path) -> Result<(), ElevationError> {
        Err(ElevationError::Failed(format!(
            "elevation is disabled; cannot write {}",
            dst.display()
        )))
    }
}

// =========================================================================
// macOS
// =========================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Osascript;

/// Quote for a POSIX shell: `'…'` with embedded quotes as `'\''`.
pub fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Escape a string for inclusion in an AppleScript string literal.
fn applescript_escape(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', "\\\"")
}

impl Elevator for Osascript {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), ElevationError> {
        let shell = format!("cp {} {}", shell_quote(src), shell_quote(dst));
        let script = format!(
            "do shell script \"{}\" with administrator privileges",
            applescript_escape(&shell)
        );
        info!(dst = %dst.display(), "requesting administrator privileges");
        let mut cmd = Command::new("osascript");
        cmd.args(["-e", &script]);
        run_helper(cmd)
    }
}

// =========================================================================
// Linux and other Unix
// =========================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Sudo;

impl Elevator for Sudo {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), ElevationError> {
        info!(dst = %dst.display(), "requesting root privileges via sudo");
        let mut cmd = Command::new("sudo");
        cmd.arg("cp").arg("--").arg(src).arg(dst);
        run_helper(cmd)
    }
}

// =========================================================================
// Windows
// =========================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct RunAs;

/// Quote for a PowerShell single-quoted string.
fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// PowerShell that copies `src` over `dst` from an elevated `cmd.exe`.
///
/// A declined UAC prompt makes `Start-Process` throw; the catch block turns
/// that into a non-zero exit with the reason on stderr.
fn runas_script(src: &Path, dst: &Path) -> String {
    let copy = format!(
        "/c copy /Y \"{}\" \"{}\"",
        src.to_string_lossy(),
        dst.to_string_lossy()
    );
    format!(
        "$ErrorActionPreference = 'Stop'; \
         try {{ $p = Start-Process -FilePath cmd.exe -ArgumentList {} -Verb RunAs -Wait \
         -WindowStyle Hidden -PassThru; exit $p.ExitCode }} \
         catch {{ [Console]::Error.WriteLine($_.Exception.Message); exit 1 }}",
        powershell_quote(&copy)
    )
}

impl Elevator for RunAs {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), ElevationError> {
        let script = runas_script(src, dst);
        info!(dst = %dst.display(), "requesting administrator privileges via UAC");
        let mut cmd = Command::new("powershell");
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", &script]);
        run_helper(cmd)
    }
}

// =========================================================================
// Helpers
// =========================================================================

/// Map a failed helper's stderr to an error, recognising a dismissed prompt.
pub fn classify_failure(stderr: &str) -> ElevationError {
    let lower = stderr.to_lowercase();
    if lower.contains("canceled") || lower.contains("cancelled") || lower.contains("(-128)") {
        ElevationError::Cancelled
    } else if stderr.trim().is_empty() {
        ElevationError::Failed("helper exited with an error".into())
    } else {
        ElevationError::Failed(stderr.trim().to_string())
    }
}

/// Run a helper to completion, killing it after [`HELPER_TIMEOUT`].
fn run_helper(mut command: Command) -> Result<(), ElevationError> {
    let mut child = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let deadline = Instant::now() + HELPER_TIMEOUT;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ElevationError::TimedOut);
        }
        thread::sleep(Duration::from_millis(100));
    };

    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr);
    }

    debug!(%status, "elevation helper finished");
    if status.success() {
        Ok(())
    } else {
        Err(classify_failure(&stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    /// Performs the copy unprivileged, standing in for a prompt the user accepted.
    struct Accepting;

    impl Elevator for Accepting {
        fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), ElevationError> {
            fs::copy(src, dst)?;
            Ok(())
        }
    }

    #[test]
    fn staged_write_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hosts");
        fs::write(&target, "old\n").unwrap();

        Accepting.write_file(&target, b"5.6.7.8\tdl.58pic.com\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "5.6.7.8\tdl.58pic.com\n");
    }

    #[test]
    fn disabled_elevation_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hosts");
        assert!(matches!(
            NoElevation.write_file(&target, b"x"),
            Err(ElevationError::Failed(_))
        ));
        assert!(!target.exists());
    }

    #[test]
    fn cancelled_prompts_are_recognised() {
        assert!(matches!(
            classify_failure("execution error: User canceled. (-128)"),
            ElevationError::Cancelled
        ));
        assert!(matches!(
            classify_failure("Start-Process : The operation was canceled by the user."),
            ElevationError::Cancelled
        ));
        assert!(matches!(
            classify_failure("sudo: 3 incorrect password attempts"),
            ElevationError::Failed(m) if m.contains("incorrect")
        ));
    }

    #[test]
    fn runas_script_fails_loudly_when_uac_is_declined() {
        let script = runas_script(
            Path::new(r"C:\Users\o'neil\AppData\Local\Temp\.tmpA1"),
            Path::new(r"C:\Windows\System32\drivers\etc\hosts"),
        );

        assert!(script.starts_with("$ErrorActionPreference = 'Stop';"));
        let try_at = script.find("try {").unwrap();
        let start_at = script.find("Start-Process").unwrap();
        let catch_at = script.find("catch {").unwrap();
        assert!(try_at < start_at && start_at < catch_at);
        assert!(script.contains("[Console]::Error.WriteLine($_.Exception.Message); exit 1"));
        assert!(script.contains(r"o''neil"));
        assert!(script.contains(r#""C:\Windows\System32\drivers\etc\hosts""#));
    }

    #[test]
    fn shell_quoting_survives_single_quotes() {
        let path = PathBuf::from("/tmp/it's here");
        assert_eq!(shell_quote(&path), r"'/tmp/it'\''s here'");
        assert_eq!(applescript_escape(r#"cp "a" b\c"#), r#"cp \"a\" b\\c"#);
    }
}
