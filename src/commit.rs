//! Backup-then-overwrite commit of a new hosts file.
//!
//! ```text
//! BackingUp ──► Writing ──► Success
//!     │            │
//!   abort      Restoring ──► Restored | RestoreFailed
//! ```
//!
//! Each step tries plain file access first and falls back to the
//! [`Elevator`]. The live file is only ever replaced as a whole. Backups are
//! kept after success and accumulate next to the hosts file; none is ever
//! overwritten.

use crate::elevation::{ElevationError, Elevator};
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Unprivileged file access. Abstracted so the commit protocol can be
/// exercised against failing writes.
pub trait FileAccess {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()>;
    fn copy(&self, src: &Path, dst: &Path) -> io::Result<()>;
}

/// Direct `std::fs` access with the process's own permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskAccess;

impl FileAccess for DiskAccess {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        fs::write(path, content)
    }

    fn copy(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::copy(src, dst).map(|_| ())
    }
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("backup to {} failed, nothing was changed: {source}", .backup.display())]
    Backup {
        backup: PathBuf,
        #[source]
        source: ElevationError,
    },

    #[error("writing the hosts file failed: {error}; original restored from {}", .backup.display())]
    Restored {
        error: String,
        cancelled: bool,
        backup: PathBuf,
    },

    #[error(
        "writing the hosts file failed: {error}; restoring from {} also failed: {restore_error}",
        .backup.display()
    )]
    RestoreFailed {
        error: String,
        restore_error: String,
        cancelled: bool,
        backup: PathBuf,
    },
}

impl CommitError {
    /// The user dismissed an elevation prompt somewhere in the protocol.
    pub fn is_cancelled(&self) -> bool {
        match self {
            CommitError::Backup { source, .. } => matches!(source, ElevationError::Cancelled),
            CommitError::Restored { cancelled, .. } | CommitError::RestoreFailed { cancelled, .. } => {
                *cancelled
            }
        }
    }
}

/// `<hosts>.backup.YYYYMMDD_HHMMSS`, alongside the original.
pub fn backup_path_for(path: &Path, at: DateTime<Local>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".backup.{}", at.format("%Y%m%d_%H%M%S")));
    PathBuf::from(name)
}

/// [`backup_path_for`], with `.1`, `.2`, … appended while that name is taken,
/// so a second commit within the same second keeps the first backup.
pub fn unused_backup_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let base = backup_path_for(path, at);
    let mut candidate = base.clone();
    let mut n = 0;
    while candidate.exists() {
        n += 1;
        let mut name = base.as_os_str().to_owned();
        name.push(format!(".{n}"));
        candidate = PathBuf::from(name);
    }
    candidate
}

/// Why the write step failed, kept verbatim for the final report.
struct WriteFailure {
    error: String,
    cancelled: bool,
}

/// Replace `path` with `content`. Returns the backup path on success.
pub fn commit(
    files: &dyn FileAccess,
    elevator: &dyn Elevator,
    path: &Path,
    content: &[u8],
) -> Result<PathBuf, CommitError> {
    let backup = unused_backup_path(path, Local::now());

    // Backing up: failure here aborts before anything is mutated.
    if let Err(e) = files.copy(path, &backup) {
        debug!(error = %e, "direct backup failed, elevating");
        elevator
            .copy_file(path, &backup)
            .map_err(|source| CommitError::Backup {
                backup: backup.clone(),
                source,
            })?;
    }
    info!(backup = %backup.display(), "hosts file backed up");

    let Err(failure) = write_hosts(files, elevator, path, content) else {
        info!(path = %path.display(), "hosts file updated");
        return Ok(backup);
    };

    warn!(error = %failure.error, "write failed, restoring backup");
    match restore(files, elevator, &backup, path) {
        Ok(()) => Err(CommitError::Restored {
            error: failure.error,
            cancelled: failure.cancelled,
            backup,
        }),
        Err(restore_error) => Err(CommitError::RestoreFailed {
            error: failure.error,
            restore_error: restore_error.to_string(),
            cancelled: failure.cancelled,
            backup,
        }),
    }
}

fn write_hosts(
    files: &dyn FileAccess,
    elevator: &dyn Elevator,
    path: &Path,
    content: &[u8],
) -> Result<(), WriteFailure> {
    match files.write(path, content) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(error = %e, "direct write denied, elevating");
            elevator.write_file(path, content).map_err(|e| WriteFailure {
                cancelled: matches!(e, ElevationError::Cancelled),
                error: e.to_string(),
            })
        }
        Err(e) => Err(WriteFailure {
            error: e.to_string(),
            cancelled: false,
        }),
    }
}

fn restore(
    files: &dyn FileAccess,
    elevator: &dyn Elevator,
    backup: &Path,
    path: &Path,
) -> Result<(), ElevationError> {
    match files.copy(backup, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "direct restore failed, elevating");
            elevator.copy_file(backup, path)
        }
    }
}
