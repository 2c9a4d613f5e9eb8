//! Qiantu Doctor — connectivity fixer for the 58pic / qiantucdn sites.
//!
//! Resolves the current address of a site domain through a cascade of
//! sources and pins it in the system hosts file. Every write goes through a
//! backup-then-overwrite commit that falls back to an OS elevation prompt when
//! the process lacks permission, and restores the backup if the write fails.

pub mod commit;
pub mod config;
pub mod domains;
pub mod download;
pub mod editor;
pub mod elevation;
pub mod hosts;
pub mod lookup;
pub mod platform;
pub mod report;
pub mod resolver;

use std::io;
use thiserror::Error;

// =========================================================================
// Error type
// =========================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hosts file error: {0}")]
    Hosts(String),

    #[error("No hosts entry matches {0}")]
    NoMatch(String),

    #[error("Could not resolve an IP address for: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error("Unknown problem type: {0}")]
    UnknownProblem(String),

    #[error(transparent)]
    Commit(#[from] commit::CommitError),
}

impl AppError {
    /// True when the failure came from the user dismissing an elevation prompt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Commit(e) if e.is_cancelled())
    }
}
