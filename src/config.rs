//! Persistent configuration stored as JSON on disk.
//!
//! Two files live in the config directory:
//! - `settings.json`: tool behaviour (hosts path override, extra domains, elevation).
//! - `domain_mappings.json`: domain → IPv4 overrides consulted before any lookup.

use crate::AppError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.json";
pub const MAPPINGS_FILE: &str = "domain_mappings.json";

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default)]
    pub hosts_file: Option<PathBuf>,
    #[serde(default)]
    pub extra_tracked_domains: Vec<String>,
    #[serde(default = "enabled")]
    pub elevate: bool,
    #[serde(default = "enabled")]
    pub flush_dns_after_commit: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hosts_file: None,
            extra_tracked_domains: Vec::new(),
            elevate: true,
            flush_dns_after_commit: true,
        }
    }
}

/// Domain → IPv4 string overrides.
pub type Mappings = BTreeMap<String, String>;

/// Load settings from `dir`, returning defaults if the file doesn't exist.
pub fn load_settings(dir: &Path) -> Result<Settings, AppError> {
    let path = dir.join(SETTINGS_FILE);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let data = fs::read_to_string(&path)?;
    serde_json::from_str(&data).map_err(|e| {
        AppError::Config(format!("Invalid settings {}: {e}", path.display()))
    })
}

/// Load the domain mappings file.
///
/// Lookups must never fail because of this file: a missing file is an empty
/// mapping, and a malformed one is reported and treated as empty.
pub fn load_mappings(path: &Path) -> Mappings {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Mappings::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read domain mappings");
            return Mappings::new();
        }
    };

    match serde_json::from_str(&data) {
        Ok(mappings) => mappings,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "domain mappings file is malformed");
            Mappings::new()
        }
    }
}

/// Persist mappings, creating the parent directory if needed.
pub fn save_mappings(path: &Path, mappings: &Mappings) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(mappings)?;
    fs::write(path, data)?;
    Ok(())
}
