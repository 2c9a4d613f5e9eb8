//! Bind and unbind site domains in the hosts file.
//!
//! Every operation reads the file fresh, rewrites the line list in memory,
//! and either returns the result as a preview or hands it to
//! [`commit::commit`]. Only whole files are ever written.

use crate::commit::{self, FileAccess};
use crate::domains;
use crate::elevation::Elevator;
use crate::hosts::{self, HostsEntry, Upsert};
use crate::resolver::{Resolution, Resolver};
use crate::AppError;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What [`HostsEditor::unbind`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbindTarget {
    /// The domain, its subdomains, and its parent domains.
    Domain(String),
    /// Every entry for any tracked domain.
    AllTracked,
}

impl fmt::Display for UnbindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnbindTarget::Domain(d) => f.write_str(d),
            UnbindTarget::AllTracked => f.write_str("any tracked domain"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub domain: String,
    pub resolution: Resolution,
    pub change: Upsert,
}

#[derive(Debug, Clone)]
pub struct BindOutcome {
    pub bound: Vec<Binding>,
    /// Domains skipped because no source produced an address.
    pub unresolved: Vec<String>,
    /// The full new file content.
    pub content: Vec<u8>,
    /// Set when the change was committed.
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct UnbindOutcome {
    pub removed: Vec<HostsEntry>,
    pub content: Vec<u8>,
    pub backup: Option<PathBuf>,
}

pub struct HostsEditor {
    path: PathBuf,
    tracked: Vec<String>,
    resolver: Resolver,
    files: Box<dyn FileAccess>,
    elevator: Box<dyn Elevator>,
}

impl HostsEditor {
    pub fn new(
        path: impl Into<PathBuf>,
        tracked: Vec<String>,
        resolver: Resolver,
        files: Box<dyn FileAccess>,
        elevator: Box<dyn Elevator>,
    ) -> Self {
        Self {
            path: path.into(),
            tracked,
            resolver,
            files,
            elevator,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    fn read_lines(&self) -> Result<Vec<Vec<u8>>, AppError> {
        let bytes = self.files.read(&self.path).map_err(|e| {
            AppError::Hosts(format!("Cannot read {}: {e}", self.path.display()))
        })?;
        Ok(hosts::split_lines(&bytes))
    }

    /// Active entries for tracked domains and their subdomains, keyed by
    /// lower-cased hostname.
    pub fn list_tracked_bindings(&self) -> Result<BTreeMap<String, HostsEntry>, AppError> {
        let lines = self.read_lines()?;
        Ok(hosts::tracked_entries(&lines, &self.tracked))
    }

    /// The first active entry for exactly `domain`, tracked or not.
    pub fn binding_for(&self, domain: &str) -> Result<Option<HostsEntry>, AppError> {
        let lines = self.read_lines()?;
        Ok(lines.iter().enumerate().find_map(|(idx, line)| {
            let (ip, hostname) = hosts::parse_raw(line)?;
            hostname.eq_ignore_ascii_case(domain).then(|| HostsEntry {
                ip,
                hostname: hostname.to_string(),
                line: idx + 1,
            })
        }))
    }

    /// Resolve each domain and pin it in the hosts file.
    ///
    /// Domains that cannot be resolved are skipped; if none resolve the call
    /// fails with [`AppError::Unresolved`]. Without `commit` only the preview
    /// is produced.
    pub fn bind(
        &self,
        domains: &[String],
        prefer_config: bool,
        commit: bool,
    ) -> Result<BindOutcome, AppError> {
        if domains.is_empty() {
            return Err(AppError::Hosts("No domains to bind".into()));
        }

        let mut lines = self.read_lines()?;
        let mut bound = Vec::new();
        let mut unresolved = Vec::new();
        let mut seen: Vec<String> = Vec::new();

        for domain in domains {
            let domain = domain.trim().to_lowercase();
            if seen.contains(&domain) {
                continue;
            }
            seen.push(domain.clone());

            let resolution = self.resolver.resolve(&domain, prefer_config);
            let Some(ip) = resolution.ip else {
                warn!(domain = %domain, "no address found, skipping");
                unresolved.push(domain);
                continue;
            };

            let change = hosts::upsert(&mut lines, &domain, ip);
            info!(domain = %domain, %ip, source = %resolution.source, ?change, "binding");
            bound.push(Binding {
                domain,
                resolution,
                change,
            });
        }

        if bound.is_empty() {
            return Err(AppError::Unresolved(unresolved));
        }

        let content = hosts::join_lines(&lines);
        let backup = if commit {
            Some(self.commit(&content)?)
        } else {
            None
        };

        Ok(BindOutcome {
            bound,
            unresolved,
            content,
            backup,
        })
    }

    /// Remove entries for `target`. Finding nothing to remove is reported as
    /// [`AppError::NoMatch`].
    pub fn unbind(&self, target: &UnbindTarget, commit: bool) -> Result<UnbindOutcome, AppError> {
        let mut lines = self.read_lines()?;

        let removed = match target {
            UnbindTarget::Domain(domain) => {
                let domain = domain.trim().to_lowercase();
                hosts::remove_where(&mut lines, |host| {
                    domains::matches_bidirectional(host, &domain)
                })
            }
            UnbindTarget::AllTracked => {
                hosts::remove_where(&mut lines, |host| domains::is_tracked(host, &self.tracked))
            }
        };

        if removed.is_empty() {
            return Err(AppError::NoMatch(target.to_string()));
        }
        for entry in &removed {
            info!(ip = %entry.ip, host = %entry.hostname, line = entry.line, "removing");
        }

        let content = hosts::join_lines(&lines);
        let backup = if commit {
            Some(self.commit(&content)?)
        } else {
            None
        };

        Ok(UnbindOutcome {
            removed,
            content,
            backup,
        })
    }

    fn commit(&self, content: &[u8]) -> Result<PathBuf, AppError> {
        Ok(commit::commit(
            self.files.as_ref(),
            self.elevator.as_ref(),
            &self.path,
            content,
        )?)
    }
}
