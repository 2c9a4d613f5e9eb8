//! Background diagnostic report.
//!
//! Gathers environment facts step by step on a worker thread and streams
//! progress back to the caller, which stays free to render it. The worker
//! only reads; it never touches the hosts file.

use crate::config;
use crate::hosts::{self, HostsEntry};
use crate::lookup::IpLookup;
use crate::platform;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing::debug;

/// Inputs for one report run.
pub struct ReportRequest {
    pub hosts_path: PathBuf,
    pub mappings_path: PathBuf,
    pub tracked: Vec<String>,
    /// Resolver used to show what the local network answers for each domain.
    pub dns: Box<dyn IpLookup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub step: usize,
    pub total: usize,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub os: String,
    pub elevated: bool,
    pub hosts_path: PathBuf,
    /// Line count, or why the file could not be read.
    pub hosts_lines: Result<usize, String>,
    pub bindings: BTreeMap<String, HostsEntry>,
    pub mapping_count: usize,
    pub dns: Vec<(String, Result<Ipv4Addr, String>)>,
}

/// Start the report on a worker thread.
pub fn spawn(request: ReportRequest) -> (thread::JoinHandle<Report>, Receiver<Progress>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        gather(request, |progress| {
            // The receiver may have stopped listening; the report is still returned.
            let _ = tx.send(progress);
        })
    });
    (handle, rx)
}

/// Run every step on the current thread, reporting progress as it goes.
pub fn gather(request: ReportRequest, mut on_progress: impl FnMut(Progress)) -> Report {
    let total = 4 + request.tracked.len();
    let mut step = 0;
    let mut advance = |label: String| {
        step += 1;
        debug!(step, total, %label, "report progress");
        on_progress(Progress { step, total, label });
    };

    advance("Detecting platform".into());
    let os = platform::os_description();

    advance("Checking privileges".into());
    let elevated = platform::is_elevated();

    advance(format!("Reading {}", request.hosts_path.display()));
    let (hosts_lines, bindings) = match fs::read(&request.hosts_path) {
        Ok(bytes) => {
            let lines = hosts::split_lines(&bytes);
            let bindings = hosts::tracked_entries(&lines, &request.tracked);
            (Ok(lines.len()), bindings)
        }
        Err(e) => (Err(e.to_string()), BTreeMap::new()),
    };

    advance("Loading domain mappings".into());
    let mapping_count = config::load_mappings(&request.mappings_path).len();

    let mut dns = Vec::with_capacity(request.tracked.len());
    for domain in &request.tracked {
        advance(format!("Resolving {domain}"));
        let answer = request.dns.lookup(domain).map_err(|e| e.to_string());
        dns.push((domain.clone(), answer));
    }

    Report {
        os,
        elevated,
        hosts_path: request.hosts_path,
        hosts_lines,
        bindings,
        mapping_count,
        dns,
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Platform:        {}", self.os)?;
        writeln!(f, "Administrator:   {}", if self.elevated { "yes" } else { "no" })?;
        writeln!(f, "Hosts file:      {}", self.hosts_path.display())?;
        match &self.hosts_lines {
            Ok(n) => writeln!(f, "Hosts lines:     {n}")?,
            Err(e) => writeln!(f, "Hosts lines:     unreadable ({e})")?,
        }
        writeln!(f, "Domain mappings: {}", self.mapping_count)?;

        writeln!(f)?;
        if self.bindings.is_empty() {
            writeln!(f, "No site bindings in the hosts file.")?;
        } else {
            writeln!(f, "Site bindings:")?;
            for (host, entry) in &self.bindings {
                writeln!(f, "  {host:<30} {:<16} line {}", entry.ip, entry.line)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Local DNS answers:")?;
        for (domain, answer) in &self.dns {
            match answer {
                Ok(ip) => writeln!(f, "  {domain:<30} {ip}")?,
                Err(e) => writeln!(f, "  {domain:<30} unresolved ({e})")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::LookupError;
    use crate::resolver::Source;

    struct Table;

    impl IpLookup for Table {
        fn source(&self) -> Source {
            Source::LocalDns
        }

        fn lookup(&self, domain: &str) -> Result<Ipv4Addr, LookupError> {
            match domain {
                "dl.58pic.com" => Ok(Ipv4Addr::new(5, 6, 7, 8)),
                _ => Err(LookupError::NoAddress),
            }
        }
    }

    fn request(dir: &std::path::Path) -> ReportRequest {
        let hosts_path = dir.join("hosts");
        fs::write(&hosts_path, "127.0.0.1 localhost\n1.2.3.4 dl.58pic.com\n").unwrap();
        ReportRequest {
            hosts_path,
            mappings_path: dir.join("domain_mappings.json"),
            tracked: vec!["dl.58pic.com".into(), "y.58pic.com".into()],
            dns: Box::new(Table),
        }
    }

    #[test]
    fn worker_streams_every_step_then_returns_report() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, progress) = spawn(request(dir.path()));

        let events: Vec<Progress> = progress.iter().collect();
        let report = handle.join().unwrap();

        assert_eq!(events.len(), 6);
        assert!(events.iter().enumerate().all(|(i, p)| p.step == i + 1 && p.total == 6));
        assert_eq!(events[5].label, "Resolving y.58pic.com");

        assert_eq!(report.hosts_lines, Ok(2));
        assert_eq!(report.bindings["dl.58pic.com"].ip, Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(report.mapping_count, 0);
        assert_eq!(report.dns[0].1, Ok(Ipv4Addr::new(5, 6, 7, 8)));
        assert!(report.dns[1].1.is_err());
    }

    #[test]
    fn unreadable_hosts_file_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path());
        req.hosts_path = dir.path().join("missing");

        let report = gather(req, |_| {});
        assert!(report.hosts_lines.is_err());
        assert!(report.bindings.is_empty());
        assert!(report.to_string().contains("unreadable"));
    }
}
