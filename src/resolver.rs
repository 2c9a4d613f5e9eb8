//! Domain → IPv4 resolution through a prioritized cascade of sources.
//!
//! Order: local mappings file (optional), the HTTP lookup services in their
//! configured order, then local DNS. The first answer wins; every failure
//! only moves the cascade on, so `resolve` itself never errors.

use crate::config;
use crate::domains;
use crate::lookup::{self, IpApi, IpApiCo, IpLookup, LocalDns, SeventeenCe};
use crate::AppError;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where a resolved address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    ConfigFile,
    SeventeenCe,
    IpApi,
    IpApiCo,
    LocalDns,
    Failed,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::ConfigFile => "config file",
            Source::SeventeenCe => "17ce.com",
            Source::IpApi => "ip-api.com",
            Source::IpApiCo => "ipapi.co",
            Source::LocalDns => "local DNS",
            Source::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub ip: Option<Ipv4Addr>,
    pub source: Source,
}

impl Resolution {
    pub fn found(ip: Ipv4Addr, source: Source) -> Self {
        Self {
            ip: Some(ip),
            source,
        }
    }

    pub fn failed() -> Self {
        Self {
            ip: None,
            source: Source::Failed,
        }
    }
}

pub struct Resolver {
    mappings_path: PathBuf,
    lookups: Vec<Box<dyn IpLookup>>,
}

impl Resolver {
    /// Build a resolver over an explicit, ordered list of lookup strategies.
    pub fn new(mappings_path: impl Into<PathBuf>, lookups: Vec<Box<dyn IpLookup>>) -> Self {
        Self {
            mappings_path: mappings_path.into(),
            lookups,
        }
    }

    /// The production cascade: 17ce.com, ip-api.com, ipapi.co, local DNS.
    pub fn with_default_lookups(mappings_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let client = lookup::http_client()?;
        Ok(Self::new(
            mappings_path,
            vec![
                Box::new(SeventeenCe::new(client.clone(), SeventeenCe::BASE_URL)),
                Box::new(IpApi::new(client.clone(), IpApi::BASE_URL)),
                Box::new(IpApiCo::new(client, IpApiCo::BASE_URL)),
                Box::new(LocalDns),
            ],
        ))
    }

    pub fn resolve(&self, domain: &str, prefer_config: bool) -> Resolution {
        if prefer_config {
            if let Some(ip) = self.from_config(domain) {
                info!(domain, %ip, "using configured address");
                return Resolution::found(ip, Source::ConfigFile);
            }
        }

        for lookup in &self.lookups {
            let source = lookup.source();
            debug!(domain, %source, "querying");
            match lookup.lookup(domain) {
                Ok(ip) => {
                    info!(domain, %ip, %source, "resolved");
                    return Resolution::found(ip, source);
                }
                Err(e) => debug!(domain, %source, error = %e, "lookup failed"),
            }
        }

        warn!(domain, "every source failed; consider adding it to the mappings file");
        Resolution::failed()
    }

    fn from_config(&self, domain: &str) -> Option<Ipv4Addr> {
        let mappings = config::load_mappings(&self.mappings_path);
        let value = mappings
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(domain))
            .map(|(_, v)| v.trim())?;
        if value.is_empty() {
            return None;
        }
        match domains::parse_ipv4(value) {
            Some(ip) => Some(ip),
            None => {
                warn!(domain, value, "ignoring configured value that is not IPv4");
                None
            }
        }
    }
}
