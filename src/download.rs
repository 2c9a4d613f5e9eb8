//! Download failure diagnosis.
//!
//! Given the link of a download that failed, work out which host served it
//! and whether that host is one of the download proxies that need a hosts
//! binding. Also looks for third-party download managers, which intercept
//! browser downloads and break the proxies' signed links.

use crate::domains::{self, Problem};
use std::path::Path;
use url::Url;

/// Result of checking one download link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCheck {
    pub url: String,
    /// Host the link points at, lower-cased. `None` when the link is unusable.
    pub domain: Option<String>,
    /// The download proxy the host belongs to.
    pub proxy: Option<&'static str>,
}

impl DownloadCheck {
    /// The host is a download proxy and should be pinned in the hosts file.
    pub fn needs_hosts_bind(&self) -> bool {
        self.proxy.is_some()
    }
}

/// Host part of a download link. Links pasted without a scheme are read as
/// `http://`.
pub fn domain_of(link: &str) -> Option<String> {
    let link = link.trim();
    let parsed = if link.contains("://") {
        Url::parse(link)
    } else {
        Url::parse(&format!("http://{link}"))
    };
    let host = parsed.ok()?.host_str()?.to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

pub fn check_download_url(link: &str) -> DownloadCheck {
    let domain = domain_of(link);
    let proxy = domain.as_deref().and_then(|host| {
        Problem::DownloadFail
            .domains()
            .iter()
            .copied()
            .find(|proxy| domains::is_same_or_subdomain(host, proxy))
    });

    DownloadCheck {
        url: link.to_string(),
        domain,
        proxy,
    }
}

/// Install locations of download managers known to hijack browser downloads.
#[cfg(windows)]
const DOWNLOAD_MANAGERS: &[(&str, &str)] = &[
    ("Thunder", r"C:\Program Files\Thunder Network"),
    ("Thunder", r"C:\Program Files (x86)\Thunder Network"),
];

#[cfg(target_os = "macos")]
const DOWNLOAD_MANAGERS: &[(&str, &str)] = &[("Thunder", "/Applications/Thunder.app")];

#[cfg(not(any(windows, target_os = "macos")))]
const DOWNLOAD_MANAGERS: &[(&str, &str)] = &[];

/// Download managers installed on this machine, by name.
pub fn installed_download_managers() -> Vec<&'static str> {
    installed_under(DOWNLOAD_MANAGERS, Path::exists)
}

fn installed_under(
    candidates: &[(&'static str, &str)],
    exists: impl Fn(&Path) -> bool,
) -> Vec<&'static str> {
    let mut found = Vec::new();
    for (name, path) in candidates {
        if !found.contains(name) && exists(Path::new(path)) {
            found.push(*name);
        }
    }
    found
}
