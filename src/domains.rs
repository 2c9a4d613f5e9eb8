//! Tracked domains, support problems, and domain/address predicates.

use crate::AppError;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Domains whose hosts entries this tool reports on and may remove.
pub const TRACKED_DOMAINS: &[&str] = &[
    "preview.qiantucdn.com",
    "js.qiantucdn.com",
    "icon.qiantucdn.com",
    "dl.58pic.com",
    "y.58pic.com",
    "proxy-rar.58pic.com",
    "proxy-vip.58pic.com",
    "proxy-vd.58pic.com",
    "58pic.com",
    "qiantucdn.com",
];

/// Default tracked list plus any extras, lower-cased and de-duplicated.
pub fn tracked_domains(extra: &[String]) -> Vec<String> {
    let mut out: Vec<String> = TRACKED_DOMAINS.iter().map(|d| d.to_string()).collect();
    for domain in extra {
        let domain = domain.trim().to_lowercase();
        if !domain.is_empty() && !out.contains(&domain) {
            out.push(domain);
        }
    }
    out
}

/// `host` is `domain` or one of its subdomains.
pub fn is_same_or_subdomain(host: &str, domain: &str) -> bool {
    if host.eq_ignore_ascii_case(domain) {
        return true;
    }
    let Some(dot) = host.len().checked_sub(domain.len() + 1) else {
        return false;
    };
    host.as_bytes()[dot] == b'.'
        && host
            .get(dot + 1..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(domain))
}

/// `host` matches any tracked domain exactly or as a subdomain.
pub fn is_tracked(host: &str, tracked: &[String]) -> bool {
    tracked.iter().any(|d| is_same_or_subdomain(host, d))
}

/// Removal match: equal, subdomain, or parent domain of `target`.
///
/// The parent direction means unbinding `a.b.58pic.com` also drops a bare
/// `58pic.com` line.
pub fn matches_bidirectional(host: &str, target: &str) -> bool {
    is_same_or_subdomain(host, target) || is_same_or_subdomain(target, host)
}

/// Parse a strict dotted-quad IPv4 address.
pub fn parse_ipv4(candidate: &str) -> Option<Ipv4Addr> {
    Ipv4Addr::from_str(candidate.trim()).ok()
}

/// Addresses a lookup service may return that are never the real site:
/// `0.x`, loopback, and the private ranges. All of `172.x` is excluded.
pub fn is_rejected_address(ip: Ipv4Addr) -> bool {
    matches!(ip.octets(), [0, ..] | [127, ..] | [10, ..] | [172, ..] | [192, 168, ..])
}

// =========================================================================
// Support problems
// =========================================================================

/// What a problem asks the editor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Bind,
    Unbind,
}

/// A support scenario reported by a user, mapped to the domains it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    Preview,
    Js,
    Icon,
    Download,
    Cloud,
    MainSite,
    DownloadFail,
    UnbindPreview,
}

impl Problem {
    pub const ALL: [Problem; 8] = [
        Problem::Preview,
        Problem::Js,
        Problem::Icon,
        Problem::Download,
        Problem::Cloud,
        Problem::MainSite,
        Problem::DownloadFail,
        Problem::UnbindPreview,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Problem::Preview => "preview",
            Problem::Js => "js",
            Problem::Icon => "icon",
            Problem::Download => "download",
            Problem::Cloud => "cloud",
            Problem::MainSite => "main-site",
            Problem::DownloadFail => "download-fail",
            Problem::UnbindPreview => "unbind-preview",
        }
    }

    pub fn symptom(self) -> &'static str {
        match self {
            Problem::Preview => "Card preview images missing or loading slowly",
            Problem::Js => "Download page styling is broken",
            Problem::Icon => "Main site styling is lost",
            Problem::Download => "Download page cannot be reached",
            Problem::Cloud => "Cloud design home page cannot be reached",
            Problem::MainSite => "Main site does not open",
            Problem::DownloadFail => "Downloads fail with network errors or interruptions",
            Problem::UnbindPreview => "Home page cards do not load but their labels show",
        }
    }

    pub fn domains(self) -> &'static [&'static str] {
        match self {
            Problem::Preview | Problem::UnbindPreview => &["preview.qiantucdn.com"],
            Problem::Js => &["js.qiantucdn.com"],
            Problem::Icon => &["icon.qiantucdn.com"],
            Problem::Download => &["dl.58pic.com"],
            Problem::Cloud => &["y.58pic.com"],
            Problem::MainSite => &["www.58pic.com", "qiye.58pic.com"],
            Problem::DownloadFail => &[
                "proxy-rar.58pic.com",
                "proxy-vip.58pic.com",
                "proxy-vd.58pic.com",
            ],
        }
    }

    pub fn action(self) -> Action {
        match self {
            Problem::UnbindPreview => Action::Unbind,
            _ => Action::Bind,
        }
    }
}

impl FromStr for Problem {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Problem::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| AppError::UnknownProblem(s.to_string()))
    }
}
