//! IP lookup strategies used by the resolver cascade.
//!
//! Each strategy answers one question, "what IPv4 address does this domain
//! have?", and reports failure as a [`LookupError`] the resolver logs and
//! skips. The HTTP services are untrusted: every candidate is validated and
//! loopback/private answers are rejected.

use crate::domains;
use crate::resolver::Source;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, REFERER};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Node latency assumed when a ping result omits it.
const UNKNOWN_LATENCY: f64 = 999.0;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("service reported failure: {0}")]
    Service(String),

    #[error("no usable IPv4 address in response")]
    NoAddress,

    #[error("DNS resolution failed: {0}")]
    Dns(#[from] std::io::Error),
}

/// One source in the resolution cascade.
pub trait IpLookup: Send + Sync {
    /// Tag reported alongside a successful answer.
    fn source(&self) -> Source;

    fn lookup(&self, domain: &str) -> Result<Ipv4Addr, LookupError>;
}

/// Shared blocking client for the HTTP services.
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder().user_agent(USER_AGENT).build()
}

/// A candidate from an untrusted service is usable if it is IPv4 and public.
fn accept(candidate: &str) -> Option<Ipv4Addr> {
    domains::parse_ipv4(candidate).filter(|ip| !domains::is_rejected_address(*ip))
}

fn dotted_quad() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("dotted-quad pattern is valid"))
}

/// First acceptable dotted quad anywhere in `text`.
pub fn scan_for_ipv4(text: &str) -> Option<Ipv4Addr> {
    dotted_quad().find_iter(text).find_map(|m| accept(m.as_str()))
}

fn expect_success(response: reqwest::blocking::Response) -> Result<String, LookupError> {
    let status = response.status();
    if !status.is_success() {
        return Err(LookupError::Status(status.as_u16()));
    }
    Ok(response.text()?)
}

// =========================================================================
// 17ce.com — multi-node ping service
// =========================================================================

#[derive(Deserialize)]
struct PingReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Vec<PingNode>,
}

#[derive(Deserialize)]
struct PingNode {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    time: Option<f64>,
}

/// Fastest node address from a 17ce ping reply, falling back to scanning the
/// raw body when it is not the expected JSON.
pub fn parse_17ce_ping(body: &str) -> Option<Ipv4Addr> {
    if let Ok(reply) = serde_json::from_str::<PingReply>(body) {
        if reply.status.as_deref() == Some("success") {
            let mut nodes = reply.data;
            nodes.sort_by(|a, b| {
                let a = a.time.unwrap_or(UNKNOWN_LATENCY);
                let b = b.time.unwrap_or(UNKNOWN_LATENCY);
                a.total_cmp(&b)
            });
            if let Some(ip) = nodes.iter().find_map(|n| n.ip.as_deref().and_then(accept)) {
                return Some(ip);
            }
        }
    }
    scan_for_ipv4(body)
}

pub struct SeventeenCe {
    client: Client,
    base_url: String,
}

impl SeventeenCe {
    pub const BASE_URL: &'static str = "http://17ce.com";

    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn ping(&self, domain: &str) -> Result<Ipv4Addr, LookupError> {
        let response = self
            .client
            .post(format!("{}/site/ping", self.base_url))
            .timeout(Duration::from_secs(15))
            .header(REFERER, format!("{}/", self.base_url))
            .header(ACCEPT, "application/json, text/html, */*")
            .form(&[("url", domain), ("type", "ping")])
            .send()?;
        let body = expect_success(response)?;
        parse_17ce_ping(&body).ok_or(LookupError::NoAddress)
    }

    fn site_page(&self, domain: &str) -> Result<Ipv4Addr, LookupError> {
        let response = self
            .client
            .get(format!("{}/site/{domain}", self.base_url))
            .timeout(Duration::from_secs(10))
            .header(REFERER, format!("{}/", self.base_url))
            .send()?;
        let body = expect_success(response)?;
        scan_for_ipv4(&body).ok_or(LookupError::NoAddress)
    }
}

impl IpLookup for SeventeenCe {
    fn source(&self) -> Source {
        Source::SeventeenCe
    }

    fn lookup(&self, domain: &str) -> Result<Ipv4Addr, LookupError> {
        match self.ping(domain) {
            Ok(ip) => Ok(ip),
            Err(e) => {
                debug!(domain, error = %e, "17ce ping failed, trying site page");
                self.site_page(domain)
            }
        }
    }
}

// =========================================================================
// ip-api.com
// =========================================================================

#[derive(Deserialize)]
struct IpApiReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

pub fn parse_ip_api(body: &str) -> Result<Ipv4Addr, LookupError> {
    let reply: IpApiReply =
        serde_json::from_str(body).map_err(|e| LookupError::Service(e.to_string()))?;
    if reply.status.as_deref() != Some("success") {
        return Err(LookupError::Service(
            reply.message.unwrap_or_else(|| "status is not success".into()),
        ));
    }
    reply
        .query
        .as_deref()
        .and_then(accept)
        .ok_or(LookupError::NoAddress)
}

pub struct IpApi {
    client: Client,
    base_url: String,
}

impl IpApi {
    pub const BASE_URL: &'static str = "http://ip-api.com";

    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl IpLookup for IpApi {
    fn source(&self) -> Source {
        Source::IpApi
    }

    fn lookup(&self, domain: &str) -> Result<Ipv4Addr, LookupError> {
        let response = self
            .client
            .get(format!("{}/json/{domain}", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()?;
        parse_ip_api(&expect_success(response)?)
    }
}

// =========================================================================
// ipapi.co
// =========================================================================

#[derive(Deserialize)]
struct IpApiCoReply {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

pub fn parse_ipapi_co(body: &str) -> Result<Ipv4Addr, LookupError> {
    let reply: IpApiCoReply =
        serde_json::from_str(body).map_err(|e| LookupError::Service(e.to_string()))?;
    if reply.error.as_ref().is_some_and(truthy) {
        return Err(LookupError::Service(
            reply.reason.unwrap_or_else(|| "error flag set".into()),
        ));
    }
    reply
        .ip
        .as_deref()
        .and_then(accept)
        .ok_or(LookupError::NoAddress)
}

pub struct IpApiCo {
    client: Client,
    base_url: String,
}

impl IpApiCo {
    pub const BASE_URL: &'static str = "https://ipapi.co";

    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl IpLookup for IpApiCo {
    fn source(&self) -> Source {
        Source::IpApiCo
    }

    fn lookup(&self, domain: &str) -> Result<Ipv4Addr, LookupError> {
        let response = self
            .client
            .get(format!("{}/{domain}/json/", self.base_url))
            .timeout(Duration::from_secs(10))
            .send()?;
        parse_ipapi_co(&expect_success(response)?)
    }
}

// =========================================================================
// Local DNS — last resort
// =========================================================================

/// System resolver (getaddrinfo). Often fails on the networks this tool is
/// used on, which is why it runs last.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDns;

/// First IPv4 answer from the system resolver.
pub fn resolve_system(domain: &str) -> Result<Ipv4Addr, LookupError> {
    let addrs = (domain, 0u16).to_socket_addrs()?;
    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or(LookupError::NoAddress)
}

impl IpLookup for LocalDns {
    fn source(&self) -> Source {
        Source::LocalDns
    }

    fn lookup(&self, domain: &str) -> Result<Ipv4Addr, LookupError> {
        resolve_system(domain)
    }
}
