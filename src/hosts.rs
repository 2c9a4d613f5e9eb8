//! Hosts-file parsing and line-level rewrites.
//!
//! Content is handled as raw byte lines that keep their own terminators, so
//! every line this module does not touch is written back byte-for-byte, in
//! whatever encoding the file uses. Only the part of a line before `#` is
//! ever decoded.

use crate::domains;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// One active hosts line for a hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsEntry {
    pub ip: Ipv4Addr,
    pub hostname: String,
    /// 1-based line number in the file the entry was read from.
    pub line: usize,
}

/// What [`upsert`] did with a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    /// Replaced the first entry; `stale` more duplicates were dropped.
    Replaced { stale: usize },
}

/// Parse one hosts line into `(ip, hostname)`.
///
/// Blank lines, comments, lines without a hostname, and lines whose address
/// is not IPv4 yield `None`. Only the first hostname on a line is considered.
pub fn parse_line(line: &str) -> Option<(Ipv4Addr, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let active = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };

    let mut parts = active.split_whitespace();
    let ip = domains::parse_ipv4(parts.next()?)?;
    let hostname = parts.next()?;
    Some((ip, hostname))
}

/// [`parse_line`] on a raw line. Comment bytes are never decoded; a line
/// whose active part is not UTF-8 is not an entry.
pub fn parse_raw(line: &[u8]) -> Option<(Ipv4Addr, &str)> {
    let active = match line.iter().position(|&b| b == b'#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    std::str::from_utf8(active).ok().and_then(parse_line)
}

/// Split content into lines, each keeping its terminator.
pub fn split_lines(content: &[u8]) -> Vec<Vec<u8>> {
    content
        .split_inclusive(|&b| b == b'\n')
        .map(<[u8]>::to_vec)
        .collect()
}

pub fn join_lines(lines: &[Vec<u8>]) -> Vec<u8> {
    lines.concat()
}

/// The line terminator the file already uses.
fn newline_of(lines: &[Vec<u8>]) -> &'static [u8] {
    if lines.iter().any(|l| l.ends_with(b"\r\n")) {
        b"\r\n"
    } else {
        b"\n"
    }
}

/// Hosts line for a binding, without terminator.
pub fn format_entry(ip: Ipv4Addr, domain: &str) -> String {
    format!("{ip}\t{domain}")
}

/// Every active entry whose hostname is a tracked domain or a subdomain of one.
/// When a hostname appears more than once, the first line wins.
pub fn tracked_entries(lines: &[Vec<u8>], tracked: &[String]) -> BTreeMap<String, HostsEntry> {
    let mut out = BTreeMap::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some((ip, hostname)) = parse_raw(line) else {
            continue;
        };
        if !domains::is_tracked(hostname, tracked) {
            continue;
        }
        out.entry(hostname.to_lowercase()).or_insert_with(|| HostsEntry {
            ip,
            hostname: hostname.to_string(),
            line: idx + 1,
        });
    }

    out
}

/// Bind `domain` to `ip`: the first line for `domain` is replaced in place and
/// any further lines for it are dropped; with no existing line, one is appended.
pub fn upsert(lines: &mut Vec<Vec<u8>>, domain: &str, ip: Ipv4Addr) -> Upsert {
    let nl = newline_of(lines);
    let fresh = [format_entry(ip, domain).as_bytes(), nl].concat();

    let mut replaced = false;
    let mut stale = 0;
    let mut out = Vec::with_capacity(lines.len() + 1);

    for line in lines.drain(..) {
        let same = parse_raw(&line).is_some_and(|(_, host)| host.eq_ignore_ascii_case(domain));
        if !same {
            out.push(line);
        } else if !replaced {
            out.push(fresh.clone());
            replaced = true;
        } else {
            stale += 1;
        }
    }
    *lines = out;

    if replaced {
        return Upsert::Replaced { stale };
    }

    // Ensure a trailing newline before appending our entry.
    if let Some(last) = lines.last_mut() {
        if !last.ends_with(b"\n") {
            last.extend_from_slice(nl);
        }
    }
    lines.push(fresh);
    Upsert::Added
}

/// Remove every active line whose hostname satisfies `matches`, returning the
/// removed entries with their original line numbers.
pub fn remove_where(lines: &mut Vec<Vec<u8>>, matches: impl Fn(&str) -> bool) -> Vec<HostsEntry> {
    let mut removed = Vec::new();
    let mut line_no = 0;

    lines.retain(|line| {
        line_no += 1;
        match parse_raw(line) {
            Some((ip, hostname)) if matches(hostname) => {
                removed.push(HostsEntry {
                    ip,
                    hostname: hostname.to_string(),
                    line: line_no,
                });
                false
            }
            _ => true,
        }
    });

    removed
}
