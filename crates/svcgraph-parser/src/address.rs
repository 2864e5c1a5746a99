//! Recognition of network addresses inside literals, environment values and
//! command lines.
//!
//! Two shapes are accepted: `scheme://[user@]host[:port][/path]` and bare
//! `host:port[/path]`. Byte ranges are kept for every component so callers
//! can point at (and later mask) the exact port or host text.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use svcgraph_core::TargetRef;

static SCHEMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*)://(?:[^@/\s'\x22]*@)?(?P<host>[A-Za-z0-9_][A-Za-z0-9_.\-]*)(?::(?P<port>\d{1,5}))?(?P<path>/[^\s'\x22`?#]*)?",
    )
    .expect("valid regex")
});

static HOST_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<host>[A-Za-z][A-Za-z0-9_.\-]*):(?P<port>\d{1,5})(?P<path>/[^\s'\x22`?#]*)?")
        .expect("valid regex")
});

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9\-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9\-]*[a-z0-9])?)+$")
        .expect("valid regex")
});

static BARE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_\-]*$").expect("valid regex"));

/// Hosts that always mean "this container" and never another service.
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "::1"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMatch {
    pub scheme: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path: Option<String>,
    /// Whole match.
    pub range: Range<usize>,
    pub host_range: Range<usize>,
    pub port_range: Option<Range<usize>>,
    pub path_range: Option<Range<usize>>,
}

impl AddressMatch {
    /// Whether this address may point at another service. Every scheme
    /// counts, databases and brokers included; loopback hosts never do.
    /// Code and manifest scanners share this rule.
    pub fn names_peer(&self) -> bool {
        !is_local_host(&self.host)
    }

    pub fn target(&self) -> TargetRef {
        TargetRef::Address {
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone().filter(|p| p != "/"),
        }
    }
}

fn capture(
    caps: &regex::Captures<'_>,
    scheme: Option<String>,
) -> Option<AddressMatch> {
    let whole = caps.get(0)?;
    let host = caps.name("host")?;
    let port = caps.name("port");
    let port_value = match port {
        Some(p) => Some(p.as_str().parse::<u16>().ok()?),
        None => None,
    };
    let path = caps.name("path");
    Some(AddressMatch {
        scheme,
        host: host.as_str().to_ascii_lowercase(),
        port: port_value,
        path: path.map(|p| p.as_str().to_string()),
        range: whole.range(),
        host_range: host.range(),
        port_range: port.map(|p| p.range()),
        path_range: path.map(|p| p.range()),
    })
}

/// Parses `text` as exactly one address (surrounding whitespace allowed).
pub fn parse_address(text: &str) -> Option<AddressMatch> {
    let trimmed = text.trim();
    let offset = text.len() - text.trim_start().len();
    let found = find_addresses(trimmed).into_iter().next()?;
    if found.range != (0..trimmed.len()) {
        return None;
    }
    if let Some(scheme) = &found.scheme {
        // Let the url crate reject things the regex is too lax about.
        if matches!(scheme.as_str(), "http" | "https") && url::Url::parse(trimmed).is_err() {
            return None;
        }
    }
    Some(shift(found, offset))
}

/// Every address in `text`, left to right, without overlaps.
pub fn find_addresses(text: &str) -> Vec<AddressMatch> {
    let mut found: Vec<AddressMatch> = SCHEMED
        .captures_iter(text)
        .filter_map(|caps| {
            let scheme = caps.name("scheme")?.as_str().to_string();
            capture(&caps, Some(scheme))
        })
        .collect();

    for caps in HOST_PORT.captures_iter(text) {
        let Some(m) = capture(&caps, None) else {
            continue;
        };
        let overlaps = found
            .iter()
            .any(|f| m.range.start < f.range.end && f.range.start < m.range.end);
        // `a:1` inside a longer word, or a time like `10:30`, is not an address.
        let preceded_by_word = text[..m.range.start]
            .chars()
            .last()
            .map(|c| c.is_alphanumeric() || c == ':' || c == '/' || c == '@' || c == '.')
            .unwrap_or(false);
        if !overlaps && !preceded_by_word {
            found.push(m);
        }
    }

    found.sort_by_key(|m| m.range.start);
    found
}

fn shift(mut m: AddressMatch, offset: usize) -> AddressMatch {
    let mv = |r: Range<usize>| (r.start + offset)..(r.end + offset);
    m.range = mv(m.range);
    m.host_range = mv(m.host_range);
    m.port_range = m.port_range.map(mv);
    m.path_range = m.path_range.map(mv);
    m
}

/// `users.internal.svc`: a DNS-style name with at least one dot.
pub fn looks_like_hostname(value: &str) -> bool {
    let value = value.trim();
    HOSTNAME.is_match(value) && !value.split('.').all(|l| l.chars().all(|c| c.is_ascii_digit()))
}

/// A single lowercase identifier such as `users` or `order-service`.
pub fn is_bare_word(value: &str) -> bool {
    BARE_WORD.is_match(value.trim())
}

pub fn is_local_host(host: &str) -> bool {
    LOCAL_HOSTS.contains(&host.trim().to_ascii_lowercase().as_str())
}

/// First DNS label: `users.default.svc.cluster.local` → `users`.
pub fn first_label(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}
