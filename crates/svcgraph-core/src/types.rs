use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type EdgeId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub end_line: Option<u32>,
    pub end_column: Option<u32>,
}

impl Location {
    pub fn line(file_path: impl Into<String>, line: u32) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            column: 0,
            end_line: None,
            end_column: None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_path, self.line)
    }
}

/// Half-open byte range `[start_byte, end_byte)` into a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: u32,
    pub end_byte: u32,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start_byte: start as u32,
            end_byte: end as u32,
        }
    }

    pub fn start(&self) -> usize {
        self.start_byte as usize
    }

    pub fn end(&self) -> usize {
        self.end_byte as usize
    }

    pub fn len(&self) -> usize {
        self.end().saturating_sub(self.start())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "put" => Ok(HttpMethod::Put),
            "post" => Ok(HttpMethod::Post),
            "delete" => Ok(HttpMethod::Delete),
            "options" => Ok(HttpMethod::Options),
            "head" => Ok(HttpMethod::Head),
            "patch" => Ok(HttpMethod::Patch),
            "trace" => Ok(HttpMethod::Trace),
            other => Err(format!("unknown HTTP method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DirectCall,
    RestCall,
    Messaging,
    DirectImport,
    DeclaredLink,
    NetworkBinding,
    Other(String),
}

impl Default for EdgeKind {
    fn default() -> Self {
        EdgeKind::DirectCall
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::DirectCall => "direct_call",
            EdgeKind::RestCall => "rest_call",
            EdgeKind::Messaging => "messaging",
            EdgeKind::DirectImport => "direct_import",
            EdgeKind::DeclaredLink => "declared_link",
            EdgeKind::NetworkBinding => "network_binding",
            EdgeKind::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "direct_call" | "call" => Ok(EdgeKind::DirectCall),
            "rest_call" | "rest" => Ok(EdgeKind::RestCall),
            "messaging" => Ok(EdgeKind::Messaging),
            "direct_import" | "import" => Ok(EdgeKind::DirectImport),
            "declared_link" | "link" => Ok(EdgeKind::DeclaredLink),
            "network_binding" | "network" => Ok(EdgeKind::NetworkBinding),
            other => Ok(EdgeKind::Other(other.to_string())),
        }
    }
}

/// Which extractor observed an edge or a service.
///
/// `Runtime` is reserved for log/trace correlation; no scanner produces it
/// yet, but the merge contract already accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    Contract,
    Code,
    Config,
    Runtime,
}

impl EdgeSource {
    pub const EXTRACTORS: [EdgeSource; 4] = [
        EdgeSource::Contract,
        EdgeSource::Code,
        EdgeSource::Config,
        EdgeSource::Runtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeSource::Contract => "contract",
            EdgeSource::Code => "code",
            EdgeSource::Config => "config",
            EdgeSource::Runtime => "runtime",
        }
    }
}

impl fmt::Display for EdgeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability-like score in `[0, 1]` that an extracted edge is real.
///
/// Serialized as a bare number; deserialized values are clamped by
/// [`Confidence::new`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl From<f64> for Confidence {
    fn from(value: f64) -> Self {
        Confidence::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

impl Confidence {
    pub const CERTAIN: Confidence = Confidence(1.0);
    pub const NONE: Confidence = Confidence(0.0);

    /// Clamps into `[0, 1]`; NaN becomes zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Confidence(0.0);
        }
        Confidence(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Noisy-OR of two independent observations: `1 - (1 - a)(1 - b)`.
    /// Never lower than either input.
    pub fn corroborate(self, other: Confidence) -> Confidence {
        let combined = 1.0 - (1.0 - self.0) * (1.0 - other.0);
        Confidence::new(combined.max(self.0).max(other.0))
    }

    /// Repeated sighting of the same observation adds no evidence.
    pub fn reinforce(self, other: Confidence) -> Confidence {
        Confidence(self.0.max(other.0))
    }

    pub fn scaled(self, factor: f64) -> Confidence {
        Confidence::new(self.0 * factor)
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence(0.5)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Resolved head of a dependency edge: a whole service or one of its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeTarget {
    Service { service: String },
    Endpoint { service: String, path: String },
}

impl EdgeTarget {
    pub fn service(name: impl Into<String>) -> Self {
        EdgeTarget::Service {
            service: name.into(),
        }
    }

    pub fn endpoint(service: impl Into<String>, path: impl Into<String>) -> Self {
        EdgeTarget::Endpoint {
            service: service.into(),
            path: path.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        match self {
            EdgeTarget::Service { service } | EdgeTarget::Endpoint { service, .. } => service,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            EdgeTarget::Service { .. } => None,
            EdgeTarget::Endpoint { path, .. } => Some(path),
        }
    }
}

impl fmt::Display for EdgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeTarget::Service { service } => write!(f, "{}", service),
            EdgeTarget::Endpoint { service, path } => write!(f, "{}{}", service, path),
        }
    }
}

/// Unresolved head of a candidate edge, as a scanner saw it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetRef {
    /// Named directly (`depends_on`, `links`).
    Service { name: String },
    /// Network address taken from a URL or connection string.
    Address {
        host: String,
        port: Option<u16>,
        path: Option<String>,
    },
    /// Address read from an environment variable of the consuming service.
    EnvVar { name: String, path: Option<String> },
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Service { name } => write!(f, "{}", name),
            TargetRef::Address { host, port, path } => {
                write!(f, "{}", host)?;
                if let Some(port) = port {
                    write!(f, ":{}", port)?;
                }
                if let Some(path) = path {
                    write!(f, "{}", path)?;
                }
                Ok(())
            }
            TargetRef::EnvVar { name, .. } => write!(f, "${}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialized_confidence_is_clamped() {
        let high: Confidence = serde_json::from_str("1.7").unwrap();
        assert_eq!(high, Confidence::CERTAIN);
        let low: Confidence = serde_json::from_str("-0.2").unwrap();
        assert_eq!(low, Confidence::NONE);
        let nan: Confidence = serde_yaml::from_str(".nan").unwrap();
        assert_eq!(nan, Confidence::NONE);
        assert_eq!(serde_json::to_string(&Confidence::new(0.25)).unwrap(), "0.25");
    }

    #[test]
    fn corroboration_never_lowers_confidence() {
        let samples = [0.0, 0.1, 0.3, 0.5, 0.75, 0.9, 1.0];
        for a in samples {
            for b in samples {
                let (ca, cb) = (Confidence::new(a), Confidence::new(b));
                let combined = ca.corroborate(cb);
                assert!(combined >= ca, "{} + {} dropped below {}", a, b, a);
                assert!(combined >= cb, "{} + {} dropped below {}", a, b, b);
                assert!(ca.reinforce(cb) >= ca);
            }
        }
    }

    #[test]
    fn two_sources_beat_one() {
        let one = Confidence::new(0.6);
        let two = one.corroborate(Confidence::new(0.6));
        assert!(two > one);
        assert!((two.value() - 0.84).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Confidence::new(1.7).value(), 1.0);
        assert_eq!(Confidence::new(-0.2).value(), 0.0);
        assert_eq!(Confidence::new(f64::NAN).value(), 0.0);
    }

    #[test]
    fn edge_kind_round_trips_through_display() {
        for kind in [
            EdgeKind::DirectCall,
            EdgeKind::RestCall,
            EdgeKind::Messaging,
            EdgeKind::DirectImport,
            EdgeKind::DeclaredLink,
            EdgeKind::NetworkBinding,
        ] {
            assert_eq!(kind.to_string().parse::<EdgeKind>().unwrap(), kind);
        }
        assert_eq!("network-binding".parse::<EdgeKind>().unwrap(), EdgeKind::NetworkBinding);
    }

    #[test]
    fn http_method_parsing_is_case_insensitive() {
        assert_eq!("Get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("POST".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("fetch".parse::<HttpMethod>().is_err());
    }
}
