//! Container and orchestration manifests: Docker Compose, Kubernetes YAML
//! and Dockerfiles.

pub mod compose;
pub mod dockerfile;
pub mod kubernetes;
pub mod yaml_blocks;

use crate::address::{
    find_addresses, is_bare_word, is_local_host, looks_like_hostname, parse_address, AddressMatch,
};
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use svcgraph_core::{
    CandidateEdge, Confidence, ConfidenceConfig, EdgeKind, EdgeSource, FileScan, Location, Result,
    SourceScanner, TargetRef,
};

pub use compose::scan_compose;
pub use dockerfile::scan_dockerfile;
pub use kubernetes::scan_kubernetes;

/// Env keys whose value names a peer rather than configuration.
const PEER_KEY_SUFFIXES: &[&str] = &[
    "_HOST", "_HOSTNAME", "_ADDR", "_ADDRESS", "_URL", "_URI", "_ENDPOINT", "_SERVICE", "_SERVER",
];

/// Env keys that carry the service's own listening port.
const OWN_PORT_KEYS: &[&str] = &[
    "PORT", "HTTP_PORT", "SERVER_PORT", "LISTEN_PORT", "APP_PORT", "GRPC_PORT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Compose,
    Kubernetes,
    Dockerfile,
}

impl ManifestKind {
    pub fn detect(rel_path: &Path) -> Option<Self> {
        let name = rel_path.file_name()?.to_str()?.to_ascii_lowercase();
        if name == "dockerfile" || name.starts_with("dockerfile.") || name.ends_with(".dockerfile")
        {
            return Some(ManifestKind::Dockerfile);
        }
        if name.ends_with(".yml") || name.ends_with(".yaml") {
            if name.starts_with("docker-compose") || name.starts_with("compose") {
                return Some(ManifestKind::Compose);
            }
            return Some(ManifestKind::Kubernetes);
        }
        None
    }
}

/// Dispatches manifests to the Compose, Kubernetes or Dockerfile reader.
pub struct ManifestScanner {
    confidence: ConfidenceConfig,
}

impl ManifestScanner {
    pub fn new(confidence: ConfidenceConfig) -> Self {
        Self { confidence }
    }
}

impl SourceScanner for ManifestScanner {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn source(&self) -> EdgeSource {
        EdgeSource::Config
    }

    fn accepts(&self, rel_path: &Path) -> bool {
        ManifestKind::detect(rel_path).is_some()
    }

    fn scan_file(&self, rel_path: &Path, content: &str) -> Result<FileScan> {
        match ManifestKind::detect(rel_path) {
            Some(ManifestKind::Compose) => Ok(scan_compose(rel_path, content, &self.confidence)),
            Some(ManifestKind::Kubernetes) => {
                Ok(scan_kubernetes(rel_path, content, &self.confidence))
            }
            Some(ManifestKind::Dockerfile) => {
                Ok(scan_dockerfile(rel_path, content, &self.confidence))
            }
            None => Ok(FileScan::default()),
        }
    }
}

pub(crate) fn is_own_port_key(key: &str) -> bool {
    OWN_PORT_KEYS.contains(&key.to_ascii_uppercase().as_str())
}

fn is_peer_key(key: &str) -> bool {
    let key = key.to_ascii_uppercase();
    PEER_KEY_SUFFIXES.iter().any(|s| key.ends_with(s))
}

/// Classifies one environment value of service `from`.
///
/// Full addresses are network bindings. Bare words and dotted host names
/// only might name a peer: they are kept, flagged ambiguous, unless a bare
/// word names a service from the same manifest under a peer-like key.
pub(crate) fn env_candidate(
    from: &str,
    key: &str,
    value: &str,
    location: Location,
    known: &BTreeSet<String>,
    confidence: &ConfidenceConfig,
) -> Option<CandidateEdge> {
    let value = value.trim();
    if value.is_empty() || value.contains("${") || value.contains("$(") {
        return None;
    }
    if is_own_port_key(key) {
        return None;
    }

    let binding = |target: TargetRef| {
        CandidateEdge::new(from, target, EdgeKind::NetworkBinding, EdgeSource::Config)
            .at(location.clone())
            .with_confidence(Confidence::new(confidence.network_binding))
    };
    let ambiguous = Confidence::new(confidence.ambiguous);

    if let Some(addr) = parse_address(value) {
        if !addr.names_peer() {
            return None;
        }
        return Some(binding(addr.target()));
    }

    let host_only = |host: &str| TargetRef::Address {
        host: host.to_ascii_lowercase(),
        port: None,
        path: None,
    };

    if is_bare_word(value) {
        if is_local_host(value) {
            return None;
        }
        let known_service = known.contains(value);
        let peer_key = is_peer_key(key);
        return match (known_service, peer_key) {
            (true, true) => Some(binding(host_only(value))),
            (true, false) | (false, true) => Some(binding(host_only(value)).flag_ambiguous(ambiguous)),
            (false, false) => None,
        };
    }

    if looks_like_hostname(value) {
        return Some(binding(host_only(value)).flag_ambiguous(ambiguous));
    }
    None
}

/// Addresses inside a startup command line.
pub(crate) fn command_candidates(
    from: &str,
    command: &str,
    location: &Location,
    confidence: &ConfidenceConfig,
) -> Vec<CandidateEdge> {
    find_addresses(command)
        .into_iter()
        .filter(AddressMatch::names_peer)
        .map(|a| {
            CandidateEdge::new(from, a.target(), EdgeKind::NetworkBinding, EdgeSource::Config)
                .at(location.clone())
                .with_confidence(Confidence::new(confidence.network_binding))
        })
        .collect()
}

/// Joins `rel` onto `base_dir` and folds `.`/`..`. Paths escaping the scan
/// root yield `None`; the root itself yields an empty string.
pub(crate) fn normalize_dir(base_dir: &Path, rel: &str) -> Option<String> {
    let joined: PathBuf = base_dir.join(rel);
    let mut parts: Vec<String> = Vec::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

/// Command given as a string or a list of words, joined with spaces.
pub(crate) fn command_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Sequence(items) => {
            let words: Vec<String> = items.iter().filter_map(scalar).collect();
            (!words.is_empty()).then(|| words.join(" "))
        }
        _ => None,
    }
}

pub(crate) fn scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn get<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    v.as_mapping()?.get(Value::String(key.to_string()))
}

pub(crate) fn rel_string(rel_path: &Path) -> String {
    rel_path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> BTreeSet<String> {
        ["users", "orders"].iter().map(|s| s.to_string()).collect()
    }

    fn classify(key: &str, value: &str) -> Option<CandidateEdge> {
        env_candidate(
            "gateway",
            key,
            value,
            Location::line("docker-compose.yml", 1),
            &known(),
            &ConfidenceConfig::default(),
        )
    }

    #[test]
    fn detects_manifest_kinds() {
        assert_eq!(
            ManifestKind::detect(Path::new("docker-compose.prod.yml")),
            Some(ManifestKind::Compose)
        );
        assert_eq!(ManifestKind::detect(Path::new("deploy/compose.yaml")), Some(ManifestKind::Compose));
        assert_eq!(ManifestKind::detect(Path::new("k8s/users.yaml")), Some(ManifestKind::Kubernetes));
        assert_eq!(ManifestKind::detect(Path::new("users/Dockerfile")), Some(ManifestKind::Dockerfile));
        assert_eq!(ManifestKind::detect(Path::new("users/app.py")), None);
    }

    #[test]
    fn connection_strings_are_confident_bindings() {
        let c = classify("USERS_URL", "http://users:9090").unwrap();
        assert!(!c.ambiguous);
        assert_eq!(c.kind, EdgeKind::NetworkBinding);
        assert_eq!(c.confidence, Confidence::new(0.75));

        let c = classify("CACHE", "redis:6379").unwrap();
        assert!(!c.ambiguous);
    }

    #[test]
    fn unclear_values_are_flagged_not_dropped() {
        let c = classify("USERS_HOST", "users").unwrap();
        assert!(!c.ambiguous);

        let c = classify("BACKEND", "orders").unwrap();
        assert!(c.ambiguous);
        assert_eq!(c.confidence, Confidence::new(0.3));

        let c = classify("UPSTREAM", "billing.internal.svc").unwrap();
        assert!(c.ambiguous);

        assert!(classify("LOG_LEVEL", "info").is_none());
        assert!(classify("DB_HOST", "localhost").is_none());
        assert!(classify("PORT", "9090").is_none());
        assert!(classify("TARGET_URL", "${TARGET}").is_none());
    }

    #[test]
    fn normalizes_build_contexts() {
        assert_eq!(normalize_dir(Path::new(""), "./users").as_deref(), Some("users"));
        assert_eq!(normalize_dir(Path::new("deploy"), "../services/users").as_deref(), Some("services/users"));
        assert_eq!(normalize_dir(Path::new(""), ".").as_deref(), Some(""));
        assert_eq!(normalize_dir(Path::new(""), "../outside"), None);
    }
}
