use crate::{EdgeSource, HttpMethod, Location, Span};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointParameter {
    pub name: String,
    /// `path`, `query`, `header`, `cookie`, `body` or `formData`.
    pub location: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<EndpointParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<serde_json::Value>,
    /// Status code → response description.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub responses: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service: String,
    pub path: String,
    pub operations: BTreeMap<HttpMethod, Operation>,
}

impl Endpoint {
    pub fn new(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            operations: BTreeMap::new(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.operations.entry(method).or_default();
        self
    }

    pub fn methods(&self) -> BTreeSet<HttpMethod> {
        self.operations.keys().copied().collect()
    }

    pub fn supports(&self, method: HttpMethod) -> bool {
        self.operations.contains_key(&method)
    }

    pub fn is_templated(&self) -> bool {
        self.path.contains('{')
    }

    pub fn matches(&self, concrete: &str) -> bool {
        path_matches(&self.path, concrete)
    }
}

/// Matches a concrete request path against an OpenAPI path template.
/// `{param}` segments match any non-empty segment; query strings and
/// trailing slashes are ignored.
pub fn path_matches(template: &str, concrete: &str) -> bool {
    let concrete = concrete.split(['?', '#']).next().unwrap_or("");
    let tpl: Vec<&str> = template.trim_matches('/').split('/').collect();
    let got: Vec<&str> = concrete.trim_matches('/').split('/').collect();
    if tpl.len() != got.len() {
        return false;
    }
    tpl.iter().zip(got.iter()).all(|(t, g)| {
        if t.starts_with('{') && t.ends_with('}') {
            !g.is_empty()
        } else {
            t == g
        }
    })
}

/// A region of a file that belongs to one service (a Compose service block,
/// a Kubernetes document, a Dockerfile instruction).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnippetRef {
    pub file_path: String,
    pub span: Span,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortDeclaration {
    pub port: u16,
    pub location: Location,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortDeclaration>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ConnectionParams {
    pub fn port_set(&self) -> BTreeSet<u16> {
        self.ports.iter().map(|p| p.port).collect()
    }

    pub fn add_port(&mut self, decl: PortDeclaration) {
        if !self.ports.contains(&decl) {
            self.ports.push(decl);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,
    #[serde(default)]
    pub connection: ConnectionParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<SnippetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<SnippetRef>,
    #[serde(default)]
    pub observed_by: BTreeSet<EdgeSource>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            endpoints: BTreeMap::new(),
            connection: ConnectionParams::default(),
            blocks: Vec::new(),
            invocations: Vec::new(),
            observed_by: BTreeSet::new(),
        }
    }

    pub fn has_contract(&self) -> bool {
        self.observed_by.contains(&EdgeSource::Contract)
    }

    /// Endpoints are only ever added; an existing path gains new methods.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        match self.endpoints.get_mut(&endpoint.path) {
            Some(existing) => {
                for (method, op) in endpoint.operations {
                    existing.operations.entry(method).or_insert(op);
                }
            }
            None => {
                let mut endpoint = endpoint;
                endpoint.service = self.name.clone();
                self.endpoints.insert(endpoint.path.clone(), endpoint);
            }
        }
    }

    pub fn find_endpoint(&self, concrete_path: &str) -> Option<&Endpoint> {
        let concrete = concrete_path.split(['?', '#']).next().unwrap_or("");
        if let Some(exact) = self.endpoints.get(concrete) {
            return Some(exact);
        }
        // Prefer literal templates over parameterised ones when both match.
        self.endpoints
            .values()
            .filter(|e| e.matches(concrete))
            .min_by_key(|e| e.path.matches('{').count())
    }

    pub fn absorb(&mut self, obs: ServiceObservation) {
        if self.version.is_none() {
            self.version = obs.version;
        }
        for endpoint in obs.endpoints {
            self.add_endpoint(endpoint);
        }
        for (k, v) in obs.env {
            self.connection.env.entry(k).or_insert(v);
        }
        for port in obs.ports {
            self.connection.add_port(port);
        }
        self.connection.aliases.extend(obs.aliases);
        for (k, v) in obs.labels {
            self.connection.labels.entry(k).or_insert(v);
        }
        for block in obs.blocks {
            if !self.blocks.contains(&block) {
                self.blocks.push(block);
            }
        }
        for inv in obs.invocations {
            if !self.invocations.contains(&inv) {
                self.invocations.push(inv);
            }
        }
        self.observed_by.insert(obs.source);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStrength {
    /// Named by a contract or manifest.
    Declared,
    /// Guessed from the directory a source file lives in.
    Inferred,
}

/// A scanner's statement that a service exists, plus the facts it saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceObservation {
    pub name: String,
    pub strength: ObservationStrength,
    pub source: EdgeSource,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortDeclaration>,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Directories (relative to the scan root) whose sources belong to this service.
    #[serde(default)]
    pub build_dirs: BTreeSet<String>,
    #[serde(default)]
    pub blocks: Vec<SnippetRef>,
    #[serde(default)]
    pub invocations: Vec<SnippetRef>,
}

impl ServiceObservation {
    pub fn declared(name: impl Into<String>, source: EdgeSource) -> Self {
        Self::new(name, ObservationStrength::Declared, source)
    }

    pub fn inferred(name: impl Into<String>, source: EdgeSource) -> Self {
        Self::new(name, ObservationStrength::Inferred, source)
    }

    fn new(name: impl Into<String>, strength: ObservationStrength, source: EdgeSource) -> Self {
        Self {
            name: name.into(),
            strength,
            source,
            version: None,
            endpoints: Vec::new(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            aliases: BTreeSet::new(),
            labels: BTreeMap::new(),
            build_dirs: BTreeSet::new(),
            blocks: Vec::new(),
            invocations: Vec::new(),
        }
    }
}

/// A network name bound to workloads by label selector (a Kubernetes `Service`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasDeclaration {
    pub alias: String,
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortDeclaration>,
    pub location: Location,
}

/// Label-selected workloads allowed to reach other label-selected workloads
/// (a Kubernetes NetworkPolicy ingress rule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorBinding {
    pub consumers: BTreeMap<String, String>,
    pub providers: BTreeMap<String, String>,
    pub location: Location,
}

/// Whether `labels` carries every key/value of a non-empty `selector`.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_matching() {
        assert!(path_matches("/users/{id}", "/users/42"));
        assert!(path_matches("/users/{id}", "/users/42/?verbose=1"));
        assert!(path_matches("/users", "/users/"));
        assert!(!path_matches("/users/{id}", "/users"));
        assert!(!path_matches("/users/{id}/orders", "/users/42/items"));
    }

    #[test]
    fn find_endpoint_prefers_literal_paths() {
        let mut svc = Service::new("users");
        svc.add_endpoint(Endpoint::new("users", "/users/{id}").with_method(HttpMethod::Get));
        svc.add_endpoint(Endpoint::new("users", "/users/me").with_method(HttpMethod::Get));
        assert_eq!(svc.find_endpoint("/users/me").unwrap().path, "/users/me");
        assert_eq!(svc.find_endpoint("/users/7").unwrap().path, "/users/{id}");
        assert!(svc.find_endpoint("/orders").is_none());
    }

    #[test]
    fn endpoints_accumulate_methods() {
        let mut svc = Service::new("users");
        svc.add_endpoint(Endpoint::new("users", "/users").with_method(HttpMethod::Get));
        svc.add_endpoint(Endpoint::new("users", "/users").with_method(HttpMethod::Post));
        let methods = svc.endpoints["/users"].methods();
        assert!(methods.contains(&HttpMethod::Get));
        assert!(methods.contains(&HttpMethod::Post));
    }
}
