use crate::address::{is_local_host, parse_address};
use crate::file_collect::owning_component;
use crate::manifest::yaml_blocks::YamlOutline;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use svcgraph_core::{
    EdgeSource, Endpoint, EndpointParameter, FileScan, HttpMethod, Location, Operation,
    PortDeclaration, Result, ServiceObservation, SourceScanner, SvcGraphError, WarningKind,
};
use tracing::{debug, warn};

/// Path-item keys that are not operations but are allowed next to them.
const PATH_ITEM_FIELDS: &[&str] = &["parameters", "summary", "description", "servers", "$ref"];

/// Hosts that documentation uses as stand-ins for a real server.
const PLACEHOLDER_HOSTS: &[&str] = &["example.com", "{host}"];

/// What an API contract says about the service that publishes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractDocument {
    /// `x-service-name`, when the contract names its service.
    pub service: Option<String>,
    /// `info.version`.
    pub version: Option<String>,
    /// `openapi` / `swagger` field.
    pub spec_version: Option<String>,
    pub endpoints: Vec<Endpoint>,
    /// Absolute server URLs (`servers[].url`, or Swagger `host` + `basePath`).
    pub servers: Vec<String>,
}

impl ContractDocument {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// OpenAPI 3.0/3.1 and Swagger 2.0 reader.
pub struct ContractParser {
    patterns: GlobSet,
}

impl ContractParser {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                SvcGraphError::Config(format!("invalid contract pattern {}: {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let patterns = builder
            .build()
            .map_err(|e| SvcGraphError::Config(e.to_string()))?;
        Ok(Self { patterns })
    }

    /// Reads a contract from disk. A missing file is an empty contract.
    pub fn parse_path(&self, path: &Path) -> Result<ContractDocument> {
        if !path.exists() {
            debug!("Contract {:?} does not exist; treating as empty", path);
            return Ok(ContractDocument::default());
        }
        let content = std::fs::read_to_string(path)?;
        parse_contract(&content)
    }
}

/// Parses contract text. Empty input yields an empty document; anything that
/// is not valid under its declared schema version is a parse error.
pub fn parse_contract(content: &str) -> Result<ContractDocument> {
    if content.trim().is_empty() {
        return Ok(ContractDocument::default());
    }

    let root: Value = serde_yaml::from_str(content)
        .map_err(|e| SvcGraphError::parse(format!("contract is not valid YAML/JSON: {}", e)))?;
    let root = match root {
        Value::Null => return Ok(ContractDocument::default()),
        Value::Mapping(m) => m,
        _ => return Err(SvcGraphError::parse("contract root must be a mapping")),
    };

    let (spec_version, swagger) = declared_version(&root)?;
    let mut doc = ContractDocument {
        spec_version: Some(spec_version.clone()),
        ..Default::default()
    };

    let info = get(&root, "info").and_then(Value::as_mapping);
    doc.service = get(&root, "x-service-name")
        .or_else(|| info.and_then(|i| get(i, "x-service-name")))
        .and_then(scalar_string);
    doc.version = info.and_then(|i| get(i, "version")).and_then(scalar_string);

    let base_path = if swagger {
        let base = get(&root, "basePath").and_then(Value::as_str).unwrap_or("");
        if let Some(host) = get(&root, "host").and_then(Value::as_str) {
            let scheme = get(&root, "schemes")
                .and_then(Value::as_sequence)
                .and_then(|s| s.first())
                .and_then(Value::as_str)
                .unwrap_or("http");
            doc.servers.push(format!("{}://{}{}", scheme, host, base));
        }
        base.to_string()
    } else {
        let mut base = None;
        for server in get(&root, "servers")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
        {
            let Some(url) = server.as_mapping().and_then(|s| get(s, "url")).and_then(Value::as_str)
            else {
                continue;
            };
            let path = match parse_address(url) {
                Some(addr) => {
                    doc.servers.push(url.to_string());
                    addr.path.unwrap_or_default()
                }
                None if url.starts_with('/') => url.to_string(),
                None => String::new(),
            };
            base.get_or_insert(path);
        }
        base.unwrap_or_default()
    };
    let base_path = base_path.trim_end_matches('/');

    let paths = match get(&root, "paths") {
        Some(Value::Mapping(paths)) => paths,
        Some(Value::Null) | None if spec_version.starts_with("3.1") => return Ok(doc),
        Some(Value::Null) | None => {
            return Err(SvcGraphError::parse(format!(
                "`paths` is required for version {}",
                spec_version
            )))
        }
        Some(_) => return Err(SvcGraphError::parse("`paths` must be a mapping")),
    };

    for (key, item) in paths {
        let path = key
            .as_str()
            .ok_or_else(|| SvcGraphError::parse("path keys must be strings"))?;
        if path.starts_with("x-") {
            continue;
        }
        if !path.starts_with('/') {
            return Err(SvcGraphError::parse(format!(
                "path `{}` must start with `/`",
                path
            )));
        }
        let item = item.as_mapping().ok_or_else(|| {
            SvcGraphError::parse(format!("path item `{}` must be a mapping", path))
        })?;

        let shared = parameters(get(item, "parameters"));
        let mut endpoint = Endpoint::new("", format!("{}{}", base_path, path));

        for (field, value) in item {
            let field = field.as_str().unwrap_or("");
            if field.starts_with("x-") || PATH_ITEM_FIELDS.contains(&field) {
                continue;
            }
            let method: HttpMethod = field.parse().map_err(|_| {
                SvcGraphError::parse(format!("unknown field `{}` under path `{}`", field, path))
            })?;
            let op = value.as_mapping().ok_or_else(|| {
                SvcGraphError::parse(format!("operation {} {} must be a mapping", method, path))
            })?;
            endpoint
                .operations
                .insert(method, operation(op, &shared, swagger));
        }

        doc.endpoints.push(endpoint);
    }

    Ok(doc)
}

fn declared_version(root: &Mapping) -> Result<(String, bool)> {
    if let Some(v) = get(root, "openapi") {
        let v = version_string(v)
            .ok_or_else(|| SvcGraphError::parse("`openapi` must be a version string"))?;
        let supported = v == "3.0"
            || v == "3.1"
            || v.starts_with("3.0.")
            || v.starts_with("3.1.");
        if !supported {
            return Err(SvcGraphError::parse(format!(
                "unsupported OpenAPI version {}",
                v
            )));
        }
        return Ok((v, false));
    }
    if let Some(v) = get(root, "swagger") {
        let v = version_string(v)
            .ok_or_else(|| SvcGraphError::parse("`swagger` must be a version string"))?;
        if v != "2.0" {
            return Err(SvcGraphError::parse(format!(
                "unsupported Swagger version {}",
                v
            )));
        }
        return Ok((v, true));
    }
    Err(SvcGraphError::parse(
        "document declares neither `openapi` nor `swagger`",
    ))
}

fn version_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        // `swagger: 2.0` unquoted is a float
        Value::Number(n) => n.as_f64().map(|f| format!("{:?}", f)),
        _ => None,
    }
}

fn operation(op: &Mapping, shared: &[EndpointParameter], swagger: bool) -> Operation {
    let mut parameters = parameters(get(op, "parameters"));
    for p in shared {
        if !parameters
            .iter()
            .any(|own| own.name == p.name && own.location == p.location)
        {
            parameters.push(p.clone());
        }
    }

    let request_schema = if swagger {
        get(op, "parameters")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
            .filter_map(Value::as_mapping)
            .find(|p| get(p, "in").and_then(Value::as_str) == Some("body"))
            .and_then(|p| get(p, "schema"))
            .and_then(|s| serde_json::to_value(s).ok())
    } else {
        get(op, "requestBody")
            .and_then(Value::as_mapping)
            .and_then(|b| get(b, "content"))
            .and_then(Value::as_mapping)
            .and_then(|c| c.values().next())
            .and_then(Value::as_mapping)
            .and_then(|media| get(media, "schema"))
            .and_then(|s| serde_json::to_value(s).ok())
    };

    let mut responses = BTreeMap::new();
    if let Some(map) = get(op, "responses").and_then(Value::as_mapping) {
        for (code, response) in map {
            let Some(code) = scalar_string(code) else {
                continue;
            };
            let description = response
                .as_mapping()
                .and_then(|r| get(r, "description"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            responses.insert(code, description);
        }
    }

    Operation {
        operation_id: get(op, "operationId").and_then(scalar_string),
        parameters,
        request_schema,
        responses,
    }
}

fn parameters(value: Option<&Value>) -> Vec<EndpointParameter> {
    value
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(Value::as_mapping)
        .filter_map(|p| {
            Some(EndpointParameter {
                name: get(p, "name").and_then(Value::as_str)?.to_string(),
                location: get(p, "in").and_then(Value::as_str)?.to_string(),
                required: get(p, "required").and_then(Value::as_bool).unwrap_or(false),
            })
        })
        .collect()
}

fn get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(Value::String(key.to_string()))
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl SourceScanner for ContractParser {
    fn name(&self) -> &'static str {
        "contract"
    }

    fn source(&self) -> EdgeSource {
        EdgeSource::Contract
    }

    fn accepts(&self, rel_path: &Path) -> bool {
        self.patterns.is_match(rel_path)
    }

    fn scan_file(&self, rel_path: &Path, content: &str) -> Result<FileScan> {
        let rel = rel_path.to_string_lossy().replace('\\', "/");
        let mut scan = FileScan::default();

        let doc = match parse_contract(content) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Skipping contract {}: {}", rel, e);
                scan.warn(&rel, WarningKind::Malformed, e.to_string());
                return Ok(scan);
            }
        };
        if doc.is_empty() && doc.service.is_none() {
            debug!("Contract {} declares no endpoints", rel);
            return Ok(scan);
        }

        let dir = rel_path
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let mut obs = match &doc.service {
            Some(name) => ServiceObservation::declared(name.clone(), EdgeSource::Contract),
            None => {
                let Some(owner) = owning_component(rel_path) else {
                    scan.warn(
                        &rel,
                        WarningKind::Unresolved,
                        "contract at the repository root has no x-service-name",
                    );
                    return Ok(scan);
                };
                ServiceObservation::inferred(owner, EdgeSource::Contract)
            }
        };
        if !dir.is_empty() {
            obs.build_dirs.insert(dir);
        }
        obs.version = doc.version.clone();

        let outline = YamlOutline::new(content);
        // `servers:` (3.x) or `host:` (2.0); ports are only looked up there.
        let server_block = outline
            .root()
            .and_then(|root| outline.child(&root, "servers").or_else(|| outline.child(&root, "host")));
        for server in &doc.servers {
            let Some(addr) = parse_address(server) else {
                continue;
            };
            if is_local_host(&addr.host) || PLACEHOLDER_HOSTS.contains(&addr.host.as_str()) {
                continue;
            }
            obs.aliases.insert(addr.host.clone());
            if let Some(port) = addr.port {
                let line = server_block
                    .and_then(|block| {
                        outline
                            .find(&block, server)
                            .or_else(|| outline.find(&block, &port.to_string()))
                    })
                    .map(|(line, _)| line)
                    .unwrap_or(0);
                obs.ports.push(PortDeclaration {
                    port,
                    location: Location::line(&rel, line),
                });
            }
        }

        let name = obs.name.clone();
        obs.endpoints = doc
            .endpoints
            .into_iter()
            .map(|mut e| {
                e.service = name.clone();
                e
            })
            .collect();
        scan.observations.push(obs);
        Ok(scan)
    }
}
