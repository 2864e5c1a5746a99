use super::yaml_blocks::{YamlBlock, YamlOutline};
use super::{
    command_candidates, command_text, env_candidate, get, is_own_port_key, normalize_dir,
    rel_string, scalar,
};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use svcgraph_core::{
    CandidateEdge, Confidence, ConfidenceConfig, EdgeKind, EdgeSource, FileScan, Location,
    PortDeclaration, ServiceObservation, SnippetRef, TargetRef, WarningKind,
};
use tracing::{debug, warn};

/// Reads a Compose file. Malformed files produce a warning and nothing else.
pub fn scan_compose(rel_path: &Path, content: &str, confidence: &ConfidenceConfig) -> FileScan {
    let rel = rel_string(rel_path);
    let mut scan = FileScan::default();

    let doc: Value = match serde_yaml::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Skipping malformed compose file {}: {}", rel, e);
            scan.warn(&rel, WarningKind::Malformed, e.to_string());
            return scan;
        }
    };
    let Some(services) = get(&doc, "services").and_then(Value::as_mapping) else {
        debug!("{} has no services section", rel);
        return scan;
    };

    let outline = YamlOutline::new(content);
    let Some(root) = outline.root() else {
        return scan;
    };
    let base_dir = rel_path.parent().unwrap_or(Path::new(""));
    let known: BTreeSet<String> = services
        .keys()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect();

    for (name, spec) in services {
        let Some(name) = name.as_str() else {
            continue;
        };
        let Some(block) = outline.block(&root, &["services", name]) else {
            scan.warn(&rel, WarningKind::Malformed, format!("cannot locate service {}", name));
            continue;
        };
        let reader = ServiceReader {
            rel: &rel,
            name,
            outline: &outline,
            block,
            known: &known,
            confidence,
        };
        let (obs, candidates) = reader.read(spec, base_dir);
        scan.observations.push(obs);
        scan.candidates.extend(candidates);
    }

    scan
}

struct ServiceReader<'a> {
    rel: &'a str,
    name: &'a str,
    outline: &'a YamlOutline<'a>,
    block: YamlBlock,
    known: &'a BTreeSet<String>,
    confidence: &'a ConfidenceConfig,
}

impl<'a> ServiceReader<'a> {
    /// Location of `needle` inside the `key` section of this service.
    fn locate(&self, key: &str, needle: &str) -> Location {
        let section = self.outline.child(&self.block, key).unwrap_or(self.block);
        let line = self
            .outline
            .find(&section, needle)
            .map(|(line, _)| line)
            .unwrap_or(section.line);
        Location::line(self.rel, line)
    }

    fn read(&self, spec: &Value, base_dir: &Path) -> (ServiceObservation, Vec<CandidateEdge>) {
        let mut obs = ServiceObservation::declared(self.name, EdgeSource::Config);
        let mut candidates = Vec::new();
        obs.blocks.push(SnippetRef {
            file_path: self.rel.to_string(),
            span: self.block.span,
            line: self.block.line,
        });

        let build_context = match get(spec, "build") {
            Some(Value::String(ctx)) => Some(ctx.as_str()),
            Some(build) => get(build, "context").and_then(Value::as_str),
            None => None,
        };
        if let Some(dir) = build_context.and_then(|ctx| normalize_dir(base_dir, ctx)) {
            if !dir.is_empty() {
                obs.build_dirs.insert(dir);
            }
        }

        for key in ["hostname", "container_name"] {
            if let Some(alias) = get(spec, key).and_then(Value::as_str) {
                obs.aliases.insert(alias.to_string());
            }
        }
        if let Some(networks) = get(spec, "networks").and_then(Value::as_mapping) {
            for net in networks.values() {
                for alias in get(net, "aliases")
                    .and_then(Value::as_sequence)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                {
                    obs.aliases.insert(alias.to_string());
                }
            }
        }

        obs.labels = key_values(get(spec, "labels"));

        for key in ["ports", "expose"] {
            for entry in get(spec, key)
                .and_then(Value::as_sequence)
                .into_iter()
                .flatten()
            {
                if let Some(port) = container_port(entry) {
                    obs.ports.push(PortDeclaration {
                        port,
                        location: self.locate(key, &port.to_string()),
                    });
                }
            }
        }

        for (k, v) in key_values(get(spec, "environment")) {
            let location = self.locate("environment", &k);
            if is_own_port_key(&k) {
                if let Ok(port) = v.trim().parse::<u16>() {
                    obs.ports.push(PortDeclaration {
                        port,
                        location: location.clone(),
                    });
                }
            }
            if let Some(c) = env_candidate(self.name, &k, &v, location, self.known, self.confidence) {
                candidates.push(c);
            }
            obs.env.insert(k, v);
        }

        let declared = Confidence::new(self.confidence.declared_link);
        for dep in depends_on(get(spec, "depends_on")) {
            candidates.push(
                CandidateEdge::new(
                    self.name,
                    TargetRef::Service { name: dep.clone() },
                    EdgeKind::DeclaredLink,
                    EdgeSource::Config,
                )
                .at(self.locate("depends_on", &dep))
                .with_confidence(declared),
            );
        }
        for link in get(spec, "links")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            let target = link.split(':').next().unwrap_or(link).to_string();
            candidates.push(
                CandidateEdge::new(
                    self.name,
                    TargetRef::Service {
                        name: target.clone(),
                    },
                    EdgeKind::DeclaredLink,
                    EdgeSource::Config,
                )
                .at(self.locate("links", &target))
                .with_confidence(declared),
            );
        }

        if let Some(mode) = get(spec, "network_mode").and_then(Value::as_str) {
            let peer = mode
                .strip_prefix("service:")
                .or_else(|| mode.strip_prefix("container:"));
            if let Some(peer) = peer {
                candidates.push(
                    CandidateEdge::new(
                        self.name,
                        TargetRef::Service {
                            name: peer.to_string(),
                        },
                        EdgeKind::NetworkBinding,
                        EdgeSource::Config,
                    )
                    .at(self.locate("network_mode", peer))
                    .with_confidence(Confidence::new(self.confidence.network_binding)),
                );
            }
        }

        for key in ["entrypoint", "command"] {
            let Some(text) = get(spec, key).and_then(command_text) else {
                continue;
            };
            let Some(section) = self.outline.child(&self.block, key) else {
                continue;
            };
            obs.invocations.push(SnippetRef {
                file_path: self.rel.to_string(),
                span: section.span,
                line: section.line,
            });
            let location = Location::line(self.rel, section.line);
            candidates.extend(command_candidates(self.name, &text, &location, self.confidence));
        }

        (obs, candidates)
    }
}

/// `KEY: value` mappings or `KEY=value` lists.
fn key_values(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Some(Value::Mapping(map)) => {
            for (k, v) in map {
                if let (Some(k), Some(v)) = (scalar(k), scalar(v)) {
                    out.insert(k, v);
                }
            }
        }
        Some(Value::Sequence(items)) => {
            for item in items.iter().filter_map(Value::as_str) {
                if let Some((k, v)) = item.split_once('=') {
                    out.insert(k.trim().to_string(), v.to_string());
                }
            }
        }
        _ => {}
    }
    out
}

fn depends_on(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar).collect(),
        Some(Value::Mapping(map)) => map.keys().filter_map(scalar).collect(),
        _ => Vec::new(),
    }
}

/// Container side of a port mapping: `"8080:80/tcp"` → 80, `9090` → 9090,
/// `{target: 80}` → 80. Ranges are ignored.
fn container_port(entry: &Value) -> Option<u16> {
    match entry {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => {
            let s = s.split('/').next().unwrap_or(s);
            let container = s.rsplit(':').next().unwrap_or(s);
            if container.contains('-') {
                return None;
            }
            container.trim().parse().ok()
        }
        Value::Mapping(_) => get(entry, "target").and_then(container_port),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = r#"version: "3.9"
services:
  users:
    build: ./users
    hostname: users.internal
    ports:
      - "9090:9090"
    environment:
      - PORT=9090
      - DATABASE_URL=postgres://db:5432/users
    command: python app.py --port 9090

  gateway:
    build:
      context: ./gateway
    depends_on:
      users:
        condition: service_started
    links:
      - "orders:legacy-orders"
    environment:
      USERS_URL: http://users:9090/api
      FALLBACK: users
      LOG_LEVEL: debug
    command: ["node", "server.js", "--upstream", "http://orders:8000"]

  sidecar:
    image: envoy
    network_mode: "service:gateway"
"#;

    fn scan() -> FileScan {
        scan_compose(Path::new("docker-compose.yml"), COMPOSE, &ConfidenceConfig::default())
    }

    #[test]
    fn declares_every_service() {
        let scan = scan();
        let names: Vec<&str> = scan.observations.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["users", "gateway", "sidecar"]);

        let users = scan.observations.iter().find(|o| o.name == "users").unwrap();
        assert!(users.build_dirs.contains("users"));
        assert!(users.aliases.contains("users.internal"));
        assert_eq!(users.ports[0].port, 9090);
        assert_eq!(users.ports[0].location.line, 7);
        assert_eq!(users.env["DATABASE_URL"], "postgres://db:5432/users");
        assert_eq!(users.invocations.len(), 1);
        assert_eq!(users.invocations[0].line, 11);
        let block = &users.blocks[0];
        let text = &COMPOSE[block.span.start()..block.span.end()];
        assert!(text.starts_with("  users:"));
        assert!(!text.contains("gateway"));
    }

    #[test]
    fn extracts_links_and_bindings() {
        let scan = scan();
        let from_gateway: Vec<(String, EdgeKind, bool)> = scan
            .candidates
            .iter()
            .filter(|c| c.from == "gateway")
            .map(|c| (c.to.to_string(), c.kind.clone(), c.ambiguous))
            .collect();
        assert!(from_gateway.contains(&("users".into(), EdgeKind::DeclaredLink, false)));
        assert!(from_gateway.contains(&("orders".into(), EdgeKind::DeclaredLink, false)));
        assert!(from_gateway.contains(&("users:9090/api".into(), EdgeKind::NetworkBinding, false)));
        assert!(from_gateway.contains(&("users".into(), EdgeKind::NetworkBinding, true)));
        assert!(from_gateway.contains(&("orders:8000".into(), EdgeKind::NetworkBinding, false)));
        assert_eq!(from_gateway.len(), 5);

        let sidecar = scan.candidates.iter().find(|c| c.from == "sidecar").unwrap();
        assert_eq!(sidecar.to, TargetRef::Service { name: "gateway".into() });
        assert_eq!(sidecar.kind, EdgeKind::NetworkBinding);

        let db = scan.candidates.iter().find(|c| c.from == "users").unwrap();
        assert_eq!(db.to.to_string(), "db:5432/users");
    }

    #[test]
    fn malformed_compose_is_a_warning() {
        let scan = scan_compose(
            Path::new("docker-compose.yml"),
            "services:\n  users: [unclosed\n",
            &ConfidenceConfig::default(),
        );
        assert!(scan.observations.is_empty());
        assert_eq!(scan.warnings[0].kind, WarningKind::Malformed);
    }

    #[test]
    fn port_forms() {
        assert_eq!(container_port(&Value::from("127.0.0.1:8080:80/tcp")), Some(80));
        assert_eq!(container_port(&Value::from(9090)), Some(9090));
        assert_eq!(container_port(&Value::from("8000-8010")), None);
    }
}
