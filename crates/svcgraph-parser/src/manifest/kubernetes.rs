use super::yaml_blocks::{YamlBlock, YamlOutline};
use super::{
    command_candidates, command_text, env_candidate, get, is_own_port_key, rel_string, scalar,
};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use svcgraph_core::{
    AliasDeclaration, ConfidenceConfig, EdgeSource, FileScan, Location, PortDeclaration,
    SelectorBinding, ServiceObservation, SnippetRef, WarningKind,
};
use tracing::{debug, warn};

const WORKLOAD_KINDS: &[&str] = &["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet", "Job"];

struct Document<'t> {
    block: YamlBlock,
    value: &'t Value,
    kind: &'t str,
    name: &'t str,
}

/// Reads every `---` document of a Kubernetes manifest. Documents without
/// `apiVersion` and `kind` are ignored; unparseable documents are skipped
/// with a warning.
pub fn scan_kubernetes(rel_path: &Path, content: &str, confidence: &ConfidenceConfig) -> FileScan {
    let rel = rel_string(rel_path);
    let mut scan = FileScan::default();
    let outline = YamlOutline::new(content);

    let mut docs = Vec::new();
    for block in outline.documents() {
        let text = outline.slice(&block);
        let value: Value = match serde_yaml::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                if text.contains("apiVersion") {
                    warn!("Skipping malformed manifest document in {}: {}", rel, e);
                    scan.warn(&rel, WarningKind::Malformed, e.to_string());
                }
                continue;
            }
        };
        let (Some(_), Some(kind)) = (
            get(&value, "apiVersion").and_then(Value::as_str),
            get(&value, "kind").and_then(Value::as_str),
        ) else {
            continue;
        };
        let kind = kind.to_string();
        let Some(name) = get(&value, "metadata")
            .and_then(|m| get(m, "name"))
            .and_then(Value::as_str)
            .map(|n| n.to_string())
        else {
            scan.warn(&rel, WarningKind::Malformed, format!("{} without metadata.name", kind));
            continue;
        };
        docs.push((block, value, kind, name));
    }
    if docs.is_empty() {
        debug!("{} holds no Kubernetes objects", rel);
        return scan;
    }

    let known: BTreeSet<String> = docs.iter().map(|(_, _, _, name)| name.clone()).collect();

    for (block, value, kind, name) in &docs {
        let doc = Document {
            block: *block,
            value,
            kind: kind.as_str(),
            name: name.as_str(),
        };
        match doc.kind {
            k if WORKLOAD_KINDS.contains(&k) || k == "CronJob" || k == "Pod" => {
                read_workload(&doc, &rel, &outline, &known, confidence, &mut scan)
            }
            "Service" => read_service(&doc, &rel, &outline, &mut scan),
            "NetworkPolicy" => read_network_policy(&doc, &rel, &mut scan),
            other => debug!("{}: ignoring {} {}", rel, other, doc.name),
        }
    }

    scan
}

fn pod_template<'v>(doc: &Document<'v>) -> Option<&'v Value> {
    match doc.kind {
        "Pod" => Some(doc.value),
        "CronJob" => get(doc.value, "spec")
            .and_then(|s| get(s, "jobTemplate"))
            .and_then(|j| get(j, "spec"))
            .and_then(|s| get(s, "template")),
        _ => get(doc.value, "spec").and_then(|s| get(s, "template")),
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_mapping)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((scalar(k)?, scalar(v)?)))
                .collect()
        })
        .unwrap_or_default()
}

fn read_workload(
    doc: &Document<'_>,
    rel: &str,
    outline: &YamlOutline<'_>,
    known: &BTreeSet<String>,
    confidence: &ConfidenceConfig,
    scan: &mut FileScan,
) {
    let Some(template) = pod_template(doc) else {
        scan.warn(rel, WarningKind::Malformed, format!("{} {} has no pod template", doc.kind, doc.name));
        return;
    };

    let mut obs = ServiceObservation::declared(doc.name, EdgeSource::Config);
    obs.blocks.push(SnippetRef {
        file_path: rel.to_string(),
        span: doc.block.span,
        line: doc.block.line,
    });
    obs.labels = string_map(get(template, "metadata").and_then(|m| get(m, "labels")));
    if obs.labels.is_empty() {
        obs.labels = string_map(get(doc.value, "metadata").and_then(|m| get(m, "labels")));
    }

    let pod_spec = get(template, "spec");
    let containers = ["initContainers", "containers"]
        .iter()
        .filter_map(|key| pod_spec.and_then(|s| get(s, key)).and_then(Value::as_sequence))
        .flatten();

    for container in containers {
        let container_name = get(container, "name").and_then(Value::as_str).unwrap_or("");
        let item = outline
            .list_item(&doc.block, "name", container_name)
            .unwrap_or(doc.block);
        let locate = |section: &str, needle: &str| {
            let within = outline.child(&item, section).unwrap_or(item);
            let line = outline
                .find(&within, needle)
                .map(|(l, _)| l)
                .unwrap_or(within.line);
            Location::line(rel, line)
        };

        for port in get(container, "ports")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
        {
            if let Some(p) = get(port, "containerPort")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
            {
                obs.ports.push(PortDeclaration {
                    port: p,
                    location: locate("ports", &p.to_string()),
                });
            }
        }

        for var in get(container, "env")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
        {
            let (Some(key), Some(value)) = (
                get(var, "name").and_then(Value::as_str),
                get(var, "value").and_then(scalar),
            ) else {
                continue;
            };
            let location = locate("env", key);
            if is_own_port_key(key) {
                if let Ok(p) = value.trim().parse::<u16>() {
                    obs.ports.push(PortDeclaration {
                        port: p,
                        location: location.clone(),
                    });
                }
            }
            if let Some(c) = env_candidate(doc.name, key, &value, location, known, confidence) {
                scan.candidates.push(c);
            }
            obs.env.insert(key.to_string(), value);
        }

        for key in ["command", "args"] {
            let Some(text) = get(container, key).and_then(command_text) else {
                continue;
            };
            let Some(section) = outline.child(&item, key) else {
                continue;
            };
            obs.invocations.push(SnippetRef {
                file_path: rel.to_string(),
                span: section.span,
                line: section.line,
            });
            let location = Location::line(rel, section.line);
            scan.candidates
                .extend(command_candidates(doc.name, &text, &location, confidence));
        }
    }

    scan.observations.push(obs);
}

fn read_service(doc: &Document<'_>, rel: &str, outline: &YamlOutline<'_>, scan: &mut FileScan) {
    let spec = get(doc.value, "spec");
    let selector = string_map(spec.and_then(|s| get(s, "selector")));
    if selector.is_empty() {
        debug!("{}: Service {} has no selector", rel, doc.name);
        return;
    }
    let location = Location::line(rel, doc.block.line);
    let section = outline.block(&doc.block, &["spec", "ports"]);
    let items = section.map(|s| outline.items(&s)).unwrap_or_default();
    let fallback = section.map(|s| s.line).unwrap_or(doc.block.line);

    let mut ports: Vec<PortDeclaration> = Vec::new();
    for (index, entry) in spec
        .and_then(|s| get(s, "ports"))
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .enumerate()
    {
        for key in ["port", "targetPort"] {
            let Some(p) = get(entry, key)
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
            else {
                continue;
            };
            if ports.iter().any(|d| d.port == p) {
                continue;
            }
            // Flow-style lists have no item lines; fall back to `ports:`.
            let line = items
                .get(index)
                .and_then(|item| outline.child(item, key))
                .map(|b| b.line)
                .unwrap_or(fallback);
            ports.push(PortDeclaration {
                port: p,
                location: Location::line(rel, line),
            });
        }
    }
    scan.aliases.push(AliasDeclaration {
        alias: doc.name.to_string(),
        selector,
        ports,
        location,
    });
}

fn read_network_policy(doc: &Document<'_>, rel: &str, scan: &mut FileScan) {
    let spec = get(doc.value, "spec");
    let selected = string_map(
        spec.and_then(|s| get(s, "podSelector"))
            .and_then(|p| get(p, "matchLabels")),
    );
    if selected.is_empty() {
        return;
    }
    let location = Location::line(rel, doc.block.line);

    let peers = |rules: &str, side: &str| -> Vec<BTreeMap<String, String>> {
        spec.and_then(|s| get(s, rules))
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
            .filter_map(|rule| get(rule, side).and_then(Value::as_sequence))
            .flatten()
            .map(|peer| {
                string_map(
                    get(peer, "podSelector").and_then(|p| get(p, "matchLabels")),
                )
            })
            .filter(|labels| !labels.is_empty())
            .collect()
    };

    for consumers in peers("ingress", "from") {
        scan.bindings.push(SelectorBinding {
            consumers,
            providers: selected.clone(),
            location: location.clone(),
        });
    }
    for providers in peers("egress", "to") {
        scan.bindings.push(SelectorBinding {
            consumers: selected.clone(),
            providers,
            location: location.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcgraph_core::TargetRef;

    const MANIFEST: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: orders
spec:
  template:
    metadata:
      labels:
        app: orders
    spec:
      containers:
        - name: api
          image: orders:1.0
          command: ["./orders", "--listen", "0.0.0.0:8000"]
          ports:
            - containerPort: 8000
          env:
            - name: INVENTORY_URL
              value: http://inventory:7000
            - name: CACHE_HOST
              value: cache.default.svc.cluster.local
---
apiVersion: v1
kind: Service
metadata:
  name: orders-svc
spec:
  selector:
    app: orders
  ports:
    - port: 80
      targetPort: 8000
---
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata:
  name: orders-ingress
spec:
  podSelector:
    matchLabels:
      app: orders
  ingress:
    - from:
        - podSelector:
            matchLabels:
              app: gateway
"#;

    fn scan() -> FileScan {
        scan_kubernetes(Path::new("k8s/orders.yaml"), MANIFEST, &ConfidenceConfig::default())
    }

    #[test]
    fn workloads_become_services() {
        let scan = scan();
        assert_eq!(scan.observations.len(), 1);
        let orders = &scan.observations[0];
        assert_eq!(orders.name, "orders");
        assert_eq!(orders.labels["app"], "orders");
        assert_eq!(orders.ports[0].port, 8000);
        assert_eq!(orders.ports[0].location.line, 16);
        assert_eq!(orders.invocations[0].line, 14);
        assert_eq!(orders.env["INVENTORY_URL"], "http://inventory:7000");
    }

    #[test]
    fn env_and_command_candidates() {
        let scan = scan();
        let targets: Vec<(String, bool)> = scan
            .candidates
            .iter()
            .map(|c| (c.to.to_string(), c.ambiguous))
            .collect();
        assert!(targets.contains(&("inventory:7000".to_string(), false)));
        assert!(targets.contains(&("cache.default.svc.cluster.local".to_string(), true)));
        // 0.0.0.0 is the service's own listener
        assert_eq!(targets.len(), 2);
        assert!(scan.candidates.iter().all(|c| c.from == "orders"));
        assert!(!scan
            .candidates
            .iter()
            .any(|c| c.to == TargetRef::Service { name: "orders-svc".into() }));
    }

    #[test]
    fn services_and_policies() {
        let scan = scan();
        assert_eq!(scan.aliases.len(), 1);
        let alias = &scan.aliases[0];
        assert_eq!(alias.alias, "orders-svc");
        assert_eq!(alias.selector["app"], "orders");
        let ports: Vec<(u16, u32)> = alias.ports.iter().map(|p| (p.port, p.location.line)).collect();
        assert_eq!(ports, vec![(80, 31), (8000, 32)]);

        assert_eq!(scan.bindings.len(), 1);
        assert_eq!(scan.bindings[0].consumers["app"], "gateway");
        assert_eq!(scan.bindings[0].providers["app"], "orders");
    }

    #[test]
    fn service_ports_point_at_their_own_lines() {
        let manifest = "\
apiVersion: v1
kind: Service
metadata:
  name: users
spec:
  selector:
    app: users
  ports:
    - name: http
      port: 80
      targetPort: 9090
    - name: admin
      port: 9090
      targetPort: 9091
";
        let scan = scan_kubernetes(Path::new("k8s/users.yaml"), manifest, &ConfidenceConfig::default());
        let ports: Vec<(u16, u32)> = scan.aliases[0]
            .ports
            .iter()
            .map(|p| (p.port, p.location.line))
            .collect();
        assert_eq!(ports, vec![(80, 10), (9090, 11), (9091, 14)]);
        assert_eq!(scan.aliases[0].location.line, 1);
    }

    #[test]
    fn flow_style_ports_fall_back_to_the_ports_key() {
        let manifest = "apiVersion: v1\nkind: Service\nmetadata:\n  name: users\nspec:\n  selector:\n    app: users\n  ports: [{port: 80}]\n";
        let scan = scan_kubernetes(Path::new("k8s/users.yaml"), manifest, &ConfidenceConfig::default());
        assert_eq!(scan.aliases[0].ports[0].port, 80);
        assert_eq!(scan.aliases[0].ports[0].location.line, 8);
    }

    #[test]
    fn non_kubernetes_yaml_is_ignored() {
        let scan = scan_kubernetes(
            Path::new(".github/workflows/ci.yml"),
            "on: push\njobs:\n  test:\n    runs-on: ubuntu-latest\n",
            &ConfidenceConfig::default(),
        );
        assert!(scan.is_empty());
        assert!(scan.warnings.is_empty());
    }
}
