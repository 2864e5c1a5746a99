use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::path::Path;
use svcgraph_core::{
    Confidence, DependencyEdge, EdgeId, EdgeKind, EdgeSource, EdgeTarget, HttpMethod, Location,
    Result, Service, SvcGraphError,
};
use tracing::debug;

type EdgeKey = (String, EdgeTarget, EdgeKind);

/// One piece of evidence for an edge, as handed to [`DependencyGraph::observe_edge`].
#[derive(Debug, Clone)]
pub struct EdgeEvidence {
    pub source: EdgeSource,
    pub location: Option<Location>,
    pub confidence: Confidence,
    pub method: Option<HttpMethod>,
    pub ambiguous: bool,
}

/// Services and the directed, annotated multigraph of their dependencies.
///
/// Edges are keyed by `(from, to, kind)`; two edges between the same pair
/// only coexist when their kinds differ. Every edge references services
/// present in the graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    services: BTreeMap<String, Service>,
    edges: Vec<DependencyEdge>,
    index: HashMap<EdgeKey, usize>,
}

/// Serializable form of a graph, written as `graph.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub generated_at: DateTime<Utc>,
    pub services: Vec<Service>,
    pub edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.get_mut(name)
    }

    /// Returns the named service, creating it on first sight.
    pub fn ensure_service(&mut self, name: &str) -> &mut Service {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| Service::new(name))
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, id: EdgeId) -> Option<&DependencyEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Adds evidence for `from -> to` of `kind`, creating the edge or
    /// coalescing into the existing one.
    ///
    /// Rejects self-edges and references to services (or endpoints) the
    /// graph does not know.
    pub fn observe_edge(
        &mut self,
        from: &str,
        to: EdgeTarget,
        kind: EdgeKind,
        evidence: EdgeEvidence,
    ) -> Result<EdgeId> {
        if from == to.service_name() {
            return Err(SvcGraphError::InvalidOperation(format!(
                "self-edge on {}",
                from
            )));
        }
        if !self.contains_service(from) {
            return Err(SvcGraphError::DanglingReference(format!(
                "unknown source service {}",
                from
            )));
        }
        let target = self
            .services
            .get(to.service_name())
            .ok_or_else(|| {
                SvcGraphError::DanglingReference(format!("unknown target service {}", to))
            })?;
        if let Some(path) = to.path() {
            if !target.endpoints.contains_key(path) {
                return Err(SvcGraphError::DanglingReference(format!(
                    "{} declares no endpoint {}",
                    target.name, path
                )));
            }
        }

        let key = (from.to_string(), to.clone(), kind.clone());
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                debug!("New edge {} -> {} ({})", from, to, kind);
                self.edges.push(DependencyEdge::new(from, to, kind));
                self.index.insert(key, self.edges.len() - 1);
                self.edges.len() - 1
            }
        };
        let edge = &mut self.edges[idx];
        edge.observe(
            evidence.source,
            evidence.location,
            evidence.confidence,
            evidence.method,
            evidence.ambiguous,
        );
        Ok(edge.id)
    }

    pub fn edges_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.from == name)
    }

    pub fn edges_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| e.target_service() == name)
    }

    /// Services `name` depends on (successors).
    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        self.edges_from(name)
            .map(|e| e.target_service().to_string())
            .collect()
    }

    /// Services depending on `name` (predecessors).
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        self.edges_to(name).map(|e| e.from.clone()).collect()
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges_from(from).any(|e| e.target_service() == to)
    }

    pub fn has_edge_of_kind(&self, from: &str, to: &str, kind: &EdgeKind) -> bool {
        self.edges_from(from)
            .any(|e| e.target_service() == to && &e.kind == kind)
    }

    pub fn reachable(&self, from: &str, to: &str) -> bool {
        self.shortest_path(from, to).is_some()
    }

    /// Breadth-first shortest dependency chain, both ends included.
    /// Neighbours are visited in name order, so ties resolve the same way
    /// every run.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.contains_service(from) || !self.contains_service(to) {
            return None;
        }

        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut parent: HashMap<String, String> = HashMap::new();

        queue.push_back(from.to_string());
        visited.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut node = current;
                while let Some(prev) = parent.get(&node) {
                    path.push(prev.clone());
                    node = prev.clone();
                }
                path.reverse();
                return Some(path);
            }

            for neighbor in self.dependencies(&current) {
                if visited.insert(neighbor.clone()) {
                    parent.insert(neighbor.clone(), current.clone());
                    queue.push_back(neighbor);
                }
            }
        }

        None
    }

    /// Same services, keeping only edges at or above `min_confidence`.
    pub fn trusted(&self, min_confidence: f64) -> DependencyGraph {
        let mut graph = DependencyGraph {
            services: self.services.clone(),
            ..DependencyGraph::default()
        };
        for edge in self.edges.iter().filter(|e| e.confidence.value() >= min_confidence) {
            let key = (edge.from.clone(), edge.to.clone(), edge.kind.clone());
            graph.edges.push(edge.clone());
            graph.index.insert(key, graph.edges.len() - 1);
        }
        graph
    }

    /// Checks that every edge references known services and endpoints.
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            if !self.contains_service(&edge.from) {
                return Err(SvcGraphError::DanglingReference(format!(
                    "edge {} starts at unknown service {}",
                    edge.id, edge.from
                )));
            }
            let target = self.services.get(edge.target_service()).ok_or_else(|| {
                SvcGraphError::DanglingReference(format!(
                    "edge {} points at unknown service {}",
                    edge.id, edge.to
                ))
            })?;
            if let Some(path) = edge.to.path() {
                if !target.endpoints.contains_key(path) {
                    return Err(SvcGraphError::DanglingReference(format!(
                        "edge {} points at undeclared endpoint {}",
                        edge.id, edge.to
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            generated_at: Utc::now(),
            services: self.services.values().cloned().collect(),
            edges: self.edges.clone(),
        }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = DependencyGraph::new();
        for service in snapshot.services {
            graph.services.insert(service.name.clone(), service);
        }
        for edge in snapshot.edges {
            let key = (edge.from.clone(), edge.to.clone(), edge.kind.clone());
            if graph.index.contains_key(&key) {
                return Err(SvcGraphError::Graph(format!(
                    "duplicate edge {} -> {} ({})",
                    edge.from, edge.to, edge.kind
                )));
            }
            graph.edges.push(edge);
            graph.index.insert(key, graph.edges.len() - 1);
        }
        graph.validate()?;
        Ok(graph)
    }

    pub async fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load_json(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let snapshot: GraphSnapshot = serde_json::from_str(&content)?;
        Self::from_snapshot(snapshot)
    }

    /// Graphviz rendering. Ambiguous edges are dashed.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph services {\n  rankdir=LR;\n  node [shape=box];\n");
        for name in self.services.keys() {
            let _ = writeln!(out, "  \"{}\";", name);
        }
        for edge in self.sorted_edges() {
            let mut label = format!("{} {}", edge.kind, edge.confidence);
            if let Some(path) = edge.to.path() {
                label = format!("{} {}", path, label);
            }
            let style = if edge.ambiguous { ", style=dashed" } else { "" };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"{}];",
                edge.from,
                edge.target_service(),
                label.replace('"', "\\\""),
                style
            );
        }
        out.push_str("}\n");
        out
    }

    /// Canonical plain-text description: services then edges, both sorted.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "services: {}", self.services.len());
        for service in self.services.values() {
            let mut facts = Vec::new();
            if let Some(version) = &service.version {
                facts.push(format!("version {}", version));
            }
            let ports = service.connection.port_set();
            if !ports.is_empty() {
                let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
                facts.push(format!("ports {}", ports.join(", ")));
            }
            if !service.endpoints.is_empty() {
                let endpoints: Vec<String> = service
                    .endpoints
                    .values()
                    .map(|e| {
                        let methods: Vec<&str> = e.methods().iter().map(|m| m.as_str()).collect();
                        format!("{} {}", methods.join("|"), e.path)
                    })
                    .collect();
                facts.push(format!("endpoints {}", endpoints.join(", ")));
            }
            if facts.is_empty() {
                let _ = writeln!(out, "- {}", service.name);
            } else {
                let _ = writeln!(out, "- {} ({})", service.name, facts.join("; "));
            }
        }
        let _ = writeln!(out, "dependencies: {}", self.edges.len());
        for edge in self.sorted_edges() {
            let _ = writeln!(
                out,
                "- {} -> {} [{}] confidence {}{}",
                edge.from,
                edge.to,
                edge.kind,
                edge.confidence,
                if edge.ambiguous { " (ambiguous)" } else { "" }
            );
        }
        out
    }

    fn sorted_edges(&self) -> Vec<&DependencyEdge> {
        let mut edges: Vec<&DependencyEdge> = self.edges.iter().collect();
        edges.sort_by(|a, b| (&a.from, &a.to, &a.kind).cmp(&(&b.from, &b.to, &b.kind)));
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcgraph_core::Endpoint;

    fn evidence(file: &str) -> EdgeEvidence {
        EdgeEvidence {
            source: EdgeSource::Config,
            location: Some(Location::line(file, 1)),
            confidence: Confidence::new(0.9),
            method: None,
            ambiguous: false,
        }
    }

    fn chain() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for name in ["gateway", "orders", "users", "audit"] {
            graph.ensure_service(name);
        }
        for (from, to) in [("gateway", "orders"), ("orders", "users"), ("gateway", "audit")] {
            graph
                .observe_edge(from, EdgeTarget::service(to), EdgeKind::DeclaredLink, evidence("c.yml"))
                .unwrap();
        }
        graph
    }

    #[test]
    fn queries_follow_edge_direction() {
        let graph = chain();
        assert_eq!(
            graph.dependencies("gateway"),
            ["audit", "orders"].iter().map(|s| s.to_string()).collect()
        );
        assert_eq!(
            graph.dependents("users"),
            ["orders"].iter().map(|s| s.to_string()).collect()
        );
        assert!(graph.has_edge("orders", "users"));
        assert!(!graph.has_edge("users", "orders"));
        assert!(graph.reachable("gateway", "users"));
        assert!(!graph.reachable("users", "gateway"));
        assert_eq!(
            graph.shortest_path("gateway", "users").unwrap(),
            vec!["gateway", "orders", "users"]
        );
        assert_eq!(graph.shortest_path("audit", "audit").unwrap(), vec!["audit"]);
    }

    #[test]
    fn rejects_dangling_and_self_edges() {
        let mut graph = chain();
        let err = graph
            .observe_edge("gateway", EdgeTarget::service("billing"), EdgeKind::DeclaredLink, evidence("c.yml"))
            .unwrap_err();
        assert!(matches!(err, SvcGraphError::DanglingReference(_)));
        let err = graph
            .observe_edge("gateway", EdgeTarget::service("gateway"), EdgeKind::DeclaredLink, evidence("c.yml"))
            .unwrap_err();
        assert!(matches!(err, SvcGraphError::InvalidOperation(_)));
        let err = graph
            .observe_edge("gateway", EdgeTarget::endpoint("users", "/users"), EdgeKind::RestCall, evidence("a.py"))
            .unwrap_err();
        assert!(matches!(err, SvcGraphError::DanglingReference(_)));
        assert_eq!(graph.edge_count(), 3);
        graph.validate().unwrap();
    }

    #[test]
    fn same_pair_coalesces_per_kind() {
        let mut graph = chain();
        graph
            .observe_edge("gateway", EdgeTarget::service("orders"), EdgeKind::DeclaredLink, evidence("other.yml"))
            .unwrap();
        graph
            .observe_edge("gateway", EdgeTarget::service("orders"), EdgeKind::NetworkBinding, evidence("c.yml"))
            .unwrap();
        assert_eq!(graph.edge_count(), 4);
        let link = graph
            .edges_from("gateway")
            .find(|e| e.target_service() == "orders" && e.kind == EdgeKind::DeclaredLink)
            .unwrap();
        assert_eq!(link.observations, 2);
        assert!(link.confidence.value() > 0.9);
    }

    #[test]
    fn endpoint_edges_need_a_declared_path() {
        let mut graph = chain();
        graph
            .ensure_service("users")
            .add_endpoint(Endpoint::new("users", "/users/{id}").with_method(HttpMethod::Get));
        graph
            .observe_edge(
                "gateway",
                EdgeTarget::endpoint("users", "/users/{id}"),
                EdgeKind::RestCall,
                evidence("gateway/app.py"),
            )
            .unwrap();
        assert!(graph.has_edge_of_kind("gateway", "users", &EdgeKind::RestCall));
        assert!(graph.describe().contains("gateway -> users/users/{id}"));
        assert!(graph.to_dot().contains("\"gateway\" -> \"users\""));
    }

    #[tokio::test]
    async fn json_snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        let graph = chain();
        graph.save_json(&path).await.unwrap();
        let loaded = DependencyGraph::load_json(&path).await.unwrap();
        assert_eq!(loaded.service_count(), 4);
        assert_eq!(loaded.edge_count(), 3);
        assert_eq!(loaded.describe(), graph.describe());
    }

    #[test]
    fn trusted_view_drops_weak_edges() {
        let mut graph = chain();
        let mut weak = evidence("users/Dockerfile");
        weak.confidence = Confidence::new(0.4);
        graph
            .observe_edge("users", EdgeTarget::service("audit"), EdgeKind::NetworkBinding, weak)
            .unwrap();
        assert!(graph.reachable("users", "audit"));

        let trusted = graph.trusted(0.5);
        assert_eq!(trusted.service_count(), 4);
        assert_eq!(trusted.edge_count(), 3);
        assert!(!trusted.reachable("users", "audit"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        tokio_test::block_on(async {
            trusted.save_json(&path).await.unwrap();
            let loaded = DependencyGraph::load_json(&path).await.unwrap();
            assert!(!loaded.has_edge("users", "audit"));
        });
    }
}
