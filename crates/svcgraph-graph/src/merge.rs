use crate::graph::{DependencyGraph, EdgeEvidence};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use svcgraph_core::{
    selector_matches, AliasDeclaration, CandidateEdge, Confidence, ConfidenceConfig, EdgeKind,
    EdgeSource, EdgeTarget, FileScan, Location, ObservationStrength, SelectorBinding,
    ServiceObservation, SvcGraphConfig, TargetRef,
};
use svcgraph_parser::{first_label, is_bare_word, looks_like_hostname, parse_address};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingReason {
    UnknownSource,
    UnknownTarget,
    UnresolvedEnvVar,
    UndeclaredEndpoint,
    EmptySelector,
}

/// A candidate the merger refused, kept as a data-quality finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub from: String,
    pub target: String,
    pub kind: EdgeKind,
    pub location: Option<Location>,
    pub reason: DanglingReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeReport {
    pub declared_services: usize,
    pub inferred_services: usize,
    /// Directory-derived observations folded into a declared service.
    pub folded_observations: usize,
    /// Directory-derived observations for a parent of declared build contexts.
    pub dropped_observations: usize,
    pub candidates: usize,
    pub accepted: usize,
    pub self_edges: usize,
    pub rejected: Vec<RejectedCandidate>,
    /// Selector aliases that matched no workload or more than one.
    pub unbound_aliases: Vec<String>,
    pub edges: usize,
    pub ambiguous_edges: usize,
}

impl MergeReport {
    pub fn rejected_by(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.rejected {
            let key = serde_json::to_value(r.reason)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            *counts.entry(key).or_default() += 1;
        }
        counts
    }
}

/// Lower-cased name -> service. The first binding of a name wins.
#[derive(Debug, Default)]
struct AliasTable {
    names: HashMap<String, String>,
}

impl AliasTable {
    fn bind(&mut self, alias: &str, service: &str) {
        let key = alias.trim().to_ascii_lowercase();
        if key.is_empty() {
            return;
        }
        match self.names.get(&key) {
            Some(existing) if existing != service => {
                debug!("Alias {} already names {}; ignoring {}", key, existing, service);
            }
            Some(_) => {}
            None => {
                self.names.insert(key, service.to_string());
            }
        }
    }

    /// Exact name first, then the first DNS label (`users.default.svc` -> `users`).
    fn resolve(&self, name: &str) -> Option<&str> {
        let key = name.trim().to_ascii_lowercase();
        self.names
            .get(&key)
            .or_else(|| self.names.get(first_label(&key)))
            .map(String::as_str)
    }
}

/// Name first, then where the observation came from.
fn observation_order(a: &ServiceObservation, b: &ServiceObservation) -> Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.blocks.first().cmp(&b.blocks.first()))
        .then_with(|| {
            let port = |o: &ServiceObservation| o.ports.first().map(|p| p.location.clone());
            port(a).cmp(&port(b))
        })
        .then_with(|| a.build_dirs.cmp(&b.build_dirs))
}

fn is_dir_prefix(dir: &str, path: &str) -> bool {
    dir.is_empty() || path == dir || path.starts_with(&format!("{}/", dir))
}

fn join_paths(base: Option<String>, path: Option<String>) -> Option<String> {
    match (base, path) {
        (Some(b), Some(p)) => Some(format!("{}/{}", b.trim_end_matches('/'), p.trim_start_matches('/'))),
        (b, p) => p.or(b),
    }
}

/// Unions every scanner's output into one [`DependencyGraph`].
///
/// Runs once, after all scans finished, and owns the graph while it works.
pub struct GraphMerger {
    confidence: ConfidenceConfig,
}

struct MergeState {
    graph: DependencyGraph,
    aliases: AliasTable,
    /// (build directory, service), any order; lookups take the longest match,
    /// then the smallest service name.
    build_dirs: Vec<(String, String)>,
    report: MergeReport,
}

impl GraphMerger {
    pub fn new(confidence: ConfidenceConfig) -> Self {
        Self { confidence }
    }

    pub fn from_config(config: &SvcGraphConfig) -> Self {
        Self::new(config.confidence.clone())
    }

    pub fn merge(&self, scan: FileScan) -> (DependencyGraph, MergeReport) {
        let FileScan {
            observations,
            candidates,
            aliases,
            bindings,
            ..
        } = scan;
        let mut state = MergeState {
            graph: DependencyGraph::new(),
            aliases: AliasTable::default(),
            build_dirs: Vec::new(),
            report: MergeReport::default(),
        };

        let (mut declared, mut inferred): (Vec<_>, Vec<_>) = observations
            .into_iter()
            .partition(|o| o.strength == ObservationStrength::Declared);
        // Scans finish in any order; first-wins alias binding needs a fixed one.
        declared.sort_by(observation_order);
        let mut candidates = candidates;
        candidates.sort_by(|a, b| {
            (&a.location, &a.from, &a.to, &a.kind, a.source)
                .cmp(&(&b.location, &b.from, &b.to, &b.kind, b.source))
        });
        let mut aliases = aliases;
        aliases.sort_by(|a, b| (&a.location, &a.alias).cmp(&(&b.location, &b.alias)));
        let mut bindings = bindings;
        bindings.sort_by(|a, b| a.location.cmp(&b.location));

        for obs in declared {
            state.absorb_declared(obs);
        }
        state.report.declared_services = state.graph.service_count();

        for decl in &aliases {
            state.bind_selector_alias(decl);
        }

        inferred.sort_by(observation_order);
        for obs in inferred {
            state.absorb_inferred(obs);
        }

        state.report.candidates = candidates.len();
        for candidate in candidates {
            state.add_candidate(candidate);
        }
        for binding in &bindings {
            state.add_binding(binding, Confidence::new(self.confidence.selector_binding));
        }

        state.report.edges = state.graph.edge_count();
        state.report.ambiguous_edges = state.graph.edges().iter().filter(|e| e.ambiguous).count();
        info!(
            "Merged {} services ({} inferred), {} edges; rejected {} candidates",
            state.graph.service_count(),
            state.report.inferred_services,
            state.report.edges,
            state.report.rejected.len()
        );
        (state.graph, state.report)
    }
}

impl MergeState {
    fn absorb_declared(&mut self, obs: ServiceObservation) {
        let name = obs.name.clone();
        self.aliases.bind(&name, &name);
        for alias in &obs.aliases {
            self.aliases.bind(alias, &name);
        }
        for dir in &obs.build_dirs {
            self.build_dirs.push((dir.clone(), name.clone()));
        }
        self.graph.ensure_service(&name).absorb(obs);
    }

    fn bind_selector_alias(&mut self, decl: &AliasDeclaration) {
        let matches: Vec<String> = self
            .graph
            .services()
            .filter(|s| selector_matches(&decl.selector, &s.connection.labels))
            .map(|s| s.name.clone())
            .collect();
        match matches.as_slice() {
            [service] => {
                self.aliases.bind(&decl.alias, service);
                if let Some(svc) = self.graph.service_mut(service) {
                    svc.connection.aliases.insert(decl.alias.clone());
                    for port in &decl.ports {
                        svc.connection.add_port(port.clone());
                    }
                }
            }
            _ => {
                warn!(
                    "Alias {} at {} selects {} workloads; left unbound",
                    decl.alias,
                    decl.location,
                    matches.len()
                );
                self.report.unbound_aliases.push(decl.alias.clone());
            }
        }
    }

    fn owner_by_dir(&self, path: &str) -> Option<&str> {
        self.build_dirs
            .iter()
            .filter(|(dir, _)| is_dir_prefix(dir, path))
            .max_by(|(a, a_svc), (b, b_svc)| a.len().cmp(&b.len()).then_with(|| b_svc.cmp(a_svc)))
            .map(|(_, service)| service.as_str())
    }

    fn absorb_inferred(&mut self, obs: ServiceObservation) {
        let by_dir = obs
            .build_dirs
            .iter()
            .filter_map(|d| self.owner_by_dir(d).map(|s| s.to_string()))
            .next();
        let target = by_dir.or_else(|| self.aliases.resolve(&obs.name).map(str::to_string));

        if let Some(service) = target {
            debug!("Folding {} ({}) into {}", obs.name, obs.source, service);
            self.graph.ensure_service(&service).absorb(obs);
            self.report.folded_observations += 1;
            return;
        }

        let parent_of_declared = self
            .build_dirs
            .iter()
            .any(|(dir, _)| dir.starts_with(&format!("{}/", obs.name)));
        if parent_of_declared {
            debug!("{} only contains declared build contexts; not a service", obs.name);
            self.report.dropped_observations += 1;
            return;
        }

        let name = obs.name.clone();
        self.aliases.bind(&name, &name);
        for dir in &obs.build_dirs {
            self.build_dirs.push((dir.clone(), name.clone()));
        }
        if !self.graph.contains_service(&name) {
            self.report.inferred_services += 1;
        }
        self.graph.ensure_service(&name).absorb(obs);
    }

    fn reject(&mut self, c: &CandidateEdge, from: &str, reason: DanglingReason) {
        debug!("Rejecting {} -> {} ({:?})", from, c.to, reason);
        self.report.rejected.push(RejectedCandidate {
            from: from.to_string(),
            target: c.to.to_string(),
            kind: c.kind.clone(),
            location: c.location.clone(),
            reason,
        });
    }

    fn resolve_source(&self, c: &CandidateEdge) -> Option<String> {
        let by_name = self.aliases.resolve(&c.from).map(str::to_string);
        let by_dir = || {
            c.location
                .as_ref()
                .and_then(|loc| self.owner_by_dir(&loc.file_path))
                .map(str::to_string)
        };
        // Code owners are directory guesses; a build context is stronger evidence.
        if c.source == EdgeSource::Code {
            by_dir().or(by_name)
        } else {
            by_name.or_else(by_dir)
        }
    }

    /// Host (or service name) and optional path the candidate points at.
    fn target_host(&self, c: &CandidateEdge, from: &str) -> Option<(String, Option<String>)> {
        match &c.to {
            TargetRef::Service { name } => Some((name.clone(), None)),
            TargetRef::Address { host, path, .. } => Some((host.clone(), path.clone())),
            TargetRef::EnvVar { name, path } => {
                let value = self.graph.service(from)?.connection.env.get(name)?;
                let (host, base) = match parse_address(value) {
                    Some(addr) => {
                        let base = addr.path.clone().filter(|p| p != "/");
                        (addr.host, base)
                    }
                    None if is_bare_word(value) || looks_like_hostname(value) => {
                        (value.trim().to_ascii_lowercase(), None)
                    }
                    None => return None,
                };
                Some((host, join_paths(base, path.clone())))
            }
        }
    }

    fn add_candidate(&mut self, c: CandidateEdge) {
        let Some(from) = self.resolve_source(&c) else {
            let from = c.from.clone();
            self.reject(&c, &from, DanglingReason::UnknownSource);
            return;
        };
        let Some((host, path)) = self.target_host(&c, &from) else {
            self.reject(&c, &from, DanglingReason::UnresolvedEnvVar);
            return;
        };
        let Some(service) = self.aliases.resolve(&host).map(str::to_string) else {
            self.reject(&c, &from, DanglingReason::UnknownTarget);
            return;
        };
        if service == from {
            self.report.self_edges += 1;
            return;
        }

        let mut kind = c.kind.clone();
        let mut to = EdgeTarget::service(&service);
        let calls = matches!(kind, EdgeKind::DirectCall | EdgeKind::RestCall);
        if let (true, Some(path)) = (calls, path.as_deref().filter(|p| *p != "/")) {
            if let Some(svc) = self.graph.service(&service).filter(|s| s.has_contract()) {
                match svc.find_endpoint(path) {
                    Some(endpoint) => {
                        to = EdgeTarget::endpoint(&service, endpoint.path.clone());
                        kind = EdgeKind::RestCall;
                    }
                    None => {
                        self.reject(&c, &from, DanglingReason::UndeclaredEndpoint);
                        return;
                    }
                }
            }
        }

        let evidence = EdgeEvidence {
            source: c.source,
            location: c.location.clone(),
            confidence: c.confidence,
            method: c.method,
            ambiguous: c.ambiguous,
        };
        match self.graph.observe_edge(&from, to, kind, evidence) {
            Ok(_) => self.report.accepted += 1,
            Err(e) => {
                warn!("Edge {} -> {} refused: {}", from, service, e);
                self.reject(&c, &from, DanglingReason::UnknownTarget);
            }
        }
    }

    fn add_binding(&mut self, binding: &SelectorBinding, confidence: Confidence) {
        let select = |selector: &BTreeMap<String, String>| -> Vec<String> {
            self.graph
                .services()
                .filter(|s| selector_matches(selector, &s.connection.labels))
                .map(|s| s.name.clone())
                .collect()
        };
        let consumers = select(&binding.consumers);
        let providers = select(&binding.providers);
        if consumers.is_empty() || providers.is_empty() {
            debug!("Selector binding at {} matches no workloads", binding.location);
            self.report.rejected.push(RejectedCandidate {
                from: format!("{:?}", binding.consumers),
                target: format!("{:?}", binding.providers),
                kind: EdgeKind::NetworkBinding,
                location: Some(binding.location.clone()),
                reason: DanglingReason::EmptySelector,
            });
            return;
        }

        for consumer in &consumers {
            for provider in &providers {
                if consumer == provider {
                    continue;
                }
                let evidence = EdgeEvidence {
                    source: EdgeSource::Config,
                    location: Some(binding.location.clone()),
                    confidence,
                    method: None,
                    ambiguous: false,
                };
                if self
                    .graph
                    .observe_edge(consumer, EdgeTarget::service(provider), EdgeKind::NetworkBinding, evidence)
                    .is_ok()
                {
                    self.report.accepted += 1;
                }
            }
        }
    }
}
