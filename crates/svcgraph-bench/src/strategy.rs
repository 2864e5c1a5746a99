//! Masking strategies: where, in a consumer's snippets, a value sits that
//! only the provider defines.

use crate::context::{port_tokens, resolve_host, Corpus, DocKind, Document, Slot, SlotKind};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use svcgraph_core::{DependencyEdge, EdgeId, Result, SnippetRef, Span, SvcGraphError};
use svcgraph_graph::DependencyGraph;
use svcgraph_parser::find_addresses;

/// One span a strategy would mask, before any invariant is checked.
#[derive(Debug, Clone)]
pub struct MaskProposal {
    pub strategy: &'static str,
    pub edge_ids: Vec<EdgeId>,
    pub slot: Slot,
    /// The snippet shown in the prompt.
    pub snippet: SnippetRef,
    pub snippet_text: String,
    /// Masked bytes, absolute within the file.
    pub mask: Span,
    pub expected: String,
}

impl MaskProposal {
    pub fn relative_mask(&self) -> Range<usize> {
        let base = self.snippet.span.start();
        self.mask.start() - base..self.mask.end() - base
    }
}

pub struct ProposalContext<'a> {
    pub graph: &'a DependencyGraph,
    pub corpus: &'a Corpus,
}

impl<'a> ProposalContext<'a> {
    /// Turns a hit inside `doc` into a proposal over the snippet that best
    /// encloses it.
    fn proposal(
        &self,
        strategy: &'static str,
        edge: &DependencyEdge,
        doc: &Document,
        local: Range<usize>,
        kind: SlotKind,
    ) -> Option<MaskProposal> {
        let base = doc.snippet.span.start();
        let absolute = base + local.start..base + local.end;
        let shown = self.corpus.enclosing(&doc.snippet.file_path, &absolute)?;
        let method = match kind {
            SlotKind::Path => edge.methods.iter().next().copied(),
            _ => None,
        };
        Some(MaskProposal {
            strategy,
            edge_ids: vec![edge.id],
            slot: Slot {
                kind,
                consumer: edge.from.clone(),
                provider: edge.target_service().to_string(),
                method,
            },
            snippet: shown.snippet.clone(),
            snippet_text: shown.text.clone(),
            mask: Span::new(absolute.start, absolute.end),
            expected: doc.text[local].to_string(),
        })
    }

    fn consumer_docs<'e>(&'e self, edge: &'e DependencyEdge) -> impl Iterator<Item = &'e Document> {
        self.corpus.of(&edge.from)
    }

    fn points_at(&self, host: &str, edge: &DependencyEdge) -> bool {
        resolve_host(self.graph, host) == Some(edge.target_service())
    }
}

pub trait MaskingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn propose(&self, edge: &DependencyEdge, ctx: &ProposalContext<'_>) -> Result<Vec<MaskProposal>>;
}

/// The port of a URL or `host:port` that names the provider.
pub struct UrlPortStrategy;

impl MaskingStrategy for UrlPortStrategy {
    fn name(&self) -> &'static str {
        "url-port"
    }

    fn propose(&self, edge: &DependencyEdge, ctx: &ProposalContext<'_>) -> Result<Vec<MaskProposal>> {
        let mut out = Vec::new();
        for doc in ctx.consumer_docs(edge) {
            for addr in find_addresses(&doc.text) {
                let Some(range) = addr.port_range.clone() else {
                    continue;
                };
                if ctx.points_at(&addr.host, edge) {
                    out.extend(ctx.proposal(self.name(), edge, doc, range, SlotKind::Port));
                }
            }
        }
        Ok(out)
    }
}

/// A provider port passed as a plain argument of the consumer's startup command.
pub struct InvocationPortStrategy;

impl MaskingStrategy for InvocationPortStrategy {
    fn name(&self) -> &'static str {
        "invocation-port"
    }

    fn propose(&self, edge: &DependencyEdge, ctx: &ProposalContext<'_>) -> Result<Vec<MaskProposal>> {
        let ports = |name: &str| {
            ctx.graph
                .service(name)
                .map(|s| s.connection.port_set())
                .unwrap_or_default()
        };
        let provider_ports = ports(edge.target_service());
        let own_ports = ports(&edge.from);

        let mut out = Vec::new();
        for doc in ctx
            .consumer_docs(edge)
            .filter(|d| d.kind == DocKind::Invocation)
        {
            for (port, range) in port_tokens(&doc.text) {
                if provider_ports.contains(&port) && !own_ports.contains(&port) {
                    out.extend(ctx.proposal(self.name(), edge, doc, range, SlotKind::Port));
                }
            }
        }
        Ok(out)
    }
}

/// The path of a URL to the provider, when it is one of the provider's
/// literal (non-templated) endpoints.
pub struct EndpointPathStrategy;

impl MaskingStrategy for EndpointPathStrategy {
    fn name(&self) -> &'static str {
        "endpoint-path"
    }

    fn propose(&self, edge: &DependencyEdge, ctx: &ProposalContext<'_>) -> Result<Vec<MaskProposal>> {
        let Some(provider) = ctx.graph.service(edge.target_service()) else {
            return Ok(Vec::new());
        };
        if !provider.has_contract() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for doc in ctx.consumer_docs(edge) {
            for addr in find_addresses(&doc.text) {
                let (Some(path), Some(range)) = (addr.path.as_deref(), addr.path_range.clone()) else {
                    continue;
                };
                let literal = provider
                    .endpoints
                    .get(path)
                    .map(|e| !e.is_templated())
                    .unwrap_or(false);
                if literal && ctx.points_at(&addr.host, edge) {
                    out.extend(ctx.proposal(self.name(), edge, doc, range, SlotKind::Path));
                }
            }
        }
        Ok(out)
    }
}

/// The host part of an address naming the provider.
pub struct ConnectionHostStrategy;

impl MaskingStrategy for ConnectionHostStrategy {
    fn name(&self) -> &'static str {
        "connection-host"
    }

    fn propose(&self, edge: &DependencyEdge, ctx: &ProposalContext<'_>) -> Result<Vec<MaskProposal>> {
        let mut out = Vec::new();
        for doc in ctx.consumer_docs(edge) {
            for addr in find_addresses(&doc.text) {
                if ctx.points_at(&addr.host, edge) {
                    out.extend(ctx.proposal(
                        self.name(),
                        edge,
                        doc,
                        addr.host_range.clone(),
                        SlotKind::Host,
                    ));
                }
            }
        }
        Ok(out)
    }
}

pub fn strategy_by_name(name: &str) -> Result<Arc<dyn MaskingStrategy>> {
    match name {
        "url-port" => Ok(Arc::new(UrlPortStrategy)),
        "invocation-port" => Ok(Arc::new(InvocationPortStrategy)),
        "endpoint-path" => Ok(Arc::new(EndpointPathStrategy)),
        "connection-host" => Ok(Arc::new(ConnectionHostStrategy)),
        other => Err(SvcGraphError::Config(format!("unknown masking strategy: {}", other))),
    }
}

/// Merges proposals that mask the same bytes, keeping every justifying edge.
pub fn dedupe(proposals: Vec<MaskProposal>) -> Vec<MaskProposal> {
    let mut merged: BTreeMap<(String, Span, &'static str), MaskProposal> = BTreeMap::new();
    for p in proposals {
        let key = (p.snippet.file_path.clone(), p.mask, p.strategy);
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.edge_ids.extend(p.edge_ids);
                existing.edge_ids.sort();
                existing.edge_ids.dedup();
            }
            None => {
                merged.insert(key, p);
            }
        }
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::MemorySnippets;
    use svcgraph_core::{
        Confidence, EdgeKind, EdgeSource, EdgeTarget, Endpoint, HttpMethod, Location,
        PortDeclaration,
    };
    use svcgraph_graph::EdgeEvidence;

    const CODE: &str = "import requests\nresp = requests.get(\"http://users:9090/health\")\n";

    fn fixture() -> (DependencyGraph, MemorySnippets) {
        let mut snippets = MemorySnippets::new();
        snippets.insert("gateway/app.py", CODE);

        let mut graph = DependencyGraph::new();
        let users = graph.ensure_service("users");
        users.connection.add_port(PortDeclaration {
            port: 9090,
            location: Location::line("docker-compose.yml", 4),
        });
        users.observed_by.insert(EdgeSource::Contract);
        users.add_endpoint(Endpoint::new("users", "/health").with_method(HttpMethod::Get));
        graph.ensure_service("gateway");
        graph
            .observe_edge(
                "gateway",
                EdgeTarget::service("users"),
                EdgeKind::DirectCall,
                EdgeEvidence {
                    source: EdgeSource::Code,
                    location: Some(Location::line("gateway/app.py", 2)),
                    confidence: Confidence::new(0.9),
                    method: Some(HttpMethod::Get),
                    ambiguous: false,
                },
            )
            .unwrap();
        (graph, snippets)
    }

    fn run(name: &str) -> Vec<MaskProposal> {
        let (graph, snippets) = fixture();
        let corpus = Corpus::collect(&graph, &snippets);
        let ctx = ProposalContext {
            graph: &graph,
            corpus: &corpus,
        };
        let strategy = strategy_by_name(name).unwrap();
        let edge = &graph.edges()[0];
        strategy.propose(edge, &ctx).unwrap()
    }

    #[test]
    fn url_port_and_host() {
        let ports = run("url-port");
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].expected, "9090");
        assert_eq!(ports[0].slot.provider, "users");
        let rel = ports[0].relative_mask();
        assert_eq!(&ports[0].snippet_text[rel], "9090");

        let hosts = run("connection-host");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].expected, "users");
    }

    #[test]
    fn endpoint_path_needs_a_literal_endpoint() {
        let paths = run("endpoint-path");
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].expected, "/health");
        assert_eq!(paths[0].slot.method, Some(HttpMethod::Get));
    }

    #[test]
    fn invocation_port_ignores_code() {
        assert!(run("invocation-port").is_empty());
    }

    #[test]
    fn unknown_strategy_is_a_config_error() {
        assert!(matches!(
            strategy_by_name("random-token"),
            Err(SvcGraphError::Config(_))
        ));
    }

    #[test]
    fn duplicates_merge_edge_ids() {
        let mut a = run("url-port").remove(0);
        let mut b = a.clone();
        b.edge_ids = vec![EdgeId::new_v4()];
        a.edge_ids.push(a.edge_ids[0]);
        let merged = dedupe(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].edge_ids.len(), 2);
    }
}
