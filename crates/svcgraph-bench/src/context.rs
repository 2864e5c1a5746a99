//! What a model could know besides the masked snippet, and the oracle that
//! decides which answers that knowledge supports.

use crate::snippet::{line_snippet, SnippetSource};
use crate::task::ContextDocument;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;
use svcgraph_core::{HttpMethod, Location, Service, SnippetRef};
use svcgraph_graph::DependencyGraph;
use svcgraph_parser::{find_addresses, first_label};
use tracing::debug;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{2,5}\b").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    /// A whole manifest block declaring a service.
    Block,
    /// A startup command.
    Invocation,
    /// The line an edge was observed on.
    Evidence,
    /// The line a port is declared on.
    Port,
}

/// A piece of one service's source text.
#[derive(Debug, Clone)]
pub struct Document {
    pub owner: String,
    pub kind: DocKind,
    pub snippet: SnippetRef,
    pub text: String,
}

impl Document {
    pub fn range(&self) -> Range<usize> {
        self.snippet.span.start()..self.snippet.span.end()
    }

    pub fn contains(&self, file: &str, range: &Range<usize>) -> bool {
        self.snippet.file_path == file
            && self.snippet.span.start() <= range.start
            && range.end <= self.snippet.span.end()
    }

    pub fn overlaps(&self, region: &MaskedRegion) -> bool {
        self.snippet.file_path == region.file_path
            && self.snippet.span.start() < region.range.end
            && region.range.start < self.snippet.span.end()
    }
}

/// The snippet shown (masked) in the prompt. Nothing inside it counts as context.
#[derive(Debug, Clone)]
pub struct MaskedRegion {
    pub file_path: String,
    pub range: Range<usize>,
    pub lines: Range<u32>,
}

impl MaskedRegion {
    pub fn new(snippet: &SnippetRef, snippet_text: &str) -> Self {
        let count = snippet_text.lines().count().max(1) as u32;
        Self {
            file_path: snippet.file_path.clone(),
            range: snippet.span.start()..snippet.span.end(),
            lines: snippet.line..snippet.line + count,
        }
    }

    fn covers(&self, location: &Location) -> bool {
        location.file_path == self.file_path && self.lines.contains(&location.line)
    }

    fn covers_range(&self, file: &str, range: &Range<usize>) -> bool {
        file == self.file_path && range.start < self.range.end && self.range.start < range.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Port,
    Path,
    Host,
}

/// What a masked span stands for: some property of `provider` as used by `consumer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub kind: SlotKind,
    pub consumer: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
}

#[derive(Debug, Clone)]
enum FactOrigin {
    /// Known from the graph itself (service identity, contract endpoints).
    Graph,
    Declared(Location),
    Text { file_path: String, range: Range<usize> },
}

#[derive(Debug, Clone)]
struct Fact {
    owner: String,
    about: String,
    kind: SlotKind,
    value: String,
    method_ok: Option<BTreeSet<HttpMethod>>,
    origin: FactOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// Every service, minus the masked snippet.
    Full,
    /// Only what the named service's own sources say, minus the masked snippet.
    SingleService(&'a str),
}

/// Resolves a host as written in a snippet to a service of the graph.
pub fn resolve_host<'g>(graph: &'g DependencyGraph, host: &str) -> Option<&'g str> {
    let host = host.to_ascii_lowercase();
    service_named(graph, &host)
        .or_else(|| service_named(graph, first_label(&host)))
        .map(|s| s.name.as_str())
}

fn service_named<'g>(graph: &'g DependencyGraph, name: &str) -> Option<&'g Service> {
    graph.services().find(|s| {
        s.name.eq_ignore_ascii_case(name)
            || s.connection.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    })
}

/// All documents of a graph, read once per build.
pub struct Corpus {
    pub documents: Vec<Document>,
}

impl Corpus {
    pub fn collect(graph: &DependencyGraph, snippets: &dyn SnippetSource) -> Self {
        let mut documents = Vec::new();
        let mut push = |owner: &str, kind: DocKind, snippet: SnippetRef| {
            match snippets.text(&snippet) {
                Ok(text) => documents.push(Document {
                    owner: owner.to_string(),
                    kind,
                    snippet,
                    text,
                }),
                Err(e) => debug!("Snippet {}:{} unavailable: {}", snippet.file_path, snippet.line, e),
            }
        };
        let line = |loc: &Location| -> Option<SnippetRef> {
            let file = snippets.file(&loc.file_path).ok()?;
            line_snippet(&file, &loc.file_path, loc.line)
        };

        for service in graph.services() {
            for block in &service.blocks {
                push(&service.name, DocKind::Block, block.clone());
            }
            for inv in &service.invocations {
                push(&service.name, DocKind::Invocation, inv.clone());
            }
            for port in &service.connection.ports {
                if let Some(s) = line(&port.location) {
                    push(&service.name, DocKind::Port, s);
                }
            }
        }
        for edge in graph.edges() {
            for loc in &edge.locations {
                if let Some(s) = line(loc) {
                    push(&edge.from, DocKind::Evidence, s);
                }
            }
        }

        documents.sort_by(|a, b| {
            (&a.snippet.file_path, a.snippet.span.start(), a.kind).cmp(&(
                &b.snippet.file_path,
                b.snippet.span.start(),
                b.kind,
            ))
        });
        documents.dedup_by(|a, b| a.snippet == b.snippet && a.owner == b.owner);
        Self { documents }
    }

    pub fn of<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a Document> {
        self.documents.iter().filter(move |d| d.owner == owner)
    }

    /// The largest block holding `range`, else the smallest other document holding it.
    pub fn enclosing(&self, file: &str, range: &Range<usize>) -> Option<&Document> {
        let holding = || self.documents.iter().filter(move |d| d.contains(file, range));
        holding()
            .filter(|d| d.kind == DocKind::Block)
            .max_by_key(|d| d.snippet.span.len())
            .or_else(|| holding().min_by_key(|d| d.snippet.span.len()))
    }

    /// Context shown next to a masked snippet: every document that neither
    /// overlaps it nor sits inside another shown document.
    pub fn context_for(&self, region: &MaskedRegion, graph: &DependencyGraph) -> Vec<ContextDocument> {
        let visible: Vec<&Document> = self.documents.iter().filter(|d| !d.overlaps(region)).collect();
        let mut out: Vec<ContextDocument> = visible
            .iter()
            .filter(|d| {
                !visible.iter().any(|o| {
                    !std::ptr::eq(*o, **d)
                        && o.contains(&d.snippet.file_path, &d.range())
                        && o.snippet.span.len() > d.snippet.span.len()
                })
            })
            .map(|d| ContextDocument {
                service: d.owner.clone(),
                file_path: Some(d.snippet.file_path.clone()),
                text: d.text.clone(),
            })
            .collect();

        for service in graph.services().filter(|s| !s.endpoints.is_empty()) {
            let lines: Vec<String> = service
                .endpoints
                .values()
                .map(|e| {
                    let methods: Vec<&str> = e.methods().iter().map(|m| m.as_str()).collect();
                    format!("{} {}", methods.join(" "), e.path)
                })
                .collect();
            out.push(ContextDocument {
                service: service.name.clone(),
                file_path: None,
                text: format!("API of {}:\n{}", service.name, lines.join("\n")),
            });
        }
        out
    }
}

/// Whole-word occurrences of `token` in `text`.
pub fn word_matches<'t>(text: &'t str, token: &'t str) -> impl Iterator<Item = Range<usize>> + 't {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(token)
        .filter(move |(at, _)| {
            let before = text[..*at].chars().next_back();
            let after = text[at + token.len()..].chars().next();
            !token.is_empty() && !before.map(is_word).unwrap_or(false) && !after.map(is_word).unwrap_or(false)
        })
        .map(move |(at, _)| at..at + token.len())
}

/// Free-standing numbers in a command line that could be ports, outside any
/// address (whose ports are read as addresses).
pub fn port_tokens(text: &str) -> Vec<(u16, Range<usize>)> {
    let addresses = find_addresses(text);
    NUMBER
        .find_iter(text)
        .filter(|m| !addresses.iter().any(|a| a.range.start <= m.start() && m.end() <= a.range.end))
        .filter_map(|m| Some((m.as_str().parse::<u16>().ok()?, m.range())))
        .filter(|(port, _)| *port > 0)
        .collect()
}

/// Answers "which values of this slot does the available context support?".
pub struct ContextOracle {
    facts: Vec<Fact>,
}

impl ContextOracle {
    pub fn new(graph: &DependencyGraph, corpus: &Corpus) -> Self {
        let mut facts = Vec::new();

        for service in graph.services() {
            let own = |kind: SlotKind, value: String, origin: FactOrigin| Fact {
                owner: service.name.clone(),
                about: service.name.clone(),
                kind,
                value,
                method_ok: None,
                origin,
            };
            facts.push(own(SlotKind::Host, service.name.clone(), FactOrigin::Graph));
            for alias in &service.connection.aliases {
                facts.push(own(SlotKind::Host, alias.clone(), FactOrigin::Graph));
            }
            for port in &service.connection.ports {
                facts.push(own(
                    SlotKind::Port,
                    port.port.to_string(),
                    FactOrigin::Declared(port.location.clone()),
                ));
            }
            for endpoint in service.endpoints.values() {
                let mut fact = own(SlotKind::Path, endpoint.path.clone(), FactOrigin::Graph);
                fact.method_ok = Some(endpoint.methods());
                facts.push(fact);
            }
        }

        for doc in &corpus.documents {
            for addr in find_addresses(&doc.text) {
                let Some(provider) = resolve_host(graph, &addr.host) else {
                    continue;
                };
                if provider == doc.owner {
                    continue;
                }
                let base = doc.snippet.span.start();
                let mut text_fact = |kind: SlotKind, value: String, range: Range<usize>| {
                    facts.push(Fact {
                        owner: doc.owner.clone(),
                        about: provider.to_string(),
                        kind,
                        value,
                        method_ok: None,
                        origin: FactOrigin::Text {
                            file_path: doc.snippet.file_path.clone(),
                            range: base + range.start..base + range.end,
                        },
                    });
                };
                let host_text = doc.text[addr.host_range.clone()].to_string();
                text_fact(SlotKind::Host, host_text, addr.host_range.clone());
                if let (Some(port), Some(range)) = (addr.port, addr.port_range.clone()) {
                    text_fact(SlotKind::Port, port.to_string(), range);
                }
            }
        }

        // A service named in another service's sources, as a host or otherwise.
        for doc in &corpus.documents {
            for service in graph.services().filter(|s| s.name != doc.owner) {
                let names = std::iter::once(&service.name).chain(service.connection.aliases.iter());
                for name in names {
                    for range in word_matches(&doc.text, name) {
                        let base = doc.snippet.span.start();
                        facts.push(Fact {
                            owner: doc.owner.clone(),
                            about: service.name.clone(),
                            kind: SlotKind::Host,
                            value: name.clone(),
                            method_ok: None,
                            origin: FactOrigin::Text {
                                file_path: doc.snippet.file_path.clone(),
                                range: base + range.start..base + range.end,
                            },
                        });
                    }
                }
            }
        }

        for doc in corpus.documents.iter().filter(|d| d.kind == DocKind::Invocation) {
            let own_ports = graph
                .service(&doc.owner)
                .map(|s| s.connection.port_set())
                .unwrap_or_default();
            for provider in graph.dependencies(&doc.owner) {
                let Some(ports) = graph.service(&provider).map(|s| s.connection.port_set()) else {
                    continue;
                };
                for (port, range) in port_tokens(&doc.text) {
                    if !ports.contains(&port) || own_ports.contains(&port) {
                        continue;
                    }
                    let base = doc.snippet.span.start();
                    facts.push(Fact {
                        owner: doc.owner.clone(),
                        about: provider.clone(),
                        kind: SlotKind::Port,
                        value: port.to_string(),
                        method_ok: None,
                        origin: FactOrigin::Text {
                            file_path: doc.snippet.file_path.clone(),
                            range: base + range.start..base + range.end,
                        },
                    });
                }
            }
        }

        Self { facts }
    }

    /// Distinct values the scoped context supports for `slot`.
    pub fn answers(&self, slot: &Slot, scope: Scope<'_>, region: &MaskedRegion) -> BTreeSet<String> {
        self.facts
            .iter()
            .filter(|f| f.kind == slot.kind && f.about == slot.provider)
            .filter(|f| match scope {
                Scope::Full => true,
                Scope::SingleService(name) => f.owner == name,
            })
            .filter(|f| match (&f.method_ok, slot.method) {
                (Some(methods), Some(m)) => methods.contains(&m),
                _ => true,
            })
            .filter(|f| match &f.origin {
                FactOrigin::Graph => true,
                FactOrigin::Declared(loc) => !region.covers(loc),
                FactOrigin::Text { file_path, range } => !region.covers_range(file_path, range),
            })
            .map(|f| f.value.clone())
            .collect()
    }
}
