use crate::address::{find_addresses, AddressMatch};
use crate::file_collect::owning_component;
use crate::language::{Language, LanguageRegistry};
use globset::{Glob, GlobMatcher};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use svcgraph_core::{
    CandidateEdge, ClientPattern, Confidence, ConfidenceConfig, EdgeSource, FileScan, HttpMethod,
    Location, Result, ServiceObservation, SourceScanner, SvcGraphConfig, SvcGraphError, TargetRef,
    WarningKind,
};
use tree_sitter::{Node, TreeCursor};
use tracing::{debug, trace, warn};

/// Environment lookups across the supported languages; the first non-empty
/// group is the variable name.
static ENV_LOOKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"os\.environ\[\s*["']([A-Za-z_]\w*)["']\s*\]"#,
        r#"|os\.(?:getenv|environ\.get)\(\s*["']([A-Za-z_]\w*)["']"#,
        r#"|process\.env\.([A-Za-z_]\w*)"#,
        r#"|process\.env\[\s*["'`]([A-Za-z_]\w*)["'`]\s*\]"#,
        r#"|System\.getenv\(\s*"([A-Za-z_]\w*)""#,
        r#"|os\.(?:Getenv|LookupEnv)\(\s*"([A-Za-z_]\w*)""#,
        r#"|env::var(?:_os)?\(\s*"([A-Za-z_]\w*)""#,
    ))
    .expect("valid regex")
});

/// A path literal following a base: `base + "/users"`, `f"{base}/users"`, `${base}/users`.
static PATH_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:["'`]|\})\s*(/[^"'`\s]*)"#).expect("valid regex"));

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*").expect("valid regex")
});

/// Node kinds that bind a name to a value, with their (name, value) fields.
const BINDINGS: &[(&str, &str, &str)] = &[
    ("assignment", "left", "right"),
    ("variable_declarator", "name", "value"),
    ("let_declaration", "pattern", "value"),
    ("const_item", "name", "value"),
    ("static_item", "name", "value"),
    ("const_spec", "name", "value"),
    ("var_spec", "name", "value"),
    ("short_var_declaration", "left", "right"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evidence {
    Literal,
    Env,
}

#[derive(Debug, Clone)]
struct Resolved {
    target: TargetRef,
    evidence: Evidence,
}

/// Finds calls to configured HTTP/RPC clients and turns their target
/// arguments into candidate edges.
pub struct CodeScanner {
    registry: LanguageRegistry,
    languages: Vec<Language>,
    clients: Vec<(GlobMatcher, ClientPattern)>,
    confidence: ConfidenceConfig,
}

impl CodeScanner {
    pub fn new(
        languages: &[String],
        clients: &[ClientPattern],
        confidence: ConfidenceConfig,
    ) -> Result<Self> {
        let registry = LanguageRegistry::new();
        let languages = registry.select(languages);
        let clients = clients
            .iter()
            .map(|c| {
                Glob::new(&c.pattern)
                    .map(|g| (g.compile_matcher(), c.clone()))
                    .map_err(|e| {
                        SvcGraphError::Config(format!("invalid client pattern {}: {}", c.pattern, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            registry,
            languages,
            clients,
            confidence,
        })
    }

    pub fn from_config(config: &SvcGraphConfig) -> Result<Self> {
        Self::new(
            &config.scan.languages,
            &config.clients,
            config.confidence.clone(),
        )
    }

    fn client_for(&self, callee: &str) -> Option<&ClientPattern> {
        self.clients
            .iter()
            .find(|(matcher, _)| matcher.is_match(callee))
            .map(|(_, pattern)| pattern)
    }

    fn confidence_for(&self, evidence: Evidence) -> Confidence {
        match evidence {
            Evidence::Literal => Confidence::new(self.confidence.code_literal),
            Evidence::Env => Confidence::new(self.confidence.code_env),
        }
    }
}

impl SourceScanner for CodeScanner {
    fn name(&self) -> &'static str {
        "code"
    }

    fn source(&self) -> EdgeSource {
        EdgeSource::Code
    }

    fn accepts(&self, rel_path: &Path) -> bool {
        self.registry
            .detect_language(rel_path)
            .map(|lang| self.languages.contains(&lang))
            .unwrap_or(false)
    }

    fn scan_file(&self, rel_path: &Path, content: &str) -> Result<FileScan> {
        let rel = rel_path.to_string_lossy().replace('\\', "/");
        let mut scan = FileScan::default();

        let Some(language) = self.registry.detect_language(rel_path) else {
            return Ok(scan);
        };
        let Some(mut parser) = self.registry.create_parser(&language) else {
            scan.warn(&rel, WarningKind::Unparseable, "no parser for language");
            return Ok(scan);
        };

        let Some(tree) = parser.parse(content, None) else {
            warn!("Failed to parse {}", rel);
            scan.warn(&rel, WarningKind::Unparseable, "parser produced no tree");
            return Ok(scan);
        };
        let root = tree.root_node();
        if root.has_error() {
            warn!("Skipping {}: syntax errors", rel);
            scan.warn(&rel, WarningKind::Unparseable, "source contains syntax errors");
            return Ok(scan);
        }

        let owner = owning_component(rel_path).unwrap_or_else(|| {
            rel_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| rel.clone())
        });

        let mut visitor = CallVisitor {
            scanner: self,
            language,
            source: content,
            file_path: &rel,
            owner: &owner,
            bindings: HashMap::new(),
            candidates: Vec::new(),
            unresolved: 0,
        };
        visitor.collect_bindings(&mut root.walk());
        visitor.visit(&mut root.walk());

        let CallVisitor {
            candidates,
            unresolved,
            ..
        } = visitor;
        if unresolved > 0 {
            debug!("{}: {} client calls without a resolvable target", rel, unresolved);
            scan.warn(
                &rel,
                WarningKind::Unresolved,
                format!("{} client calls without a resolvable target", unresolved),
            );
        }

        let mut obs = ServiceObservation::inferred(owner, EdgeSource::Code);
        if let Some(dir) = rel_path.parent().map(|p| p.to_string_lossy().replace('\\', "/")) {
            if !dir.is_empty() {
                obs.build_dirs.insert(dir);
            }
        }
        scan.observations.push(obs);
        scan.candidates = candidates;
        Ok(scan)
    }
}

struct CallVisitor<'a> {
    scanner: &'a CodeScanner,
    language: Language,
    source: &'a str,
    file_path: &'a str,
    owner: &'a str,
    bindings: HashMap<String, Resolved>,
    candidates: Vec<CandidateEdge>,
    unresolved: usize,
}

impl<'a> CallVisitor<'a> {
    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    fn collect_bindings(&mut self, cursor: &mut TreeCursor) {
        let node = cursor.node();
        if let Some((_, name_field, value_field)) =
            BINDINGS.iter().find(|(kind, _, _)| *kind == node.kind())
        {
            if let (Some(name), Some(value)) = (
                node.child_by_field_name(name_field),
                node.child_by_field_name(value_field),
            ) {
                let name = self.text(name).trim();
                if IDENTIFIER.find(name).map(|m| m.as_str() == name).unwrap_or(false) {
                    if let Some(resolved) = self.resolve_direct(self.text(value)) {
                        trace!("{}: {} bound to {}", self.file_path, name, resolved.target);
                        self.bindings.insert(name.to_string(), resolved);
                    }
                }
            }
        }

        if cursor.goto_first_child() {
            loop {
                self.collect_bindings(cursor);
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
            cursor.goto_parent();
        }
    }

    fn visit(&mut self, cursor: &mut TreeCursor) {
        let node = cursor.node();
        if self.language.call_kinds().contains(&node.kind()) {
            self.visit_call(node);
        }

        if cursor.goto_first_child() {
            loop {
                self.visit(cursor);
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
            cursor.goto_parent();
        }
    }

    fn callee(&self, call: Node) -> Option<String> {
        let raw = match self.language {
            Language::Java => {
                let name = self.text(call.child_by_field_name("name")?);
                match call.child_by_field_name("object") {
                    Some(object) => format!("{}.{}", self.text(object), name),
                    None => name.to_string(),
                }
            }
            _ => self.text(call.child_by_field_name("function")?).to_string(),
        };
        Some(normalize_callee(&raw))
    }

    fn arguments<'t>(&self, call: Node<'t>) -> Vec<Node<'t>> {
        let Some(args) = call.child_by_field_name("arguments") else {
            return Vec::new();
        };
        let mut cursor = args.walk();
        let nodes: Vec<Node<'t>> = args
            .named_children(&mut cursor)
            .filter(|n| n.kind() != "comment")
            .collect();
        nodes
    }

    fn visit_call(&mut self, call: Node<'_>) {
        let Some(callee) = self.callee(call) else {
            return;
        };
        let Some(pattern) = self.scanner.client_for(&callee) else {
            return;
        };

        let args = self.arguments(call);
        let mut method = pattern.method;
        let mut target_arg = args.first().copied();

        // `requests.request("POST", url)`, `http.NewRequest("GET", url, nil)`
        if let Some(first) = args.first() {
            let literal = self.text(*first).trim_matches(['"', '\'', '`']);
            if let Ok(m) = literal.parse::<HttpMethod>() {
                method = method.or(Some(m));
                target_arg = args.get(1).copied();
            }
        }

        // Python `requests.get(url=...)`
        if let Some(keyword) = args.iter().find(|a| {
            a.kind() == "keyword_argument"
                && a.child_by_field_name("name").map(|n| self.text(n)) == Some("url")
        }) {
            target_arg = keyword.child_by_field_name("value");
        } else if target_arg.map(|a| a.kind() == "keyword_argument").unwrap_or(false) {
            target_arg = None;
        }

        if method.is_none() {
            method = method_from_callee(&callee);
        }

        let location = Location {
            file_path: self.file_path.to_string(),
            line: call.start_position().row as u32 + 1,
            column: call.start_position().column as u32,
            end_line: Some(call.end_position().row as u32 + 1),
            end_column: Some(call.end_position().column as u32),
        };

        let resolved = target_arg.and_then(|arg| self.resolve(self.text(arg)));
        let Some(resolved) = resolved else {
            trace!("{}: unresolved client call {}", location, callee);
            self.unresolved += 1;
            return;
        };

        let candidate = CandidateEdge::new(
            self.owner,
            resolved.target,
            pattern.kind.clone(),
            EdgeSource::Code,
        )
        .at(location)
        .with_method(method)
        .with_confidence(self.scanner.confidence_for(resolved.evidence));
        self.candidates.push(candidate);
    }

    /// Environment lookup or literal address, without consulting bindings.
    fn resolve_direct(&self, text: &str) -> Option<Resolved> {
        if let Some(caps) = ENV_LOOKUP.captures(text) {
            let name = caps.iter().skip(1).flatten().next()?;
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            return Some(Resolved {
                target: TargetRef::EnvVar {
                    name: name.as_str().to_string(),
                    path: path_suffix(&text[end..]),
                },
                evidence: Evidence::Env,
            });
        }
        let addr = find_addresses(text).into_iter().find(AddressMatch::names_peer)?;
        Some(Resolved {
            target: addr.target(),
            evidence: Evidence::Literal,
        })
    }

    fn resolve(&self, text: &str) -> Option<Resolved> {
        if let Some(direct) = self.resolve_direct(text) {
            return Some(direct);
        }
        for m in IDENTIFIER.find_iter(text) {
            let Some(bound) = self.bindings.get(m.as_str()) else {
                continue;
            };
            let suffix = path_suffix(&text[m.end()..]);
            let target = match (&bound.target, suffix) {
                (TargetRef::Address { host, port, path }, Some(suffix)) => TargetRef::Address {
                    host: host.clone(),
                    port: *port,
                    path: Some(join_paths(path.as_deref(), &suffix)),
                },
                (TargetRef::EnvVar { name, path }, Some(suffix)) => TargetRef::EnvVar {
                    name: name.clone(),
                    path: Some(join_paths(path.as_deref(), &suffix)),
                },
                (target, _) => target.clone(),
            };
            return Some(Resolved {
                target,
                evidence: bound.evidence,
            });
        }
        None
    }
}

/// `requests . get` → `requests.get`; `reqwest::Client::new().get` → `reqwest.Client.new.get`.
fn normalize_callee(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '(' | '[' | '<' => depth += 1,
            ')' | ']' | '>' => depth = depth.saturating_sub(1),
            c if depth == 0 && !c.is_whitespace() => out.push(c),
            _ => {}
        }
    }
    out.replace("::", ".").replace("?.", ".").replace("..", ".")
}

fn method_from_callee(callee: &str) -> Option<HttpMethod> {
    let last = callee.rsplit('.').next()?.to_ascii_lowercase();
    if last == "fetch" {
        return Some(HttpMethod::Get);
    }
    HttpMethod::ALL
        .iter()
        .copied()
        .find(|m| last.starts_with(&m.as_str().to_ascii_lowercase()))
}

fn path_suffix(rest: &str) -> Option<String> {
    PATH_SUFFIX
        .captures(rest)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|p| p != "/")
}

fn join_paths(base: Option<&str>, suffix: &str) -> String {
    match base {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), suffix.trim_start_matches('/')),
        None => suffix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcgraph_core::{default_client_patterns, EdgeKind};

    fn scanner() -> CodeScanner {
        CodeScanner::new(&[], &default_client_patterns(), ConfidenceConfig::default()).unwrap()
    }

    fn targets(scan: &FileScan) -> Vec<String> {
        scan.candidates.iter().map(|c| c.to.to_string()).collect()
    }

    #[test]
    fn python_literal_and_env_calls() {
        let src = r#"
import os
import requests

USERS = os.environ["USERS_URL"]

def profile(uid):
    requests.get("http://users:9090/users/" + uid)
    requests.post(USERS + "/users")
    return requests.get(url=os.getenv("BILLING_URL"))
"#;
        let scan = scanner().scan_file(Path::new("gateway/app.py"), src).unwrap();
        assert_eq!(
            targets(&scan),
            vec!["users:9090/users/", "$USERS_URL", "$BILLING_URL"]
        );
        let first = &scan.candidates[0];
        assert_eq!(first.from, "gateway");
        assert_eq!(first.kind, EdgeKind::DirectCall);
        assert_eq!(first.method, Some(HttpMethod::Get));
        assert_eq!(first.location.as_ref().unwrap().line, 8);
        assert_eq!(first.confidence, Confidence::new(0.7));

        let second = &scan.candidates[1];
        assert_eq!(second.method, Some(HttpMethod::Post));
        assert_eq!(
            second.to,
            TargetRef::EnvVar {
                name: "USERS_URL".into(),
                path: Some("/users".into())
            }
        );
        assert_eq!(second.confidence, Confidence::new(0.6));
        assert_eq!(scan.observations[0].name, "gateway");
    }

    #[test]
    fn javascript_and_go_clients() {
        let js = "const base = process.env.ORDERS_URL;\naxios.get(`${base}/orders`);\nfetch('http://inventory:7000/items');\n";
        let scan = scanner().scan_file(Path::new("web/src/api.js"), js).unwrap();
        assert_eq!(targets(&scan), vec!["$ORDERS_URL", "inventory:7000/items"]);
        assert_eq!(scan.candidates[1].method, Some(HttpMethod::Get));

        let go = "package main\n\nimport (\n\t\"net/http\"\n\t\"os\"\n)\n\nfunc main() {\n\treq, _ := http.NewRequest(\"DELETE\", os.Getenv(\"CART_URL\")+\"/cart\", nil)\n\t_ = req\n}\n";
        let scan = scanner().scan_file(Path::new("checkout/main.go"), go).unwrap();
        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].method, Some(HttpMethod::Delete));
        assert_eq!(
            scan.candidates[0].to,
            TargetRef::EnvVar {
                name: "CART_URL".into(),
                path: Some("/cart".into())
            }
        );
    }

    #[test]
    fn unparseable_files_are_skipped_with_warning() {
        let scan = scanner()
            .scan_file(Path::new("svc/broken.py"), "def oops(:\n    requests.get('http://a:1')\n")
            .unwrap();
        assert!(scan.candidates.is_empty());
        assert_eq!(scan.warnings.len(), 1);
        assert_eq!(scan.warnings[0].kind, WarningKind::Unparseable);
    }

    #[test]
    fn unresolved_calls_are_counted_not_emitted() {
        let scan = scanner()
            .scan_file(Path::new("svc/a.py"), "import requests\nrequests.get(compute_url())\n")
            .unwrap();
        assert!(scan.candidates.is_empty());
        assert_eq!(scan.warnings[0].kind, WarningKind::Unresolved);
    }

    #[test]
    fn custom_patterns_set_kind_and_language_filter() {
        let clients = vec![ClientPattern::new("producer.send").with_kind(EdgeKind::Messaging)];
        let scanner =
            CodeScanner::new(&["python".to_string()], &clients, ConfidenceConfig::default())
                .unwrap();
        assert!(!scanner.accepts(Path::new("svc/main.go")));
        let scan = scanner
            .scan_file(
                Path::new("svc/pub.py"),
                "producer.send('kafka://events:9092/orders')\nrequests.get('http://x:1')\n",
            )
            .unwrap();
        assert_eq!(targets(&scan), vec!["events:9092/orders"]);
        assert_eq!(scan.candidates[0].kind, EdgeKind::Messaging);

        let scan = scanner
            .scan_file(Path::new("svc/db.py"), "producer.send('postgres://db:5432/app')\n")
            .unwrap();
        assert!(scan.candidates.is_empty(), "datastore URLs are not service calls");
    }

    #[test]
    fn callee_normalization() {
        assert_eq!(normalize_callee("reqwest::Client::new().get"), "reqwest.Client.new.get");
        assert_eq!(normalize_callee("this.http\n  .get"), "this.http.get");
        assert_eq!(method_from_callee("restTemplate.getForObject"), Some(HttpMethod::Get));
        assert_eq!(method_from_callee("axios.request"), None);
    }
}
