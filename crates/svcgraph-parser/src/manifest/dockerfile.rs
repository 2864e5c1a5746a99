use super::yaml_blocks::line_of;
use super::{command_candidates, env_candidate, is_own_port_key, rel_string};
use crate::file_collect::owning_component;
use std::collections::BTreeSet;
use std::path::Path;
use svcgraph_core::{
    ConfidenceConfig, EdgeSource, FileScan, Location, PortDeclaration, ServiceObservation,
    SnippetRef, Span, WarningKind,
};
use tracing::debug;

/// One instruction, with `\` continuations folded in.
struct Instruction<'a> {
    keyword: String,
    args: String,
    span: Span,
    line: u32,
    text: &'a str,
}

fn instructions(content: &str) -> Vec<Instruction<'_>> {
    let mut out = Vec::new();
    let mut offset = 0;
    let mut current: Option<(usize, String)> = None;

    for raw in content.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim();
        if current.is_none() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }

        let (start, mut acc) = current.take().unwrap_or((line_start, String::new()));
        let continued = trimmed.ends_with('\\');
        acc.push_str(trimmed.trim_end_matches('\\').trim());
        acc.push(' ');
        if continued {
            current = Some((start, acc));
            continue;
        }

        let end = line_start + line.len();
        let joined = acc.trim();
        let (keyword, args) = joined.split_once(char::is_whitespace).unwrap_or((joined, ""));
        out.push(Instruction {
            keyword: keyword.to_ascii_uppercase(),
            args: args.trim().to_string(),
            span: Span::new(start, end),
            line: line_of(content, start),
            text: &content[start..end],
        });
    }
    out
}

/// `["python", "app.py"]` (exec form) or a shell string, as one command line.
fn command_line(args: &str) -> String {
    match serde_json::from_str::<Vec<String>>(args) {
        Ok(words) => words.join(" "),
        Err(_) => args.to_string(),
    }
}

/// `ENV A=1 B=2` or the legacy `ENV A 1`.
fn env_pairs(args: &str) -> Vec<(String, String)> {
    if !args.contains('=') {
        return args
            .split_once(char::is_whitespace)
            .map(|(k, v)| vec![(k.to_string(), v.trim().to_string())])
            .unwrap_or_default();
    }
    args.split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.trim_matches('"').to_string()))
        .collect()
}

/// Reads a Dockerfile. The owning service is the directory it lives in.
pub fn scan_dockerfile(rel_path: &Path, content: &str, confidence: &ConfidenceConfig) -> FileScan {
    let rel = rel_string(rel_path);
    let mut scan = FileScan::default();

    let Some(owner) = owning_component(rel_path) else {
        debug!("{} is at the repository root; no owning service", rel);
        scan.warn(&rel, WarningKind::Unresolved, "Dockerfile outside a service directory");
        return scan;
    };

    let mut obs = ServiceObservation::inferred(owner.clone(), EdgeSource::Config);
    if let Some(dir) = rel_path.parent().map(|p| p.to_string_lossy().replace('\\', "/")) {
        obs.build_dirs.insert(dir);
    }
    let known = BTreeSet::new();

    for inst in instructions(content) {
        let location = Location::line(&rel, inst.line);
        match inst.keyword.as_str() {
            "EXPOSE" => {
                for word in inst.args.split_whitespace() {
                    let port = word.split('/').next().unwrap_or(word);
                    if let Ok(port) = port.parse::<u16>() {
                        obs.ports.push(PortDeclaration {
                            port,
                            location: location.clone(),
                        });
                    }
                }
            }
            "ENV" => {
                for (k, v) in env_pairs(&inst.args) {
                    if is_own_port_key(&k) {
                        if let Ok(port) = v.parse::<u16>() {
                            obs.ports.push(PortDeclaration {
                                port,
                                location: location.clone(),
                            });
                        }
                    }
                    if let Some(c) =
                        env_candidate(&owner, &k, &v, location.clone(), &known, confidence)
                    {
                        scan.candidates.push(c);
                    }
                    obs.env.insert(k, v);
                }
            }
            "CMD" | "ENTRYPOINT" => {
                debug!("{}: {} at line {}: {}", rel, inst.keyword, inst.line, inst.text);
                obs.invocations.push(SnippetRef {
                    file_path: rel.clone(),
                    span: inst.span,
                    line: inst.line,
                });
                let command = command_line(&inst.args);
                scan.candidates
                    .extend(command_candidates(&owner, &command, &location, confidence));
            }
            _ => {}
        }
    }

    scan.observations.push(obs);
    scan
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKERFILE: &str = "FROM python:3.12-slim\n\
WORKDIR /app\n\
ENV PORT=9090 \\\n    ORDERS_URL=http://orders:8000\n\
EXPOSE 9090/tcp\n\
# start\n\
CMD [\"python\", \"app.py\", \\\n     \"--port\", \"9090\"]\n";

    #[test]
    fn reads_ports_env_and_invocation() {
        let scan = scan_dockerfile(Path::new("users/Dockerfile"), DOCKERFILE, &ConfidenceConfig::default());
        let obs = &scan.observations[0];
        assert_eq!(obs.name, "users");
        assert!(obs.build_dirs.contains("users"));
        let ports: Vec<u16> = obs.ports.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![9090, 9090]);
        assert_eq!(obs.env["ORDERS_URL"], "http://orders:8000");

        let inv = &obs.invocations[0];
        assert_eq!(inv.line, 7);
        let text = &DOCKERFILE[inv.span.start()..inv.span.end()];
        assert!(text.starts_with("CMD"));
        assert!(text.ends_with("\"9090\"]"));

        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].to.to_string(), "orders:8000");
        assert_eq!(scan.candidates[0].location.as_ref().unwrap().line, 3);
    }

    #[test]
    fn root_dockerfile_has_no_owner() {
        let scan = scan_dockerfile(Path::new("Dockerfile"), DOCKERFILE, &ConfidenceConfig::default());
        assert!(scan.observations.is_empty());
        assert_eq!(scan.warnings[0].kind, WarningKind::Unresolved);
    }

    #[test]
    fn exec_and_shell_forms() {
        assert_eq!(command_line(r#"["node", "server.js"]"#), "node server.js");
        assert_eq!(command_line("node server.js --port 80"), "node server.js --port 80");
        assert_eq!(env_pairs("A 1"), vec![("A".to_string(), "1".to_string())]);
    }
}
