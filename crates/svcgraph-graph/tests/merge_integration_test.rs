use std::fs;
use std::path::Path;
use svcgraph_core::{EdgeKind, EdgeTarget, SvcGraphConfig};
use svcgraph_graph::{DependencyGraph, GraphMerger};
use svcgraph_parser::ScanRunner;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

async fn build(root: &Path) -> DependencyGraph {
    let config = SvcGraphConfig::default();
    let output = ScanRunner::from_config(root, &config).unwrap().run().await.unwrap();
    let (graph, _) = GraphMerger::from_config(&config).merge(output.scan);
    graph
}

#[tokio::test]
async fn compose_users_and_gateway() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "docker-compose.yml",
        r#"services:
  users:
    build: ./users
    ports:
      - "9090:9090"
  gateway:
    build: ./gateway
    command: ["node", "server.js", "--users-port", "9090"]
    depends_on:
      - users
    environment:
      USERS_URL: http://users:9090
"#,
    );
    write(
        dir.path(),
        "users/openapi.yaml",
        r#"openapi: 3.0.0
info:
  title: users
  version: 1.0.0
paths:
  /users/{id}:
    get:
      responses:
        "200":
          description: ok
"#,
    );
    write(
        dir.path(),
        "gateway/server.js",
        "const axios = require('axios');\nasync function load(id) {\n  return axios.get(`${process.env.USERS_URL}/users/${id}`);\n}\n",
    );

    let graph = build(dir.path()).await;
    graph.validate().unwrap();

    assert_eq!(graph.service_names(), vec!["gateway", "users"]);
    assert!(graph.has_edge_of_kind("gateway", "users", &EdgeKind::DeclaredLink));
    assert!(graph.has_edge_of_kind("gateway", "users", &EdgeKind::NetworkBinding));
    assert!(graph
        .edges()
        .iter()
        .any(|e| e.to == EdgeTarget::endpoint("users", "/users/{id}")));
    assert_eq!(
        graph.dependents("users").into_iter().collect::<Vec<_>>(),
        vec!["gateway"]
    );
    assert!(graph.dependencies("users").is_empty());
    assert!(graph.service("users").unwrap().has_contract());
}

#[tokio::test]
async fn unrelated_services_share_no_edge() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "docker-compose.yml",
        "services:\n  alpha:\n    image: alpha:1\n    ports:\n      - \"8080:8080\"\n  beta:\n    image: beta:1\n    environment:\n      LOG_LEVEL: info\n",
    );
    let graph = build(dir.path()).await;
    assert_eq!(graph.service_count(), 2);
    assert_eq!(graph.edge_count(), 0);
    assert!(!graph.reachable("alpha", "beta"));
    assert!(!graph.reachable("beta", "alpha"));
}
