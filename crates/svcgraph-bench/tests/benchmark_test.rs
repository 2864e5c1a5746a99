use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use svcgraph_bench::{
    build_dataset, read_tasks, run_pipeline, ContextOracle, Corpus, FsSnippets, MaskedRegion,
    RejectReason, Scope, Slot, SlotKind, SnippetSource, TaskType, TASKS_JSONL,
};
use svcgraph_core::{EdgeKind, SvcGraphConfig};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const USERS: &str = r#"services:
  users:
    build: ./users
    ports:
      - "9090:9090"
"#;

fn compose(gateway: &str) -> String {
    format!("{}  gateway:\n{}", USERS, gateway)
}

#[tokio::test]
async fn port_only_known_to_the_provider_becomes_a_completion() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "docker-compose.yml",
        &compose(
            r#"    build: ./gateway
    command: ["node", "server.js", "--users-port", "9090"]
    depends_on:
      - users
"#,
        ),
    );

    let config = SvcGraphConfig::default();
    let output = build_dataset(dir.path(), &config).await.unwrap();
    assert!(output.graph.has_edge_of_kind("gateway", "users", &EdgeKind::DeclaredLink));

    let completions: Vec<_> = output
        .tasks
        .iter()
        .filter(|t| t.task_type() == TaskType::Completion)
        .collect();
    assert_eq!(completions.len(), 1);
    let task = completions[0];
    assert_eq!(task.expected(), "9090");
    assert!(task.prompt().contains("<MASK>"));
    assert!(!task.prompt().contains("9090"));
    assert!(!task.justification().is_empty());

    let mask = task.mask().unwrap();
    assert_eq!(mask.strategy, "invocation-port");
    assert_eq!(mask.file_path, "docker-compose.yml");

    // Putting the answer back reproduces the file bytes.
    let file = fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
    let snippet = &file[mask.snippet_span.start()..mask.snippet_span.end()];
    let masked = task.prompt().split_once("\n\n").unwrap().1;
    assert_eq!(mask.restore(masked).as_deref(), Some(snippet));

    // The gateway block is not part of the context handed along.
    assert!(task.context().iter().all(|d| !d.text.contains("--users-port")));
    assert!(task.context().iter().any(|d| d.service == "users"));

    // Whole graph: determined. Gateway alone: not.
    let snippets = FsSnippets::new(dir.path());
    let corpus = Corpus::collect(&output.graph, &snippets);
    let oracle = ContextOracle::new(&output.graph, &corpus);
    let block = &output.graph.service("gateway").unwrap().blocks[0];
    let region = MaskedRegion::new(block, &snippets.text(block).unwrap());
    let slot = Slot {
        kind: SlotKind::Port,
        consumer: "gateway".into(),
        provider: "users".into(),
        method: None,
    };
    assert_eq!(
        oracle.answers(&slot, Scope::Full, &region),
        BTreeSet::from(["9090".to_string()])
    );
    assert!(oracle
        .answers(&slot, Scope::SingleService("gateway"), &region)
        .is_empty());
}

#[tokio::test]
async fn values_visible_in_the_snippet_are_rejected() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "docker-compose.yml",
        &compose(
            r#"    build: ./gateway
    command: ["node", "server.js", "--users-port", "9090"]
    depends_on:
      - users
    environment:
      USERS_URL: http://users:9090
"#,
        ),
    );

    let output = build_dataset(dir.path(), &SvcGraphConfig::default())
        .await
        .unwrap();
    assert_eq!(
        output
            .tasks
            .iter()
            .filter(|t| t.task_type() == TaskType::Completion)
            .count(),
        0
    );
    assert!(output.report.build.rejected("locally_inferable") >= 1);
    assert!(output
        .report
        .build
        .rejections
        .iter()
        .all(|r| matches!(r.reason, RejectReason::LocallyInferable { .. })));
}

#[tokio::test]
async fn values_the_consumer_already_states_are_rejected() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "docker-compose.yml",
        &compose(
            r#"    build: ./gateway
    depends_on:
      - users
"#,
        ),
    );
    write(
        dir.path(),
        "gateway/Dockerfile",
        "FROM node:20\nENV USERS_ADDR=users:9090\nCMD [\"node\", \"server.js\", \"--users-port\", \"9090\"]\n",
    );

    let output = build_dataset(dir.path(), &SvcGraphConfig::default())
        .await
        .unwrap();
    assert!(output.graph.has_edge_of_kind("gateway", "users", &EdgeKind::NetworkBinding));
    assert_eq!(
        output
            .tasks
            .iter()
            .filter(|t| t.task_type() == TaskType::Completion)
            .count(),
        0
    );
    let build = &output.report.build;
    assert!(build.rejected("cross_service_unnecessary") >= 2);
    assert!(build
        .rejections
        .iter()
        .all(|r| matches!(r.reason, RejectReason::CrossServiceUnnecessary { .. })));
}

#[tokio::test]
async fn pipeline_writes_a_readable_dataset() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("repo");
    let out = dir.path().join("dataset");
    write(
        &root,
        "docker-compose.yml",
        &compose(
            r#"    build: ./gateway
    command: ["node", "server.js", "--users-port", "9090"]
    depends_on:
      - users
"#,
        ),
    );

    let output = run_pipeline(&root, &out, &SvcGraphConfig::default())
        .await
        .unwrap();
    for name in ["graph.json", "graph.dot", "tasks.jsonl", "report.json"] {
        assert!(out.join(name).exists(), "{} missing", name);
    }
    let tasks = read_tasks(&out.join(TASKS_JSONL)).await.unwrap();
    assert_eq!(tasks, output.tasks);

    let dependents = tasks
        .iter()
        .find(|t| t.prompt().starts_with("Which services depend on `users`"))
        .unwrap();
    assert_eq!(dependents.expected(), "gateway");

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("report.json")).unwrap()).unwrap();
    assert_eq!(report["build"]["tasks_by_type"]["completion"], 1);
}
