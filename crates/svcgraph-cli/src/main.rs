use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use svcgraph_bench::{build_dataset, run_pipeline, PipelineOutput};
use svcgraph_core::{ConfigManager, GroundTruth, SvcGraphConfig};
use svcgraph_graph::{evaluate, DependencyGraph, GraphMerger};
use svcgraph_parser::ScanRunner;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Parser)]
#[command(name = "svcgraph")]
#[command(about = "SvcGraph CLI - Cross-service dependency graphs and benchmark tasks", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty, table)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file (default: .svcgraph.toml, then ~/.svcgraph/config.toml)
    #[arg(short, long, global = true, env = "SVCGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a repository and print the dependency graph
    Scan {
        /// Repository root
        root: PathBuf,

        /// Also write the graph as JSON
        #[arg(long)]
        graph_out: Option<PathBuf>,
    },

    /// Scan a repository, build benchmark tasks and write the dataset
    Build {
        /// Repository root
        root: PathBuf,

        /// Dataset directory
        #[arg(short = 'O', long, default_value = "svcgraph-dataset")]
        out: PathBuf,

        /// Build everything but write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Query a saved graph
    Query {
        /// Graph written by `build` or `scan --graph-out`
        #[arg(short, long, default_value = "svcgraph-dataset/graph.json")]
        graph: PathBuf,

        #[command(subcommand)]
        query: QueryCommands,
    },

    /// Score a saved graph against validated edges
    Evaluate {
        #[arg(short, long)]
        graph: PathBuf,

        /// Ground-truth records (JSON or YAML)
        #[arg(short, long)]
        truth: PathBuf,

        /// Ignore edges below this confidence (default: benchmark.min_confidence)
        #[arg(long)]
        min_confidence: Option<f64>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum QueryCommands {
    /// List services
    Services,

    /// List edges
    Edges {
        #[arg(long, default_value = "0.0")]
        min_confidence: f64,
    },

    /// Services that depend on a service
    Dependents { service: String },

    /// Services a service depends on
    Dependencies { service: String },

    /// Shortest dependency chain between two services
    Path { from: String, to: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default configuration file
    Init {
        #[arg(default_value = ".svcgraph.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

// Output structures
#[derive(Serialize)]
struct ServiceRow {
    name: String,
    ports: String,
    endpoints: usize,
    observed_by: String,
}

#[derive(Serialize)]
struct EdgeRow {
    from: String,
    to: String,
    kind: String,
    confidence: String,
    sources: String,
    ambiguous: bool,
}

#[derive(Serialize)]
struct DatasetSummary {
    root: String,
    out: Option<String>,
    files_scanned: usize,
    skipped_files: usize,
    services: usize,
    edges: usize,
    rejected_candidates: usize,
    completion_proposals: usize,
    tasks: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match execute(&cli).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn execute(cli: &Cli) -> Result<serde_json::Value> {
    match &cli.command {
        Commands::Scan { root, graph_out } => {
            let manager = load_config(cli)?;
            execute_scan(root, graph_out.as_deref(), manager.config()).await
        }
        Commands::Build { root, out, dry_run } => {
            let manager = load_config(cli)?;
            execute_build(root, out, *dry_run, manager.config()).await
        }
        Commands::Query { graph, query } => {
            load_config(cli)?;
            execute_query(graph, query).await
        }
        Commands::Evaluate {
            graph,
            truth,
            min_confidence,
        } => {
            let manager = load_config(cli)?;
            let graph = load_graph(graph).await?;
            let truth = GroundTruth::load(truth)
                .with_context(|| format!("Failed to load ground truth from {}", truth.display()))?;
            let min_confidence = min_confidence.unwrap_or(manager.config().benchmark.min_confidence);
            Ok(serde_json::to_value(evaluate(&graph, &truth, min_confidence))?)
        }
        // Works without loading, so a broken config can be replaced.
        Commands::Config(ConfigCommands::Init { path, force }) => execute_config_init(path, *force),
        Commands::Config(ConfigCommands::Show) => {
            let manager = load_config(cli)?;
            Ok(serde_json::json!({
                "config_path": manager.config_path().map(|p| p.display().to_string()),
                "config": manager.config(),
            }))
        }
    }
}

fn load_config(cli: &Cli) -> Result<ConfigManager> {
    let manager = ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(manager.config(), cli.verbose);
    Ok(manager)
}

fn init_tracing(config: &SvcGraphConfig, verbose: bool) {
    let default_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = Registry::default().with(filter);
    let installed = if config.logging.format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = installed {
        eprintln!("{} {}", "Warning:".yellow().bold(), e);
    }
}

async fn execute_scan(root: &Path, graph_out: Option<&Path>, config: &SvcGraphConfig) -> Result<serde_json::Value> {
    let scanned = ScanRunner::from_config(root, config)
        .context("Failed to set up scanners")?
        .run()
        .await
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    let report = scanned.report;
    let (graph, merge) = GraphMerger::from_config(config).merge(scanned.scan);

    if let Some(path) = graph_out {
        graph
            .save_json(path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(serde_json::json!({
        "root": report.root,
        "files_scanned": report.files_scanned,
        "skipped_files": report.skipped,
        "warnings": report.warnings.len(),
        "rejected_candidates": merge.rejected_by(),
        "services": service_rows(&graph),
        "edges": edge_rows(&graph, 0.0),
    }))
}

async fn execute_build(root: &Path, out: &Path, dry_run: bool, config: &SvcGraphConfig) -> Result<serde_json::Value> {
    let output: PipelineOutput = if dry_run {
        build_dataset(root, config).await
    } else {
        run_pipeline(root, out, config).await
    }
    .with_context(|| format!("Failed to build a dataset from {}", root.display()))?;

    let summary = DatasetSummary {
        root: root.display().to_string(),
        out: (!dry_run).then(|| out.display().to_string()),
        files_scanned: output.report.scan.files_scanned,
        skipped_files: output.report.scan.skipped,
        services: output.graph.service_count(),
        edges: output.graph.edge_count(),
        rejected_candidates: output.report.merge.rejected.len(),
        completion_proposals: output.report.build.proposals,
        tasks: output.tasks.len(),
    };
    let mut value = serde_json::to_value(summary)?;
    value["tasks_by_type"] = serde_json::to_value(&output.report.build.tasks_by_type)?;
    value["rejected_masks"] = serde_json::to_value(&output.report.build.rejected_by_reason)?;
    value["edges_below_threshold"] = serde_json::to_value(output.report.build.edges_below_threshold)?;
    Ok(value)
}

async fn execute_query(graph_path: &Path, query: &QueryCommands) -> Result<serde_json::Value> {
    let graph = load_graph(graph_path).await?;
    let known = |name: &str| -> Result<()> {
        if graph.contains_service(name) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Service not found: {}", name))
        }
    };

    match query {
        QueryCommands::Services => Ok(serde_json::to_value(service_rows(&graph))?),
        QueryCommands::Edges { min_confidence } => Ok(serde_json::to_value(edge_rows(&graph, *min_confidence))?),
        QueryCommands::Dependents { service } => {
            known(service)?;
            Ok(serde_json::json!({
                "service": service,
                "dependents": graph.dependents(service),
            }))
        }
        QueryCommands::Dependencies { service } => {
            known(service)?;
            Ok(serde_json::json!({
                "service": service,
                "dependencies": graph.dependencies(service),
            }))
        }
        QueryCommands::Path { from, to } => {
            known(from)?;
            known(to)?;
            let path = graph.shortest_path(from, to);
            Ok(serde_json::json!({
                "from": from,
                "to": to,
                "reachable": path.is_some(),
                "path": path.map(|p| p.join(" -> ")),
            }))
        }
    }
}

fn execute_config_init(path: &Path, force: bool) -> Result<serde_json::Value> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    ConfigManager::create_default_config(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(serde_json::json!({
        "path": path.display().to_string(),
        "status": "created",
    }))
}

async fn load_graph(path: &Path) -> Result<DependencyGraph> {
    DependencyGraph::load_json(path)
        .await
        .with_context(|| format!("Failed to load graph from {}", path.display()))
}

fn service_rows(graph: &DependencyGraph) -> Vec<ServiceRow> {
    graph
        .services()
        .map(|s| ServiceRow {
            name: s.name.clone(),
            ports: s
                .connection
                .port_set()
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(","),
            endpoints: s.endpoints.len(),
            observed_by: s
                .observed_by
                .iter()
                .map(|src| src.as_str())
                .collect::<Vec<_>>()
                .join(","),
        })
        .collect()
}

fn edge_rows(graph: &DependencyGraph, min_confidence: f64) -> Vec<EdgeRow> {
    let mut rows: Vec<EdgeRow> = graph
        .edges()
        .iter()
        .filter(|e| e.confidence.value() >= min_confidence)
        .map(|e| EdgeRow {
            from: e.from.clone(),
            to: e.to.to_string(),
            kind: e.kind.to_string(),
            confidence: e.confidence.to_string(),
            sources: e
                .sources
                .iter()
                .map(|src| src.as_str())
                .collect::<Vec<_>>()
                .join(","),
            ambiguous: e.ambiguous,
        })
        .collect();
    rows.sort_by(|a, b| (&a.from, &a.to, &a.kind).cmp(&(&b.from, &b.to, &b.kind)));
    rows
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0)?;
        }
        OutputFormat::Table => {
            print_table(value)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value, indent: usize) -> Result<()> {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}{}: {}", pad, key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}{}: {}", pad, key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}{}: {}", pad, key_colored, val_colored);
                    }
                    serde_json::Value::Null => {
                        println!("{}{}: {}", pad, key_colored, "-".dimmed());
                    }
                    nested => {
                        println!("{}{}:", pad, key_colored);
                        print_pretty(nested, indent + 1)?;
                    }
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                match item {
                    serde_json::Value::Object(_) => {
                        println!("{}{}{}:", pad, "Item ".cyan(), (i + 1).to_string().yellow());
                        print_pretty(item, indent + 1)?;
                    }
                    serde_json::Value::String(s) => println!("{}- {}", pad, s.green()),
                    other => println!("{}- {}", pad, other),
                }
            }
        }
        _ => {
            println!("{}{}", pad, serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Arrays of objects become tables; objects become a key/value table
/// followed by a table per nested list of objects.
fn print_table(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Array(rows) if rows.iter().all(|r| r.is_object()) && !rows.is_empty() => {
            let mut builder = Builder::default();
            let headers: Vec<String> = rows[0]
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            builder.push_record(headers.clone());
            for row in rows {
                builder.push_record(headers.iter().map(|h| cell(&row[h.as_str()])));
            }
            println!("{}", builder.build().with(Style::modern()));
        }
        serde_json::Value::Object(map) => {
            let mut builder = Builder::default();
            let mut nested = Vec::new();
            for (key, val) in map {
                match val {
                    serde_json::Value::Array(items) if items.iter().any(|i| i.is_object()) => {
                        nested.push((key, val));
                    }
                    serde_json::Value::Object(inner) => {
                        for (k, v) in inner {
                            builder.push_record([format!("{}.{}", key, k), cell(v)]);
                        }
                    }
                    other => builder.push_record([key.clone(), cell(other)]),
                }
            }
            println!("{}", builder.build().with(Style::modern()));
            for (key, val) in nested {
                println!("\n{}", key.cyan().bold());
                print_table(val)?;
            }
        }
        other => print_pretty(other, 0)?,
    }
    Ok(())
}
