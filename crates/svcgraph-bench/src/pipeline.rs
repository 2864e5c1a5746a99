//! Scan, merge, build and write in one call.

use crate::builder::{BenchmarkBuilder, BuildReport};
use crate::dataset::DatasetWriter;
use crate::snippet::FsSnippets;
use crate::task::BenchmarkTask;
use serde::{Deserialize, Serialize};
use std::path::Path;
use svcgraph_core::{Result, SvcGraphConfig};
use svcgraph_graph::{DependencyGraph, GraphMerger, MergeReport};
use svcgraph_parser::{ScanReport, ScanRunner};
use tracing::info;

/// Everything `report.json` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetReport {
    pub scan: ScanReport,
    pub merge: MergeReport,
    pub build: BuildReport,
}

pub struct PipelineOutput {
    /// The merged graph without edges below `benchmark.min_confidence`;
    /// `graph.json` and every task describe this graph.
    pub graph: DependencyGraph,
    pub tasks: Vec<BenchmarkTask>,
    pub report: DatasetReport,
}

/// Scans `root` and builds the graph and tasks, without writing anything.
pub async fn build_dataset(root: &Path, config: &SvcGraphConfig) -> Result<PipelineOutput> {
    let builder = BenchmarkBuilder::from_config(config)?;
    let scanned = ScanRunner::from_config(root, config)?.run().await?;
    let (graph, merge) = GraphMerger::from_config(config).merge(scanned.scan);
    graph.validate()?;

    let snippets = FsSnippets::new(root);
    let built = builder.build(&graph, &snippets)?;
    Ok(PipelineOutput {
        graph: built.graph,
        tasks: built.tasks,
        report: DatasetReport {
            scan: scanned.report,
            merge,
            build: built.report,
        },
    })
}

/// [`build_dataset`], then writes the dataset into `out_dir`.
pub async fn run_pipeline(root: &Path, out_dir: &Path, config: &SvcGraphConfig) -> Result<PipelineOutput> {
    let output = build_dataset(root, config).await?;
    let writer = DatasetWriter::create(out_dir).await?;
    writer.write_graph(&output.graph).await?;
    writer.write_tasks(&output.tasks).await?;
    writer.write_report(&output.report).await?;
    info!(
        "Dataset written to {}: {} services, {} edges, {} tasks",
        out_dir.display(),
        output.graph.service_count(),
        output.graph.edge_count(),
        output.tasks.len()
    );
    Ok(output)
}
