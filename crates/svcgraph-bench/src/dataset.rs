use crate::task::BenchmarkTask;
use serde::Serialize;
use std::path::{Path, PathBuf};
use svcgraph_core::{Result, SvcGraphError};
use svcgraph_graph::DependencyGraph;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

pub const GRAPH_JSON: &str = "graph.json";
pub const GRAPH_DOT: &str = "graph.dot";
pub const TASKS_JSONL: &str = "tasks.jsonl";
pub const REPORT_JSON: &str = "report.json";

/// Writes a dataset directory: the graph, one task per line, and a report.
pub struct DatasetWriter {
    dir: PathBuf,
}

impl DatasetWriter {
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write_graph(&self, graph: &DependencyGraph) -> Result<()> {
        graph.save_json(&self.dir.join(GRAPH_JSON)).await?;
        fs::write(self.dir.join(GRAPH_DOT), graph.to_dot()).await?;
        Ok(())
    }

    pub async fn write_tasks(&self, tasks: &[BenchmarkTask]) -> Result<()> {
        let path = self.dir.join(TASKS_JSONL);
        let mut file = fs::File::create(&path).await?;
        for task in tasks {
            let mut line = serde_json::to_string(task)?;
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
        }
        file.flush().await?;
        info!("Wrote {} tasks to {}", tasks.len(), path.display());
        Ok(())
    }

    pub async fn write_report<R: Serialize>(&self, report: &R) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        fs::write(self.dir.join(REPORT_JSON), json).await?;
        Ok(())
    }
}

/// Reads a `tasks.jsonl` file back, checking every stored id.
pub async fn read_tasks(path: &Path) -> Result<Vec<BenchmarkTask>> {
    let content = fs::read_to_string(path).await?;
    let mut tasks = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let task: BenchmarkTask = serde_json::from_str(line)?;
        if !task.id_is_consistent() {
            return Err(SvcGraphError::Parse(format!(
                "{}:{}: task id does not match its content",
                path.display(),
                idx + 1
            )));
        }
        tasks.push(task);
    }
    Ok(tasks)
}
