use crate::code_scan::CodeScanner;
use crate::collector::CandidateCollector;
use crate::contract::ContractParser;
use crate::file_collect::{collect_files, relative_path, FileCollectionConfig};
use crate::manifest::ManifestScanner;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use svcgraph_core::{
    FileScan, Result, ScanWarning, SourceScanner, SvcGraphConfig, SvcGraphError, WarningKind,
};
use tracing::{debug, info, warn};

/// What a scan run looked at and what it had to skip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub root: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Files accepted by some scanner.
    pub files_accepted: usize,
    /// Files that produced a scan result (possibly empty).
    pub files_scanned: usize,
    pub timed_out: usize,
    /// Unreadable, timed-out or failed files.
    pub skipped: usize,
    pub per_scanner: BTreeMap<String, usize>,
    pub candidates: usize,
    pub observations: usize,
    pub warnings: Vec<ScanWarning>,
}

pub struct ScanOutput {
    pub scan: FileScan,
    pub report: ScanReport,
}

enum FileOutcome {
    Scanned { scanner: &'static str, scan: FileScan },
    Skipped(ScanWarning),
    TimedOut(ScanWarning),
}

/// Runs every scanner over a repository tree.
///
/// Each file goes to the first scanner that accepts it. Files are parsed on
/// blocking workers, at most `max_concurrency` at a time, each under its own
/// timeout.
pub struct ScanRunner {
    root: PathBuf,
    collection: FileCollectionConfig,
    scanners: Vec<Arc<dyn SourceScanner>>,
    timeout: Duration,
    max_concurrency: usize,
}

impl ScanRunner {
    pub fn new(
        root: impl Into<PathBuf>,
        collection: FileCollectionConfig,
        scanners: Vec<Arc<dyn SourceScanner>>,
        timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            root: root.into(),
            collection,
            scanners,
            timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Contract, manifest and code scanners, in that order of precedence.
    pub fn from_config(root: impl Into<PathBuf>, config: &SvcGraphConfig) -> Result<Self> {
        let scanners: Vec<Arc<dyn SourceScanner>> = vec![
            Arc::new(ContractParser::new(&config.scan.contract_patterns)?),
            Arc::new(ManifestScanner::new(config.confidence.clone())),
            Arc::new(CodeScanner::from_config(config)?),
        ];
        Ok(Self::new(
            root,
            FileCollectionConfig::from(&config.scan),
            scanners,
            Duration::from_millis(config.scan.parse_timeout_ms),
            config.scan.max_concurrency,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scanner_for(&self, rel_path: &Path) -> Option<Arc<dyn SourceScanner>> {
        self.scanners.iter().find(|s| s.accepts(rel_path)).cloned()
    }

    pub async fn run(&self) -> Result<ScanOutput> {
        let started_at = Utc::now();
        let files = collect_files(&self.root, &self.collection)?;

        let accepted: Vec<(PathBuf, PathBuf, Arc<dyn SourceScanner>)> = files
            .into_iter()
            .filter_map(|(path, _)| {
                let rel = PathBuf::from(relative_path(&self.root, &path));
                self.scanner_for(&rel).map(|s| (path, rel, s))
            })
            .collect();

        if accepted.is_empty() {
            return Err(SvcGraphError::NoInputs(self.root.display().to_string()));
        }
        info!(
            "Scanning {} files under {} ({} concurrent)",
            accepted.len(),
            self.root.display(),
            self.max_concurrency
        );

        let files_accepted = accepted.len();
        let collector = CandidateCollector::new();
        let timeout = self.timeout;

        let mut outcomes = stream::iter(accepted.into_iter().map(|(path, rel, scanner)| {
            scan_one(path, rel, scanner, timeout)
        }))
        .buffer_unordered(self.max_concurrency);

        let mut files_scanned = 0;
        let mut timed_out = 0;
        let mut skipped = 0;
        let mut per_scanner: BTreeMap<String, usize> = BTreeMap::new();
        let mut failures = FileScan::default();

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                FileOutcome::Scanned { scanner, scan } => {
                    files_scanned += 1;
                    *per_scanner.entry(scanner.to_string()).or_default() += 1;
                    collector.push(scan);
                }
                FileOutcome::Skipped(w) => {
                    skipped += 1;
                    failures.warnings.push(w);
                }
                FileOutcome::TimedOut(w) => {
                    skipped += 1;
                    timed_out += 1;
                    failures.warnings.push(w);
                }
            }
        }
        collector.push(failures);

        let mut scan = collector.into_inner();
        let mut warnings = std::mem::take(&mut scan.warnings);
        warnings.sort_by(|a, b| a.path.cmp(&b.path));

        let report = ScanReport {
            root: self.root.display().to_string(),
            started_at,
            finished_at: Utc::now(),
            files_accepted,
            files_scanned,
            timed_out,
            skipped,
            per_scanner,
            candidates: scan.candidates.len(),
            observations: scan.observations.len(),
            warnings,
        };
        info!(
            "Scan finished: {} files, {} observations, {} candidates, {} warnings",
            report.files_scanned,
            report.observations,
            report.candidates,
            report.warnings.len()
        );
        Ok(ScanOutput { scan, report })
    }
}

async fn scan_one(
    path: PathBuf,
    rel: PathBuf,
    scanner: Arc<dyn SourceScanner>,
    timeout: Duration,
) -> FileOutcome {
    let rel_str = rel.to_string_lossy().replace('\\', "/");
    let skipped = |kind: WarningKind, message: String| ScanWarning {
        path: rel_str.clone(),
        kind,
        message,
    };

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) => {
            warn!("Cannot read {}: {}", rel_str, e);
            return FileOutcome::Skipped(skipped(WarningKind::Unreadable, e.to_string()));
        }
    };
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            debug!("Skipping non-UTF-8 file {}", rel_str);
            return FileOutcome::Skipped(skipped(
                WarningKind::Unreadable,
                "not valid UTF-8".to_string(),
            ));
        }
    };

    let name = scanner.name();
    let task = tokio::task::spawn_blocking(move || scanner.scan_file(&rel, &content));
    match tokio::time::timeout(timeout, task).await {
        Err(_) => {
            warn!("{} scanner timed out on {}", name, rel_str);
            FileOutcome::TimedOut(skipped(
                WarningKind::Timeout,
                SvcGraphError::Timeout {
                    path: rel_str.clone(),
                    millis: timeout.as_millis() as u64,
                }
                .to_string(),
            ))
        }
        Ok(Err(join_err)) => {
            warn!("{} scanner failed on {}: {}", name, rel_str, join_err);
            FileOutcome::Skipped(skipped(WarningKind::Unparseable, join_err.to_string()))
        }
        Ok(Ok(Err(e))) => {
            warn!("{} scanner rejected {}: {}", name, rel_str, e);
            FileOutcome::Skipped(skipped(WarningKind::Malformed, e.to_string()))
        }
        Ok(Ok(Ok(scan))) => FileOutcome::Scanned { scanner: name, scan },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_accepting_scanner_wins() {
        let config = SvcGraphConfig::default();
        let runner = ScanRunner::from_config(".", &config).unwrap();
        let name = |p: &str| runner.scanner_for(Path::new(p)).map(|s| s.name());
        assert_eq!(name("users/openapi.yaml"), Some("contract"));
        assert_eq!(name("docker-compose.yml"), Some("manifest"));
        assert_eq!(name("k8s/deploy.yaml"), Some("manifest"));
        assert_eq!(name("users/Dockerfile"), Some("manifest"));
        assert_eq!(name("users/app.py"), Some("code"));
        assert_eq!(name("README.md"), None);
    }
}
