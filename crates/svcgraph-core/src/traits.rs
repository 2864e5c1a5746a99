use crate::{EdgeSource, FileScan, Result};
use std::path::Path;

/// One extractor over one kind of input file.
///
/// Implementations must be pure per file: everything a scan learns goes into
/// the returned [`FileScan`], so files can be scanned concurrently.
pub trait SourceScanner: Send + Sync {
    fn name(&self) -> &'static str;

    fn source(&self) -> EdgeSource;

    /// Whether this scanner wants the file at `rel_path` (relative to the scan root).
    fn accepts(&self, rel_path: &Path) -> bool;

    fn scan_file(&self, rel_path: &Path, content: &str) -> Result<FileScan>;
}
