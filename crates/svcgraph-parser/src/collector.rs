use parking_lot::Mutex;
use std::sync::Arc;
use svcgraph_core::FileScan;

/// Append-only sink shared by concurrent per-file scans.
///
/// Scanners only ever push; the merged result is taken once, after every
/// scan future has completed.
#[derive(Clone, Default)]
pub struct CandidateCollector {
    inner: Arc<Mutex<FileScan>>,
}

impl CandidateCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, scan: FileScan) {
        self.inner.lock().extend(scan);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the collected scan. Other handles see an empty collection afterwards.
    pub fn into_inner(self) -> FileScan {
        std::mem::take(&mut *self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcgraph_core::{CandidateEdge, EdgeKind, EdgeSource, TargetRef};

    #[test]
    fn pushes_from_many_threads() {
        let collector = CandidateCollector::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = collector.clone();
                std::thread::spawn(move || {
                    let mut scan = FileScan::default();
                    scan.candidates.push(CandidateEdge::new(
                        format!("svc{}", i),
                        TargetRef::Service { name: "users".into() },
                        EdgeKind::DeclaredLink,
                        EdgeSource::Config,
                    ));
                    c.push(scan);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(collector.len(), 8);
        assert_eq!(collector.into_inner().candidates.len(), 8);
    }
}
