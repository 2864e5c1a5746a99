use crate::{AliasDeclaration, CandidateEdge, SelectorBinding, ServiceObservation};
use serde::{Deserialize, Serialize};

/// Everything one scanner learned from one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileScan {
    pub observations: Vec<ServiceObservation>,
    pub candidates: Vec<CandidateEdge>,
    pub aliases: Vec<AliasDeclaration>,
    pub bindings: Vec<SelectorBinding>,
    pub warnings: Vec<ScanWarning>,
}

impl FileScan {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
            && self.candidates.is_empty()
            && self.aliases.is_empty()
            && self.bindings.is_empty()
    }

    pub fn extend(&mut self, other: FileScan) {
        self.observations.extend(other.observations);
        self.candidates.extend(other.candidates);
        self.aliases.extend(other.aliases);
        self.bindings.extend(other.bindings);
        self.warnings.extend(other.warnings);
    }

    pub fn warn(&mut self, path: impl Into<String>, kind: WarningKind, message: impl Into<String>) {
        self.warnings.push(ScanWarning {
            path: path.into(),
            kind,
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Unparseable,
    Timeout,
    Malformed,
    Unreadable,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: String,
    pub kind: WarningKind,
    pub message: String,
}
