use crate::{EdgeKind, EdgeSource, EdgeTarget, Result, SvcGraphError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Validator {
    Human { name: String },
    Rule { name: String },
}

impl Validator {
    /// A rule named after one of the automated extractors would let the
    /// extractor grade itself.
    pub fn is_extractor(&self) -> bool {
        match self {
            Validator::Human { .. } => false,
            Validator::Rule { name } => EdgeSource::EXTRACTORS
                .iter()
                .any(|s| s.as_str().eq_ignore_ascii_case(name.trim())),
        }
    }
}

/// A validated dependency used only to score extracted graphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub from: String,
    pub to: EdgeTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EdgeKind>,
    pub validated_by: Validator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundTruth {
    pub records: Vec<GroundTruthRecord>,
}

impl GroundTruth {
    pub fn new(records: Vec<GroundTruthRecord>) -> Result<Self> {
        for record in &records {
            if record.validated_by.is_extractor() {
                return Err(SvcGraphError::InvalidOperation(format!(
                    "ground truth edge {} -> {} is validated by extractor rule {:?}",
                    record.from, record.to, record.validated_by
                )));
            }
        }
        Ok(Self { records })
    }

    /// Loads a JSON or YAML list of records.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let records: Vec<GroundTruthRecord> = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Self::new(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
