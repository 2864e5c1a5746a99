//! Acceptance rules for completion tasks. A proposal becomes a task only if
//! its masked value is hidden from the prompt, round-trips, and is
//! determined by the other services' context but not by the consumer's own.

use crate::context::{word_matches, ContextOracle, MaskedRegion, Scope};
use crate::strategy::MaskProposal;
use crate::task::{BenchmarkTask, ContextDocument, MaskRecord, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("marker already occurs in the snippet")]
    MarkerCollision,

    #[error("restoring the masked span does not reproduce the snippet")]
    RoundTrip,

    #[error("expected value {expected:?} is still visible in the prompt")]
    LocallyInferable { expected: String },

    #[error("no available context supports a value")]
    Unrecoverable,

    #[error("context supports several values: {answers:?}")]
    Ambiguous { answers: Vec<String> },

    #[error("context supports {answers:?}, not {expected:?}")]
    Inconsistent { expected: String, answers: Vec<String> },

    #[error("the consumer's own sources already determine {expected:?}")]
    CrossServiceUnnecessary { expected: String },

    #[error("an identical task was already emitted")]
    Duplicate,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MarkerCollision => "marker_collision",
            RejectReason::RoundTrip => "round_trip",
            RejectReason::LocallyInferable { .. } => "locally_inferable",
            RejectReason::Unrecoverable => "unrecoverable",
            RejectReason::Ambiguous { .. } => "ambiguous",
            RejectReason::Inconsistent { .. } => "inconsistent",
            RejectReason::CrossServiceUnnecessary { .. } => "cross_service_unnecessary",
            RejectReason::Duplicate => "duplicate",
        }
    }
}

/// Whether `token` occurs in `text` as a whole word.
pub fn contains_token(text: &str, token: &str) -> bool {
    word_matches(text, token).next().is_some()
}

pub fn completion_prompt(file_path: &str, consumer: &str, marker: &str, masked: &str) -> String {
    format!(
        "The snippet below comes from `{}` of service `{}`. Replace {} with the exact text it stands for.\n\n{}",
        file_path, consumer, marker, masked
    )
}

/// Checks one proposal and builds its task.
pub fn completion_task(
    proposal: &MaskProposal,
    marker: &str,
    oracle: &ContextOracle,
    context: Vec<ContextDocument>,
) -> std::result::Result<BenchmarkTask, RejectReason> {
    let original = &proposal.snippet_text;
    if original.contains(marker) {
        return Err(RejectReason::MarkerCollision);
    }

    let rel = proposal.relative_mask();
    let masked = format!("{}{}{}", &original[..rel.start], marker, &original[rel.end..]);
    let record = MaskRecord {
        file_path: proposal.snippet.file_path.clone(),
        snippet_span: proposal.snippet.span,
        mask_span: svcgraph_core::Span::new(rel.start, rel.end),
        marker: marker.to_string(),
        original: proposal.expected.clone(),
        strategy: proposal.strategy.to_string(),
    };
    if record.restore(&masked).as_deref() != Some(original.as_str()) {
        return Err(RejectReason::RoundTrip);
    }

    let prompt = completion_prompt(
        &proposal.snippet.file_path,
        &proposal.slot.consumer,
        marker,
        &masked,
    );
    if contains_token(&prompt, &proposal.expected) {
        return Err(RejectReason::LocallyInferable {
            expected: proposal.expected.clone(),
        });
    }

    let region = MaskedRegion::new(&proposal.snippet, original);
    let full = oracle.answers(&proposal.slot, Scope::Full, &region);
    if full.is_empty() {
        return Err(RejectReason::Unrecoverable);
    }
    if full.len() > 1 {
        return Err(RejectReason::Ambiguous {
            answers: full.into_iter().collect(),
        });
    }
    if !full.contains(&proposal.expected) {
        return Err(RejectReason::Inconsistent {
            expected: proposal.expected.clone(),
            answers: full.into_iter().collect(),
        });
    }

    let local = oracle.answers(
        &proposal.slot,
        Scope::SingleService(&proposal.slot.consumer),
        &region,
    );
    if local == BTreeSet::from([proposal.expected.clone()]) {
        return Err(RejectReason::CrossServiceUnnecessary {
            expected: proposal.expected.clone(),
        });
    }

    Ok(BenchmarkTask::new(
        TaskType::Completion,
        prompt,
        proposal.expected.clone(),
        proposal.edge_ids.clone(),
    )
    .with_mask(record)
    .with_context(context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_respect_word_boundaries() {
        assert!(contains_token("--users-port 9090", "9090"));
        assert!(contains_token("http://users:9090/x", "users"));
        assert!(!contains_token("port 19090", "9090"));
        assert!(!contains_token("USERS_URL", "USERS"));
        assert!(!contains_token("anything", ""));
    }

    #[test]
    fn reasons_have_stable_codes() {
        let reason = RejectReason::Ambiguous {
            answers: vec!["8080".into(), "9090".into()],
        };
        assert_eq!(reason.code(), "ambiguous");
        assert!(reason.to_string().contains("9090"));
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "ambiguous");
    }
}
