use crate::graph::DependencyGraph;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use svcgraph_core::{DependencyEdge, EdgeTarget, GroundTruth, GroundTruthRecord};

/// Extracted graph scored against validated edges.
///
/// Recall counts ground-truth records matched by some edge; precision counts
/// extracted `(from, to)` service pairs that some record confirms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub min_confidence: f64,
    pub truth_records: usize,
    pub predicted_pairs: usize,
    pub matched_records: usize,
    pub confirmed_pairs: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Ground-truth edges the graph lacks.
    pub missed: Vec<String>,
    /// Extracted pairs no record confirms.
    pub unconfirmed: Vec<String>,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn matches_record(edge: &DependencyEdge, record: &GroundTruthRecord) -> bool {
    if edge.from != record.from || edge.target_service() != record.to.service_name() {
        return false;
    }
    if let Some(kind) = &record.kind {
        if &edge.kind != kind {
            return false;
        }
    }
    match &record.to {
        EdgeTarget::Service { .. } => true,
        EdgeTarget::Endpoint { .. } => edge.to == record.to,
    }
}

/// Scores `graph` against `truth`, ignoring edges below `min_confidence`.
pub fn evaluate(graph: &DependencyGraph, truth: &GroundTruth, min_confidence: f64) -> Evaluation {
    let edges: Vec<&DependencyEdge> = graph
        .edges()
        .iter()
        .filter(|e| e.confidence.value() >= min_confidence)
        .collect();

    let mut missed = Vec::new();
    let mut matched_records = 0;
    for record in &truth.records {
        if edges.iter().any(|e| matches_record(e, record)) {
            matched_records += 1;
        } else {
            missed.push(format!("{} -> {}", record.from, record.to));
        }
    }

    let truth_pairs: BTreeSet<(&str, &str)> = truth
        .records
        .iter()
        .map(|r| (r.from.as_str(), r.to.service_name()))
        .collect();
    let predicted: BTreeSet<(&str, &str)> = edges
        .iter()
        .map(|e| (e.from.as_str(), e.target_service()))
        .collect();
    let confirmed_pairs = predicted.intersection(&truth_pairs).count();
    let unconfirmed = predicted
        .difference(&truth_pairs)
        .map(|(f, t)| format!("{} -> {}", f, t))
        .collect();

    let precision = ratio(confirmed_pairs, predicted.len());
    let recall = ratio(matched_records, truth.records.len());
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    Evaluation {
        min_confidence,
        truth_records: truth.records.len(),
        predicted_pairs: predicted.len(),
        matched_records,
        confirmed_pairs,
        precision,
        recall,
        f1,
        missed,
        unconfirmed,
    }
}
