//! Question answering, summarization and verification tasks, read straight
//! off the graph. Callers hand in the graph view the whole dataset is built
//! from; every edge in it counts as a fact.

use crate::task::{BenchmarkTask, TaskType};
use std::collections::BTreeSet;
use std::fmt::Write;
use svcgraph_core::{DependencyEdge, EdgeId};
use svcgraph_graph::DependencyGraph;

fn answer_list(names: &BTreeSet<String>) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

pub fn question_answering(graph: &DependencyGraph) -> Vec<BenchmarkTask> {
    let mut tasks = Vec::new();
    for service in graph.service_names() {
        let incoming: Vec<&DependencyEdge> = graph
            .edges()
            .iter()
            .filter(|e| e.target_service() == service)
            .collect();
        let dependents: BTreeSet<String> = incoming.iter().map(|e| e.from.clone()).collect();
        tasks.push(BenchmarkTask::new(
            TaskType::QuestionAnswering,
            format!("Which services depend on `{}`? List them in alphabetical order, or answer none.", service),
            answer_list(&dependents),
            incoming.iter().map(|e| e.id).collect(),
        ));

        let outgoing: Vec<&DependencyEdge> = graph
            .edges()
            .iter()
            .filter(|e| e.from == service)
            .collect();
        let dependencies: BTreeSet<String> = outgoing
            .iter()
            .map(|e| e.target_service().to_string())
            .collect();
        tasks.push(BenchmarkTask::new(
            TaskType::QuestionAnswering,
            format!("Which services does `{}` depend on? List them in alphabetical order, or answer none.", service),
            answer_list(&dependencies),
            outgoing.iter().map(|e| e.id).collect(),
        ));
    }
    tasks
}

/// One task: the evidence lines in, the canonical graph description out.
pub fn summarization(graph: &DependencyGraph) -> Option<BenchmarkTask> {
    if graph.service_count() == 0 {
        return None;
    }
    let mut prompt = String::from(
        "Summarize the services and their dependencies as a list of services followed by a list of dependency edges.\n\nServices:\n",
    );
    for name in graph.service_names() {
        let _ = writeln!(prompt, "- {}", name);
    }
    prompt.push_str("\nEvidence:\n");
    let mut evidence: BTreeSet<String> = BTreeSet::new();
    for edge in graph.edges() {
        for loc in &edge.locations {
            evidence.insert(format!("{}: {} -> {} ({})", loc, edge.from, edge.to, edge.kind));
        }
    }
    for line in &evidence {
        let _ = writeln!(prompt, "- {}", line);
    }
    let ids: Vec<EdgeId> = graph.edges().iter().map(|e| e.id).collect();
    Some(BenchmarkTask::new(
        TaskType::Summarization,
        prompt,
        graph.describe(),
        ids,
    ))
}

/// Yes/no questions about single edges and about reachability.
pub fn verification(graph: &DependencyGraph, negatives_per_edge: usize) -> Vec<BenchmarkTask> {
    let names = graph.service_names();
    let pairs: BTreeSet<(String, String)> = graph
        .edges()
        .iter()
        .map(|e| (e.from.clone(), e.target_service().to_string()))
        .collect();
    let edge_ids = |from: &str, to: &str| -> Vec<EdgeId> {
        graph
            .edges()
            .iter()
            .filter(|e| e.from == from && e.target_service() == to)
            .map(|e| e.id)
            .collect()
    };
    let edge_question =
        |from: &str, to: &str| format!("Does service `{}` depend directly on service `{}`? Answer yes or no.", from, to);

    let mut tasks = Vec::new();
    let mut negatives: BTreeSet<(String, String)> = BTreeSet::new();
    for (from, to) in &pairs {
        tasks.push(
            BenchmarkTask::new(
                TaskType::Verification,
                edge_question(from, to),
                "yes",
                edge_ids(from, to),
            )
            .with_explanation(format!("{} -> {} is an edge of the graph", from, to)),
        );

        // Reverse direction first, then any other service the source does not use.
        let reverse = (to.clone(), from.clone());
        let others = names
            .iter()
            .filter(|n| **n != from.as_str() && **n != to.as_str())
            .map(|n| (from.clone(), n.to_string()));
        let mut taken = 0;
        for candidate in std::iter::once(reverse).chain(others) {
            if taken == negatives_per_edge {
                break;
            }
            if pairs.contains(&candidate) || negatives.contains(&candidate) {
                continue;
            }
            negatives.insert(candidate);
            taken += 1;
        }
    }
    for (from, to) in &negatives {
        tasks.push(
            BenchmarkTask::new(TaskType::Verification, edge_question(from, to), "no", Vec::new())
                .with_explanation(format!("the graph has no edge {} -> {}", from, to)),
        );
    }

    // Paths of two or more hops, and pairs with no path at all.
    for from in &names {
        for to in &names {
            if from == to || pairs.contains(&(from.to_string(), to.to_string())) {
                continue;
            }
            let question = format!(
                "Is there a chain of dependencies leading from service `{}` to service `{}`? Answer yes or no.",
                from, to
            );
            match graph.shortest_path(from, to) {
                Some(path) => {
                    let ids = path
                        .windows(2)
                        .flat_map(|hop| edge_ids(&hop[0], &hop[1]))
                        .collect();
                    tasks.push(
                        BenchmarkTask::new(TaskType::Verification, question, "yes", ids)
                            .with_explanation(path.join(" -> ")),
                    );
                }
                None => tasks.push(
                    BenchmarkTask::new(TaskType::Verification, question, "no", Vec::new())
                        .with_explanation(format!("no dependency chain leads from {} to {}", from, to)),
                ),
            }
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcgraph_core::{Confidence, EdgeKind, EdgeSource, EdgeTarget};
    use svcgraph_graph::EdgeEvidence;

    fn chain() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for name in ["gateway", "orders", "users"] {
            graph.ensure_service(name);
        }
        for (from, to, confidence) in [("gateway", "orders", 0.9), ("orders", "users", 0.8)] {
            graph
                .observe_edge(
                    from,
                    EdgeTarget::service(to),
                    EdgeKind::DirectCall,
                    EdgeEvidence {
                        source: EdgeSource::Code,
                        location: None,
                        confidence: Confidence::new(confidence),
                        method: None,
                        ambiguous: false,
                    },
                )
                .unwrap();
        }
        graph
    }

    fn answer<'t>(tasks: &'t [BenchmarkTask], prompt_part: &str) -> &'t str {
        tasks
            .iter()
            .find(|t| t.prompt().contains(prompt_part))
            .map(|t| t.expected())
            .unwrap()
    }

    #[test]
    fn dependents_and_dependencies_are_exact() {
        let tasks = question_answering(&chain());
        assert_eq!(tasks.len(), 6);
        assert_eq!(answer(&tasks, "depend on `users`"), "orders");
        assert_eq!(answer(&tasks, "does `gateway` depend on"), "orders");
        assert_eq!(answer(&tasks, "depend on `gateway`"), "none");
        let q = tasks
            .iter()
            .find(|t| t.prompt().contains("depend on `orders`"))
            .unwrap();
        assert_eq!(q.justification().len(), 1);
    }

    #[test]
    fn low_confidence_edges_are_not_facts() {
        let tasks = question_answering(&chain().trusted(0.85));
        assert_eq!(answer(&tasks, "depend on `users`"), "none");
    }

    #[test]
    fn verification_covers_edges_negatives_and_paths() {
        let tasks = verification(&chain(), 1);
        assert_eq!(answer(&tasks, "`gateway` depend directly on service `orders`"), "yes");
        assert_eq!(answer(&tasks, "`orders` depend directly on service `gateway`"), "no");
        let path = tasks
            .iter()
            .find(|t| t.prompt().contains("from service `gateway` to service `users`"))
            .unwrap();
        assert_eq!(path.explanation(), Some("gateway -> orders -> users"));
        assert_eq!(path.justification().len(), 2);
        assert_eq!(
            answer(&tasks, "from service `users` to service `gateway`"),
            "no"
        );
    }

    #[test]
    fn summary_expects_the_canonical_description() {
        let graph = chain();
        let task = summarization(&graph).unwrap();
        assert_eq!(task.expected(), graph.describe());
        assert!(summarization(&DependencyGraph::new()).is_none());
    }
}
