use crate::context::{ContextOracle, Corpus, MaskedRegion};
use crate::generators;
use crate::invariants::{completion_task, RejectReason};
use crate::snippet::SnippetSource;
use crate::strategy::{dedupe, strategy_by_name, MaskProposal, MaskingStrategy, ProposalContext};
use crate::task::{BenchmarkTask, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use svcgraph_core::{BenchmarkConfig, EdgeId, Result, SvcGraphConfig};
use svcgraph_graph::DependencyGraph;
use tracing::{debug, info};

/// A proposal that did not become a task, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub strategy: String,
    pub file_path: String,
    pub line: u32,
    pub expected: String,
    pub edge_ids: Vec<EdgeId>,
    #[serde(flatten)]
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    pub edges_considered: usize,
    pub edges_below_threshold: usize,
    pub proposals: usize,
    pub tasks_by_type: BTreeMap<String, usize>,
    pub accepted_by_strategy: BTreeMap<String, usize>,
    /// Accepted completions left out by `max_tasks_per_strategy`.
    pub capped: usize,
    pub rejected_by_reason: BTreeMap<String, usize>,
    pub rejections: Vec<Rejection>,
}

impl BuildReport {
    fn reject(&mut self, proposal: &MaskProposal, reason: RejectReason) {
        debug!(
            "Rejected {} mask in {}:{}: {}",
            proposal.strategy, proposal.snippet.file_path, proposal.snippet.line, reason
        );
        *self
            .rejected_by_reason
            .entry(reason.code().to_string())
            .or_insert(0) += 1;
        self.rejections.push(Rejection {
            strategy: proposal.strategy.to_string(),
            file_path: proposal.snippet.file_path.clone(),
            line: proposal.snippet.line,
            expected: proposal.expected.clone(),
            edge_ids: proposal.edge_ids.clone(),
            reason,
        });
    }

    pub fn rejected(&self, code: &str) -> usize {
        self.rejected_by_reason.get(code).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkOutput {
    /// The graph every task was built from: the input minus edges below
    /// `min_confidence`.
    pub graph: DependencyGraph,
    pub tasks: Vec<BenchmarkTask>,
    pub report: BuildReport,
}

impl BenchmarkOutput {
    pub fn of_type(&self, task_type: TaskType) -> impl Iterator<Item = &BenchmarkTask> {
        self.tasks.iter().filter(move |t| t.task_type() == task_type)
    }
}

/// Turns a finished graph into benchmark tasks.
pub struct BenchmarkBuilder {
    config: BenchmarkConfig,
    strategies: Vec<Arc<dyn MaskingStrategy>>,
}

impl BenchmarkBuilder {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self {
            config,
            strategies: Vec::new(),
        }
    }

    /// Builder with the strategies named in the configuration.
    pub fn from_config(config: &SvcGraphConfig) -> Result<Self> {
        let mut builder = Self::new(config.benchmark.clone());
        for name in &config.benchmark.strategies {
            builder.strategies.push(strategy_by_name(name)?);
        }
        Ok(builder)
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn MaskingStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn build(&self, input: &DependencyGraph, snippets: &dyn SnippetSource) -> Result<BenchmarkOutput> {
        let view = input.trusted(self.config.min_confidence);
        let graph = &view;
        let corpus = Corpus::collect(graph, snippets);
        let oracle = ContextOracle::new(graph, &corpus);
        let ctx = ProposalContext {
            graph,
            corpus: &corpus,
        };
        info!(
            "Building tasks from {} services, {} edges, {} documents",
            graph.service_count(),
            graph.edge_count(),
            corpus.documents.len()
        );

        let mut report = BuildReport::default();
        let mut tasks = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for strategy in &self.strategies {
            let mut proposals = Vec::new();
            for edge in graph.edges() {
                proposals.extend(strategy.propose(edge, &ctx)?);
            }
            let proposals = dedupe(proposals);
            report.proposals += proposals.len();

            let mut accepted = 0usize;
            for proposal in &proposals {
                let region = MaskedRegion::new(&proposal.snippet, &proposal.snippet_text);
                let context = corpus.context_for(&region, graph);
                let task = match completion_task(proposal, &self.config.mask_marker, &oracle, context) {
                    Ok(task) => task,
                    Err(reason) => {
                        report.reject(proposal, reason);
                        continue;
                    }
                };
                if !seen.insert(task.id().to_string()) {
                    report.reject(proposal, RejectReason::Duplicate);
                    continue;
                }
                if self
                    .config
                    .max_tasks_per_strategy
                    .map(|cap| accepted >= cap)
                    .unwrap_or(false)
                {
                    report.capped += 1;
                    continue;
                }
                accepted += 1;
                tasks.push(task);
            }
            report
                .accepted_by_strategy
                .insert(strategy.name().to_string(), accepted);
        }

        report.edges_considered = input.edge_count();
        report.edges_below_threshold = input.edge_count() - graph.edge_count();

        let mut derived = Vec::new();
        if self.config.question_answering {
            derived.extend(generators::question_answering(graph));
        }
        if self.config.summarization {
            derived.extend(generators::summarization(graph));
        }
        if self.config.verification {
            derived.extend(generators::verification(graph, self.config.negatives_per_edge));
        }
        for task in derived {
            if seen.insert(task.id().to_string()) {
                tasks.push(task);
            }
        }

        for task in &tasks {
            *report
                .tasks_by_type
                .entry(task.task_type().to_string())
                .or_insert(0) += 1;
        }
        info!(
            "Built {} tasks ({} completion proposals, {} rejected)",
            tasks.len(),
            report.proposals,
            report.rejections.len()
        );
        Ok(BenchmarkOutput {
            graph: view,
            tasks,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::MemorySnippets;
    use svcgraph_core::{Confidence, EdgeKind, EdgeSource, EdgeTarget, Location};
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
                        location: Some(Location::line(format!("{}/app.py", from), 3)),
                        confidence: Confidence::new(confidence),
                        method: None,
                        ambiguous: false,
                    },
                )
                .unwrap();
        }
        graph
    }

    #[test]
    fn derived_tasks_agree_on_weak_edges() {
        let mut config = SvcGraphConfig::default();
        config.benchmark.min_confidence = 0.85;
        let builder = BenchmarkBuilder::from_config(&config).unwrap();
        let output = builder.build(&chain(), &MemorySnippets::new()).unwrap();

        assert!(output.graph.has_edge("gateway", "orders"));
        assert!(!output.graph.has_edge("orders", "users"));
        assert_eq!(output.report.edges_considered, 2);
        assert_eq!(output.report.edges_below_threshold, 1);

        let answer = |part: &str| {
            output
                .tasks
                .iter()
                .find(|t| t.prompt().contains(part))
                .map(|t| t.expected().to_string())
                .unwrap()
        };
        assert_eq!(answer("Which services depend on `users`"), "none");
        assert_eq!(answer("Which services does `orders` depend on"), "none");
        assert_eq!(answer("from service `orders` to service `users`"), "no");
        assert_eq!(answer("from service `gateway` to service `users`"), "no");

        let summary = output.of_type(TaskType::Summarization).next().unwrap();
        assert_eq!(summary.expected(), output.graph.describe());
        assert!(!summary.expected().contains("orders -> users"));
        assert!(!summary.prompt().contains("orders/app.py"));
        assert!(summary.prompt().contains("gateway/app.py:3"));
    }
}
