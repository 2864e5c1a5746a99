use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use svcgraph_core::{EdgeId, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Completion,
    QuestionAnswering,
    Summarization,
    Verification,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Completion => "completion",
            TaskType::QuestionAnswering => "question_answering",
            TaskType::Summarization => "summarization",
            TaskType::Verification => "verification",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a completion task's marker sits and what it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRecord {
    pub file_path: String,
    /// Snippet position in the file.
    pub snippet_span: Span,
    /// Masked bytes, relative to the snippet start.
    pub mask_span: Span,
    pub marker: String,
    pub original: String,
    pub strategy: String,
}

impl MaskRecord {
    /// Puts `original` back in place of the marker.
    pub fn restore(&self, masked_snippet: &str) -> Option<String> {
        let at = masked_snippet.find(&self.marker)?;
        let mut out = String::with_capacity(masked_snippet.len() + self.original.len());
        out.push_str(&masked_snippet[..at]);
        out.push_str(&self.original);
        out.push_str(&masked_snippet[at + self.marker.len()..]);
        Some(out)
    }
}

/// Text handed to a model alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub text: String,
}

/// One benchmark item. Built once, never mutated; the id is derived from
/// type, prompt and expected answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTask {
    id: String,
    task_type: TaskType,
    prompt: String,
    expected: String,
    justification: Vec<EdgeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mask: Option<MaskRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    context: Vec<ContextDocument>,
}

pub fn task_id(task_type: TaskType, prompt: &str, expected: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(expected.as_bytes());
    hex::encode(hasher.finalize())
}

impl BenchmarkTask {
    pub fn new(
        task_type: TaskType,
        prompt: impl Into<String>,
        expected: impl Into<String>,
        mut justification: Vec<EdgeId>,
    ) -> Self {
        let prompt = prompt.into();
        let expected = expected.into();
        justification.sort();
        justification.dedup();
        Self {
            id: task_id(task_type, &prompt, &expected),
            task_type,
            prompt,
            expected,
            justification,
            explanation: None,
            mask: None,
            context: Vec::new(),
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_mask(mut self, mask: MaskRecord) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_context(mut self, context: Vec<ContextDocument>) -> Self {
        self.context = context;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn justification(&self) -> &[EdgeId] {
        &self.justification
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    pub fn mask(&self) -> Option<&MaskRecord> {
        self.mask.as_ref()
    }

    pub fn context(&self) -> &[ContextDocument] {
        &self.context
    }

    /// Whether the stored id still matches the content, e.g. after loading.
    pub fn id_is_consistent(&self) -> bool {
        self.id == task_id(self.task_type, &self.prompt, &self.expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_content_hashes() {
        let a = BenchmarkTask::new(TaskType::QuestionAnswering, "Which?", "users", vec![]);
        let b = BenchmarkTask::new(TaskType::QuestionAnswering, "Which?", "users", vec![]);
        let c = BenchmarkTask::new(TaskType::Verification, "Which?", "users", vec![]);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.id().len(), 64);
        assert!(a.id_is_consistent());
    }

    #[test]
    fn mask_restores_the_original() {
        let record = MaskRecord {
            file_path: "docker-compose.yml".into(),
            snippet_span: Span::new(10, 40),
            mask_span: Span::new(22, 26),
            marker: "<MASK>".into(),
            original: "9090".into(),
            strategy: "invocation-port".into(),
        };
        assert_eq!(
            record.restore("command: --port <MASK> --debug").as_deref(),
            Some("command: --port 9090 --debug")
        );
        assert!(record.restore("no marker").is_none());
    }
}
