use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use svcgraph_core::{Result, SnippetRef, Span, SvcGraphError};

/// Access to the unmasked file contents edges and snippets point into.
pub trait SnippetSource: Send + Sync {
    /// Full text of a file, by its path relative to the scanned root.
    fn file(&self, file_path: &str) -> Result<Arc<str>>;

    fn text(&self, snippet: &SnippetRef) -> Result<String> {
        let file = self.file(&snippet.file_path)?;
        file.get(snippet.span.start()..snippet.span.end())
            .map(str::to_string)
            .ok_or_else(|| {
                SvcGraphError::InvalidOperation(format!(
                    "span {}..{} outside {}",
                    snippet.span.start(),
                    snippet.span.end(),
                    snippet.file_path
                ))
            })
    }
}

/// Reads files below a root directory, caching each one after first use.
pub struct FsSnippets {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<str>>>,
}

impl FsSnippets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl SnippetSource for FsSnippets {
    fn file(&self, file_path: &str) -> Result<Arc<str>> {
        if let Some(hit) = self.cache.lock().get(file_path) {
            return Ok(hit.clone());
        }
        let content: Arc<str> = std::fs::read_to_string(self.root.join(file_path))?.into();
        self.cache
            .lock()
            .insert(file_path.to_string(), content.clone());
        Ok(content)
    }
}

/// In-memory files, for tests and callers that already hold the text.
#[derive(Default)]
pub struct MemorySnippets {
    files: HashMap<String, Arc<str>>,
}

impl MemorySnippets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_path: impl Into<String>, content: impl Into<String>) {
        let content: String = content.into();
        self.files.insert(file_path.into(), content.into());
    }
}

impl SnippetSource for MemorySnippets {
    fn file(&self, file_path: &str) -> Result<Arc<str>> {
        self.files
            .get(file_path)
            .cloned()
            .ok_or_else(|| SvcGraphError::InvalidOperation(format!("no such file {}", file_path)))
    }
}

/// Snippet covering line `line` (1-based), without its newline.
pub fn line_snippet(text: &str, file_path: &str, line: u32) -> Option<SnippetRef> {
    if line == 0 {
        return None;
    }
    let mut start = 0;
    for (idx, raw) in text.split_inclusive('\n').enumerate() {
        if idx + 1 == line as usize {
            let content = raw.trim_end_matches(['\n', '\r']);
            return Some(SnippetRef {
                file_path: file_path.to_string(),
                span: Span::new(start, start + content.len()),
                line,
            });
        }
        start += raw.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_snippets() {
        let text = "a: 1\nbb: 2\r\nccc: 3";
        let s = line_snippet(text, "f.yml", 2).unwrap();
        assert_eq!(&text[s.span.start()..s.span.end()], "bb: 2");
        let s = line_snippet(text, "f.yml", 3).unwrap();
        assert_eq!(&text[s.span.start()..s.span.end()], "ccc: 3");
        assert!(line_snippet(text, "f.yml", 4).is_none());
    }

    #[test]
    fn fs_snippets_read_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("users")).unwrap();
        std::fs::write(dir.path().join("users/Dockerfile"), "EXPOSE 9090\n").unwrap();
        let source = FsSnippets::new(dir.path());
        let snippet = SnippetRef {
            file_path: "users/Dockerfile".into(),
            span: Span::new(7, 11),
            line: 1,
        };
        assert_eq!(source.text(&snippet).unwrap(), "9090");
        assert!(source.file("missing.yml").is_err());
    }
}
