//! Indentation outline of a YAML file.
//!
//! `serde_yaml` drops positions, but masks and locations need byte spans and
//! line numbers. This keeps a per-line view (indent, key, list marker) and
//! finds the block under a key path by indentation alone.

use std::ops::Range;
use svcgraph_core::Span;

#[derive(Debug, Clone)]
struct OutlineLine {
    start: usize,
    end: usize,
    /// Column of the first key character (after any `- ` markers).
    indent: usize,
    /// Column of the list dash when the line opens a list item.
    dash: Option<usize>,
    key: Option<Range<usize>>,
    inline_value: bool,
    blank: bool,
}

impl OutlineLine {
    /// Lines deeper than this belong to the line's block.
    fn container_indent(&self) -> usize {
        self.dash.unwrap_or(self.indent)
    }
}

/// A key (or list item) and every line nested under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YamlBlock {
    pub span: Span,
    /// 1-based line of the header.
    pub line: u32,
    first: usize,
    last: usize,
    /// Whether the first line is a `key:` header rather than content.
    has_header: bool,
}

pub struct YamlOutline<'a> {
    text: &'a str,
    lines: Vec<OutlineLine>,
}

impl<'a> YamlOutline<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut lines = Vec::new();
        let mut start = 0;
        for raw in text.split_inclusive('\n') {
            let end = start + raw.len();
            let content = raw.trim_end_matches(['\n', '\r']);
            lines.push(outline_line(content, start, start + content.len()));
            start = end;
        }
        Self { text, lines }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Every `---`-separated document, as blocks covering its lines.
    pub fn documents(&self) -> Vec<YamlBlock> {
        let mut docs = Vec::new();
        let mut first = 0;
        for (i, line) in self.lines.iter().enumerate() {
            let content = &self.text[line.start..line.end];
            if content.starts_with("---") {
                if let Some(doc) = self.range_block(first, i) {
                    docs.push(doc);
                }
                first = i + 1;
            }
        }
        if let Some(doc) = self.range_block(first, self.lines.len()) {
            docs.push(doc);
        }
        docs
    }

    pub fn root(&self) -> Option<YamlBlock> {
        self.range_block(0, self.lines.len())
    }

    fn range_block(&self, first: usize, end: usize) -> Option<YamlBlock> {
        let first = (first..end).find(|&i| !self.lines[i].blank)?;
        let last = (first..end).rev().find(|&i| !self.lines[i].blank)?;
        Some(self.make_block(first, last, false))
    }

    fn make_block(&self, first: usize, last: usize, has_header: bool) -> YamlBlock {
        YamlBlock {
            span: Span::new(self.lines[first].start, self.lines[last].end),
            line: first as u32 + 1,
            first,
            last,
            has_header,
        }
    }

    fn key_of(&self, i: usize) -> Option<&'a str> {
        let range = self.lines[i].key.clone()?;
        Some(self.text[range].trim_matches(['"', '\'']))
    }

    fn value_of(&self, i: usize) -> Option<&'a str> {
        let line = &self.lines[i];
        let key = line.key.clone()?;
        let rest = self.text[key.end..line.end].trim_start_matches(':').trim();
        let rest = rest.split(" #").next().unwrap_or(rest).trim();
        Some(rest.trim_matches(['"', '\'']))
    }

    /// Block of line `i`: following lines indented deeper than its container.
    fn block_at(&self, i: usize) -> YamlBlock {
        let header = &self.lines[i];
        let container = header.container_indent();
        let mut last = i;
        for j in i + 1..self.lines.len() {
            let line = &self.lines[j];
            if line.blank {
                continue;
            }
            let deeper = line.indent > container && line.dash.map_or(true, |d| d > container);
            // `key:` followed by `- item` at the same column.
            let same_column_list = header.dash.is_none()
                && !header.inline_value
                && line.dash == Some(header.indent);
            if deeper || same_column_list {
                last = j;
            } else {
                break;
            }
        }
        // A list item's first line is part of the item's content.
        self.make_block(i, last, header.dash.is_none())
    }

    fn inner(&self, within: &YamlBlock) -> Range<usize> {
        if within.has_header {
            within.first + 1..within.last + 1
        } else {
            within.first..within.last + 1
        }
    }

    /// Shallowest line under `within` whose key is `key`.
    pub fn child(&self, within: &YamlBlock, key: &str) -> Option<YamlBlock> {
        let mut best: Option<usize> = None;
        for i in self.inner(within) {
            if self.key_of(i) == Some(key) {
                let better = match best {
                    Some(b) => self.lines[i].indent < self.lines[b].indent,
                    None => true,
                };
                if better {
                    best = Some(i);
                }
            }
        }
        best.map(|i| self.block_at(i))
    }

    /// Follows `path` key by key, each step searching below the previous one.
    pub fn block(&self, within: &YamlBlock, path: &[&str]) -> Option<YamlBlock> {
        let mut current = *within;
        for key in path {
            current = self.child(&current, key)?;
        }
        Some(current)
    }

    /// List item under `within` opened by `key: value` (e.g. `- name: api`).
    pub fn list_item(&self, within: &YamlBlock, key: &str, value: &str) -> Option<YamlBlock> {
        for i in self.inner(within) {
            if self.key_of(i) == Some(key) && self.value_of(i) == Some(value) {
                // The item starts at the nearest dash line at or above.
                let indent = self.lines[i].indent;
                let opener = (within.first..=i).rev().find(|&j| {
                    self.lines[j].dash.map(|d| d + 2 <= indent).unwrap_or(false)
                        && self.lines[j].indent == indent
                })?;
                return Some(self.block_at(opener));
            }
        }
        None
    }

    /// Items of the sequence directly under `within`, in order.
    pub fn items(&self, within: &YamlBlock) -> Vec<YamlBlock> {
        let openers: Vec<usize> = self
            .inner(within)
            .filter(|&i| self.lines[i].dash.is_some())
            .collect();
        let Some(column) = openers.iter().filter_map(|&i| self.lines[i].dash).min() else {
            return Vec::new();
        };
        openers
            .into_iter()
            .filter(|&i| self.lines[i].dash == Some(column))
            .map(|i| self.block_at(i))
            .collect()
    }

    /// First whole-token occurrence of `needle` inside `within`.
    pub fn find(&self, within: &YamlBlock, needle: &str) -> Option<(u32, Range<usize>)> {
        find_token(self.text, within.span.start()..within.span.end(), needle)
            .map(|range| (line_of(self.text, range.start), range))
    }

    /// Text of the block.
    pub fn slice(&self, block: &YamlBlock) -> &'a str {
        &self.text[block.span.start()..block.span.end()]
    }
}

fn outline_line(content: &str, start: usize, end: usize) -> OutlineLine {
    let trimmed = content.trim_start();
    let blank = trimmed.is_empty() || trimmed.starts_with('#');
    let mut indent = content.len() - trimmed.len();
    let mut dash = None;
    let mut body = trimmed;
    while let Some(rest) = body.strip_prefix("- ").or_else(|| (body == "-").then_some("")) {
        if dash.is_none() {
            dash = Some(indent);
        }
        let skipped = body.len() - rest.len();
        let rest_trimmed = rest.trim_start();
        indent += skipped + (rest.len() - rest_trimmed.len());
        body = rest_trimmed;
    }

    let key = key_range(body).map(|r| (start + indent + r.start)..(start + indent + r.end));
    let inline_value = key
        .as_ref()
        .map(|k| {
            let after = content[(k.end - start)..].trim_start_matches(':').trim();
            !after.is_empty() && !after.starts_with('#')
        })
        .unwrap_or(!body.is_empty());

    OutlineLine {
        start,
        end,
        indent,
        dash,
        key,
        inline_value,
        blank,
    }
}

fn key_range(body: &str) -> Option<Range<usize>> {
    if body.starts_with('#') || body.starts_with('{') || body.starts_with('[') {
        return None;
    }
    let quoted = body.starts_with('"') || body.starts_with('\'');
    let search_from = if quoted {
        let q = body.chars().next()?;
        body[1..].find(q)? + 2
    } else {
        0
    };
    let colon = body[search_from..].find(':')? + search_from;
    let after = &body[colon + 1..];
    if !(after.is_empty() || after.starts_with(' ') || after.starts_with('\t')) {
        return None;
    }
    if colon == 0 {
        return None;
    }
    Some(0..colon)
}

/// 1-based line containing byte offset `byte`.
pub fn line_of(text: &str, byte: usize) -> u32 {
    let byte = byte.min(text.len());
    text.as_bytes()[..byte].iter().filter(|b| **b == b'\n').count() as u32 + 1
}

/// Span of the line containing `byte`, without its newline.
pub fn line_span(text: &str, byte: usize) -> Span {
    let byte = byte.min(text.len());
    let start = text[..byte].rfind('\n').map(|p| p + 1).unwrap_or(0);
    let end = text[byte..].find('\n').map(|p| byte + p).unwrap_or(text.len());
    Span::new(start, end)
}

/// First occurrence of `needle` in `text[range]` not glued to other
/// alphanumerics on either side.
pub fn find_token(text: &str, range: Range<usize>, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    let hay = &text[range.clone()];
    let mut from = 0;
    while let Some(pos) = hay[from..].find(needle) {
        let abs = range.start + from + pos;
        let end = abs + needle.len();
        let before_ok = text[..abs]
            .chars()
            .last()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        let after_ok = text[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        if before_ok && after_ok {
            return Some(abs..end);
        }
        from += pos + needle.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = "\
version: '3.8'
services:
  users:
    build: ./users
    ports:
    - \"9090:9090\"
    command: python app.py

  gateway:
    depends_on:
      - users
    environment:
      USERS_URL: http://users:9090
";

    #[test]
    fn finds_service_blocks() {
        let outline = YamlOutline::new(COMPOSE);
        let root = outline.root().unwrap();
        let users = outline.block(&root, &["services", "users"]).unwrap();
        assert_eq!(users.line, 3);
        let text = outline.slice(&users);
        assert!(text.starts_with("  users:"));
        assert!(text.ends_with("command: python app.py"));

        let gateway = outline.block(&root, &["services", "gateway"]).unwrap();
        assert!(outline.slice(&gateway).contains("USERS_URL"));
        assert!(!outline.slice(&gateway).contains("9090:9090"));
    }

    #[test]
    fn same_column_lists_stay_in_block() {
        let outline = YamlOutline::new(COMPOSE);
        let root = outline.root().unwrap();
        let ports = outline.block(&root, &["services", "users", "ports"]).unwrap();
        assert!(outline.slice(&ports).contains("9090:9090"));
        let (line, range) = outline.find(&ports, "9090").unwrap();
        assert_eq!(line, 6);
        assert_eq!(&COMPOSE[range], "9090");
    }

    #[test]
    fn splits_documents_and_list_items() {
        let text = "\
kind: Deployment
spec:
  containers:
    - name: api
      command: [\"serve\", \"--port\", \"8080\"]
    - name: sidecar
      command: [\"proxy\"]
---
kind: Service
";
        let outline = YamlOutline::new(text);
        let docs = outline.documents();
        assert_eq!(docs.len(), 2);
        let item = outline.list_item(&docs[0], "name", "sidecar").unwrap();
        assert!(outline.slice(&item).contains("proxy"));
        assert!(!outline.slice(&item).contains("8080"));
        let command = outline.child(&item, "command").unwrap();
        assert_eq!(command.line, 7);
    }

    #[test]
    fn token_search_skips_partial_matches() {
        let text = "port 19090 and 9090";
        let r = find_token(text, 0..text.len(), "9090").unwrap();
        assert_eq!(r, 15..19);
        assert_eq!(line_of("a\nb\nc", 4), 3);
    }
}
