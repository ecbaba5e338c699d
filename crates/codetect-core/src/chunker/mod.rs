//! Syntactic chunker.
//!
//! Splits source files into embedding-sized chunks at AST boundaries using
//! per-language split-node lists, fills uncovered line ranges with `gap`
//! chunks (imports, package declarations, top-level code), and falls back
//! to overlapping line windows for unsupported languages.
//!
//! ## Contract
//!
//! Chunk line ranges need not partition the file, but no two non-gap
//! chunks overlap: an oversized split node is replaced by its inner split
//! nodes rather than emitted alongside them. Gap chunks cover only ranges
//! left uncovered by split nodes.

#![allow(clippy::cast_possible_truncation)]

pub mod languages;

use std::path::Path;

use crate::error::CodetectResult;
use crate::types::{content_hash, Chunk, Language};

use languages::LanguageSpec;

/// Window size for the unsupported-language fallback.
pub const FALLBACK_WINDOW_LINES: usize = 50;
/// Overlap between consecutive fallback windows.
pub const FALLBACK_OVERLAP_LINES: usize = 10;
/// Minimum run of uncovered lines that becomes a gap chunk.
pub const MIN_GAP_LINES: usize = 3;

/// Chunk one source file.
///
/// `rel_path` is the path recorded on each chunk, relative to the repo
/// root. Unsupported extensions and unparseable input take the
/// line-window fallback.
pub fn chunk_file(rel_path: &Path, content: &str) -> CodetectResult<Vec<Chunk>> {
    let ext = rel_path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let language = Language::from_extension(ext);

    let Some(spec) = languages::spec_for(language) else {
        return Ok(chunk_fallback(rel_path, content));
    };
    let Some(grammar) = languages::grammar_for(language) else {
        return Ok(chunk_fallback(rel_path, content));
    };

    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&grammar).is_err() {
        tracing::warn!(path = %rel_path.display(), language = %language, "grammar rejected, using fallback");
        return Ok(chunk_fallback(rel_path, content));
    }

    let Some(tree) = parser.parse(content, None) else {
        tracing::warn!(path = %rel_path.display(), "tree-sitter returned no tree, using fallback");
        return Ok(chunk_fallback(rel_path, content));
    };

    let lines = LineTable::new(content);
    let mut builder = AstChunker {
        rel_path,
        content,
        spec,
        language,
        covered: vec![false; lines.line_count()],
        chunks: Vec::new(),
    };
    builder.walk(tree.root_node());
    let mut chunks = builder.chunks;

    emit_gap_chunks(rel_path, content, &lines, &builder.covered, &mut chunks);

    chunks.sort_by(|a, b| {
        (a.start_line, a.start_byte).cmp(&(b.start_line, b.start_byte))
    });
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// AST walk
// ---------------------------------------------------------------------------

struct AstChunker<'a> {
    rel_path: &'a Path,
    content: &'a str,
    spec: &'static LanguageSpec,
    language: Language,
    /// Per-line (0-indexed) coverage by split nodes.
    covered: Vec<bool>,
    chunks: Vec<Chunk>,
}

impl AstChunker<'_> {
    /// Depth-first walk emitting chunks at split nodes.
    fn walk(&mut self, node: tree_sitter::Node<'_>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if self.spec.split_nodes.contains(&child.kind()) {
                self.emit_split(child);
            } else {
                self.walk(child);
            }
        }
    }

    /// Emit one split node, recursing instead when it exceeds the
    /// language's maximum chunk size and contains inner split nodes.
    fn emit_split(&mut self, node: tree_sitter::Node<'_>) {
        let (start_line, end_line) = node_lines(&node);
        self.mark_covered(start_line, end_line);

        let source = self.content;
        let content = &source[node.start_byte()..node.end_byte()];
        if content.len() > self.spec.max_chunk_size {
            let before = self.chunks.len();
            self.walk(node);
            if self.chunks.len() > before {
                // Inner split nodes took over; the oversized outer chunk
                // is dropped to keep non-gap chunks non-overlapping.
                return;
            }
        }

        self.chunks.push(Chunk {
            path: self.rel_path.to_path_buf(),
            start_line,
            end_line,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            content: content.to_string(),
            content_hash: content_hash(content),
            node_type: node.kind().to_string(),
            node_name: self.extract_name(node),
            language: self.language,
        });
    }

    fn mark_covered(&mut self, start_line: u32, end_line: u32) {
        for line in start_line..=end_line {
            let idx = (line - 1) as usize;
            if idx < self.covered.len() {
                self.covered[idx] = true;
            }
        }
    }

    /// Try each configured name field; for nodes whose field holds a
    /// nested declarator (C/C++), descend until an identifier is found.
    fn extract_name(&self, node: tree_sitter::Node<'_>) -> Option<String> {
        for field in self.spec.name_fields {
            if let Some(named) = node.child_by_field_name(field) {
                if let Some(name) = identifier_text(named, self.content) {
                    return Some(name);
                }
            }
        }
        None
    }
}

/// Dig an identifier out of a name-field node, handling wrapped
/// declarators such as `pointer_declarator -> function_declarator ->
/// identifier`.
fn identifier_text(node: tree_sitter::Node<'_>, source: &str) -> Option<String> {
    if node.child_count() == 0 {
        let text = &source[node.start_byte()..node.end_byte()];
        return (!text.is_empty()).then(|| text.to_string());
    }
    if let Some(inner) = node.child_by_field_name("declarator") {
        return identifier_text(inner, source);
    }
    if let Some(inner) = node.child_by_field_name("name") {
        return identifier_text(inner, source);
    }
    // Fall back to the node's own text for short names.
    let text = &source[node.start_byte()..node.end_byte()];
    (!text.is_empty() && text.len() <= 128).then(|| text.to_string())
}

/// 1-indexed inclusive line span of a node, accounting for end positions
/// that sit at column 0 of the following line.
fn node_lines(node: &tree_sitter::Node<'_>) -> (u32, u32) {
    let start = node.start_position();
    let end = node.end_position();
    let start_line = start.row as u32 + 1;
    let mut end_line = end.row as u32 + 1;
    if end.column == 0 && end.row > start.row {
        end_line -= 1;
    }
    (start_line, end_line)
}

// ---------------------------------------------------------------------------
// Gap filling
// ---------------------------------------------------------------------------

/// Byte offsets of line starts, for slicing line ranges out of the file.
struct LineTable {
    /// `offsets[i]` is the byte offset where 0-indexed line `i` starts.
    offsets: Vec<usize>,
    total_len: usize,
}

impl LineTable {
    fn new(content: &str) -> Self {
        let mut offsets = vec![0];
        for (idx, b) in content.bytes().enumerate() {
            if b == b'\n' && idx + 1 < content.len() {
                offsets.push(idx + 1);
            }
        }
        Self {
            offsets,
            total_len: content.len(),
        }
    }

    fn line_count(&self) -> usize {
        if self.total_len == 0 {
            0
        } else {
            self.offsets.len()
        }
    }

    /// Byte range of 0-indexed lines `[start, end]` inclusive, including
    /// the trailing newline of the last line when present.
    fn byte_range(&self, start: usize, end: usize) -> (usize, usize) {
        let start_byte = self.offsets[start];
        let end_byte = if end + 1 < self.offsets.len() {
            self.offsets[end + 1]
        } else {
            self.total_len
        };
        (start_byte, end_byte)
    }
}

/// Emit `gap` chunks for contiguous uncovered line runs of at least
/// [`MIN_GAP_LINES`]. Whitespace-only runs are ignored.
fn emit_gap_chunks(
    rel_path: &Path,
    content: &str,
    lines: &LineTable,
    covered: &[bool],
    chunks: &mut Vec<Chunk>,
) {
    let ext = rel_path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let language = Language::from_extension(ext);

    let mut run_start: Option<usize> = None;
    for idx in 0..=covered.len() {
        let uncovered = idx < covered.len() && !covered[idx];
        match (uncovered, run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                push_gap(rel_path, content, lines, language, start, idx - 1, chunks);
                run_start = None;
            }
            _ => {}
        }
    }
}

fn push_gap(
    rel_path: &Path,
    content: &str,
    lines: &LineTable,
    language: Language,
    start: usize,
    end: usize,
    chunks: &mut Vec<Chunk>,
) {
    if end - start + 1 < MIN_GAP_LINES {
        return;
    }
    let (start_byte, end_byte) = lines.byte_range(start, end);
    let gap_content = &content[start_byte..end_byte];
    if gap_content.trim().is_empty() {
        return;
    }
    chunks.push(Chunk {
        path: rel_path.to_path_buf(),
        start_line: start as u32 + 1,
        end_line: end as u32 + 1,
        start_byte,
        end_byte,
        content: gap_content.to_string(),
        content_hash: content_hash(gap_content),
        node_type: "gap".to_string(),
        node_name: None,
        language,
    });
}

// ---------------------------------------------------------------------------
// Line-window fallback
// ---------------------------------------------------------------------------

/// Overlapping line windows for unsupported languages, tagged `block`.
fn chunk_fallback(rel_path: &Path, content: &str) -> Vec<Chunk> {
    let lines = LineTable::new(content);
    let line_count = lines.line_count();
    if line_count == 0 {
        return Vec::new();
    }

    let step = FALLBACK_WINDOW_LINES - FALLBACK_OVERLAP_LINES;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + FALLBACK_WINDOW_LINES - 1).min(line_count - 1);
        let (start_byte, end_byte) = lines.byte_range(start, end);
        let window = &content[start_byte..end_byte];
        if !window.trim().is_empty() {
            chunks.push(Chunk {
                path: rel_path.to_path_buf(),
                start_line: start as u32 + 1,
                end_line: end as u32 + 1,
                start_byte,
                end_byte,
                content: window.to_string(),
                content_hash: content_hash(window),
                node_type: "block".to_string(),
                node_name: None,
                language: Language::Unknown,
            });
        }
        if end + 1 >= line_count {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUST_SOURCE: &str = r#"use std::collections::HashMap;
use std::path::PathBuf;

const LIMIT: usize = 10;

fn first() -> usize {
    LIMIT
}

fn second(map: &HashMap<String, PathBuf>) -> usize {
    map.len()
}
"#;

    #[test]
    fn test_rust_functions_become_chunks() {
        let chunks = chunk_file(Path::new("src/lib.rs"), RUST_SOURCE).expect("chunk");
        let functions: Vec<_> = chunks
            .iter()
            .filter(|c| c.node_type == "function_item")
            .collect();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].node_name.as_deref(), Some("first"));
        assert_eq!(functions[1].node_name.as_deref(), Some("second"));
        assert_eq!(functions[0].start_line, 6);
        assert_eq!(functions[0].end_line, 8);
    }

    #[test]
    fn test_gap_chunk_covers_imports() {
        let chunks = chunk_file(Path::new("src/lib.rs"), RUST_SOURCE).expect("chunk");
        let gaps: Vec<_> = chunks.iter().filter(|c| c.node_type == "gap").collect();
        assert!(!gaps.is_empty(), "imports should land in a gap chunk");
        assert!(gaps[0].content.contains("use std::collections::HashMap"));
        assert_eq!(gaps[0].start_line, 1);
    }

    #[test]
    fn test_non_gap_chunks_do_not_overlap() {
        let chunks = chunk_file(Path::new("src/lib.rs"), RUST_SOURCE).expect("chunk");
        let mut spans: Vec<(u32, u32)> = chunks
            .iter()
            .filter(|c| c.node_type != "gap")
            .map(|c| (c.start_line, c.end_line))
            .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            assert!(pair[0].1 < pair[1].0, "overlapping non-gap chunks: {pair:?}");
        }
    }

    #[test]
    fn test_chunks_sorted_and_hashed() {
        let chunks = chunk_file(Path::new("src/lib.rs"), RUST_SOURCE).expect("chunk");
        for pair in chunks.windows(2) {
            assert!((pair[0].start_line, pair[0].start_byte) <= (pair[1].start_line, pair[1].start_byte));
        }
        for chunk in &chunks {
            assert_eq!(chunk.content_hash, content_hash(&chunk.content));
        }
    }

    #[test]
    fn test_identical_content_shares_hash_across_files() {
        let a = chunk_file(Path::new("a.py"), "def f():\n    return 1\n").expect("chunk a");
        let b = chunk_file(Path::new("b.py"), "def f():\n    return 1\n").expect("chunk b");
        let ha: Vec<_> = a.iter().map(|c| &c.content_hash).collect();
        let hb: Vec<_> = b.iter().map(|c| &c.content_hash).collect();
        assert_eq!(ha, hb);
    }

    #[test]
    fn test_oversized_class_recurses_into_methods() {
        // A Python class bigger than any reasonable max: many methods.
        let mut source = String::from("class Big:\n");
        for i in 0..400 {
            source.push_str(&format!(
                "    def method_{i}(self):\n        return {i} * 2  # padding padding padding\n"
            ));
        }
        let chunks = chunk_file(Path::new("big.py"), &source).expect("chunk");
        let methods = chunks
            .iter()
            .filter(|c| c.node_type == "function_definition")
            .count();
        assert!(methods > 1, "oversized class should yield method chunks");
        assert!(
            !chunks.iter().any(|c| c.node_type == "class_definition"),
            "oversized outer chunk is replaced by its inner chunks"
        );
    }

    #[test]
    fn test_fallback_windows_for_unknown_language() {
        let source: String = (0..120).map(|i| format!("line number {i}\n")).collect();
        let chunks = chunk_file(Path::new("notes.xyz"), &source).expect("chunk");
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.node_type == "block"));
        assert!(chunks.iter().all(|c| c.language == Language::Unknown));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 50);
        // 10-line overlap between consecutive windows.
        assert_eq!(chunks[1].start_line, 41);
    }

    #[test]
    fn test_empty_file_yields_no_chunks() {
        let chunks = chunk_file(Path::new("empty.rs"), "").expect("chunk");
        assert!(chunks.is_empty());
        let chunks = chunk_file(Path::new("empty.xyz"), "").expect("chunk");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_go_chunks() {
        let source = "package main\n\nimport \"fmt\"\n\nfunc a() {\n\tfmt.Println(\"a\")\n}\n\nfunc b() {\n\tfmt.Println(\"b\")\n}\n";
        let chunks = chunk_file(Path::new("main.go"), source).expect("chunk");
        let funcs: Vec<_> = chunks
            .iter()
            .filter(|c| c.node_type == "function_declaration")
            .collect();
        assert_eq!(funcs.len(), 2);
        assert_eq!(funcs[0].node_name.as_deref(), Some("a"));
        assert!(chunks.iter().any(|c| c.node_type == "gap" && c.content.contains("package main")));
    }
}
