//! Literal (regex) signal backed by an external search subprocess.
//!
//! The subprocess emits one UTF-8 line per match in the form
//! `path:line:text` with paths relative to the search root; ranks follow
//! emission order. The default binary is ripgrep invoked with
//! `--line-number --no-heading`.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{CodetectError, CodetectResult};
use crate::types::SignalHit;

/// Runs the external literal search binary and parses its match stream.
pub struct LiteralSearch {
    binary: String,
}

impl LiteralSearch {
    /// Create a searcher around the configured binary name.
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    /// Search `repo_root` for `query`, returning up to `limit` hits in
    /// emission order.
    pub fn search(&self, repo_root: &Path, query: &str, limit: usize) -> CodetectResult<Vec<SignalHit>> {
        let mut child = Command::new(&self.binary)
            .current_dir(repo_root)
            .args(["--line-number", "--no-heading", "--color", "never", "-e"])
            .arg(query)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| CodetectError::Internal(format!(
                "literal search binary '{}' failed to start: {e}",
                self.binary
            )))?;

        let mut hits = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if let Some(hit) = parse_match_line(&line, hits.len() + 1) {
                    hits.push(hit);
                }
                if hits.len() >= limit {
                    break;
                }
            }
        }

        // The stream may still be open when the limit is hit.
        let _ = child.kill();
        let _ = child.wait();
        Ok(hits)
    }
}

/// Parse one `path:line:text` record. Malformed lines are dropped.
#[allow(clippy::cast_precision_loss)]
fn parse_match_line(line: &str, rank: usize) -> Option<SignalHit> {
    let mut parts = line.splitn(3, ':');
    let path = parts.next()?.trim();
    let line_no: u32 = parts.next()?.trim().parse().ok()?;
    let text = parts.next()?.trim();
    if path.is_empty() || line_no == 0 {
        return None;
    }
    Some(SignalHit {
        id: format!("{path}:{line_no}"),
        path: path.replace('\\', "/"),
        start_line: line_no,
        end_line: line_no,
        score: 1.0 / rank as f64,
        preview: truncate_preview(text),
    })
}

fn truncate_preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut cut = MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_match_line() {
        let hit = parse_match_line("src/main.rs:42:    let x = parse();", 1).expect("parse");
        assert_eq!(hit.id, "src/main.rs:42");
        assert_eq!(hit.path, "src/main.rs");
        assert_eq!(hit.start_line, 42);
        assert_eq!(hit.preview, "let x = parse();");
        assert!((hit.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_match_line_keeps_colons_in_text() {
        let hit = parse_match_line("a.go:7:url := \"http://x:8080\"", 2).expect("parse");
        assert_eq!(hit.start_line, 7);
        assert_eq!(hit.preview, "url := \"http://x:8080\"");
        assert!((hit.score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_match_line_rejects_malformed() {
        assert!(parse_match_line("no-line-number", 1).is_none());
        assert!(parse_match_line("path:notanumber:text", 1).is_none());
        assert!(parse_match_line("", 1).is_none());
    }

    #[test]
    fn test_missing_binary_is_an_error() {
        let search = LiteralSearch::new("definitely-not-a-real-binary-name");
        let result = search.search(Path::new("/tmp"), "query", 10);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncate_preview() {
        let short = truncate_preview("short");
        assert_eq!(short, "short");
        let long = truncate_preview(&"x".repeat(500));
        assert!(long.len() <= 204);
        assert!(long.ends_with("..."));
    }
}
