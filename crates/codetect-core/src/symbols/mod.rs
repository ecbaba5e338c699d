//! Symbol index fed by an external extractor subprocess.
//!
//! The extractor (universal-ctags compatible) emits one JSON object per
//! line on stdout; records typed `"tag"` carry `name`, `path`, `kind`,
//! `line` and optional `language` / `scope` / `signature` fields. Records
//! can exceed 1 MiB, so the reader uses a large line buffer. Any other
//! record type is ignored.
//!
//! An absent or failing extractor degrades the symbol signal to empty; it
//! is never fatal to indexing or retrieval.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{CodetectError, CodetectResult};
use crate::storage::{ColumnSpec, ColumnType, Store, Value};
use crate::types::SymbolRecord;

/// Table name for extracted symbols.
const TABLE: &str = "code_symbols";

/// Read buffer for extractor stdout; single records may exceed 1 MiB.
const SCAN_BUFFER: usize = 4 * 1024 * 1024;

/// One line of extractor output. Only `_type == "tag"` lines are kept.
#[derive(Debug, Deserialize)]
struct TagLine {
    #[serde(rename = "_type")]
    record_type: String,
    name: Option<String>,
    path: Option<String>,
    kind: Option<String>,
    line: Option<u32>,
    language: Option<String>,
    scope: Option<String>,
    signature: Option<String>,
}

/// Runs the extractor binary over files and parses its tag stream.
pub struct SymbolExtractor {
    binary: String,
}

impl SymbolExtractor {
    /// Create an extractor around the configured binary name.
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    /// Extract symbols from the given files (paths relative to
    /// `repo_root`). Spawn failures and malformed lines degrade to an
    /// empty result with a warning.
    pub fn extract(&self, repo_root: &Path, files: &[String]) -> Vec<SymbolRecord> {
        if files.is_empty() {
            return Vec::new();
        }

        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(repo_root)
            .arg("--output-format=json")
            .arg("--fields=+nlZ")
            .arg("-f")
            .arg("-")
            .args(files)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(binary = %self.binary, error = %e, "symbol extractor unavailable");
                return Vec::new();
            }
        };

        let Some(stdout) = child.stdout.take() else {
            return Vec::new();
        };
        let reader = BufReader::with_capacity(SCAN_BUFFER, stdout);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "symbol extractor stream error");
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TagLine>(&line) {
                Ok(tag) if tag.record_type == "tag" => {
                    let (Some(name), Some(path)) = (tag.name, tag.path) else {
                        continue;
                    };
                    records.push(SymbolRecord {
                        name,
                        path: path.replace('\\', "/"),
                        kind: tag.kind.unwrap_or_else(|| "unknown".to_string()),
                        line: tag.line.unwrap_or(1),
                        language: tag.language,
                        scope: tag.scope,
                        signature: tag.signature,
                    });
                }
                Ok(_) => {} // ptag / pseudo records
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed extractor record");
                }
            }
        }

        if let Err(e) = child.wait() {
            tracing::warn!(error = %e, "symbol extractor did not exit cleanly");
        }
        records
    }
}

/// SQL-backed symbol index with the lexical lookup the retriever's
/// symbol signal uses.
pub struct SymbolStore {
    store: Arc<dyn Store>,
}

impl SymbolStore {
    /// Open the store, creating the table and its indexes if needed.
    pub fn open(store: Arc<dyn Store>) -> CodetectResult<Self> {
        let dialect = store.dialect();
        let columns = [
            ColumnSpec::new("id", ColumnType::AutoId),
            ColumnSpec::new("repo_root", ColumnType::Text),
            ColumnSpec::new("path", ColumnType::Text),
            ColumnSpec::new("name", ColumnType::Text),
            ColumnSpec::new("kind", ColumnType::Text),
            ColumnSpec::new("line", ColumnType::Integer),
            ColumnSpec::nullable("language", ColumnType::Text),
            ColumnSpec::nullable("scope", ColumnType::Text),
            ColumnSpec::nullable("signature", ColumnType::Text),
        ];
        store.execute(&dialect.create_table(TABLE, &columns), &[])?;
        store.execute(
            &dialect.create_index(TABLE, "idx_symbols_repo_path", &["repo_root", "path"], false),
            &[],
        )?;
        store.execute(
            &dialect.create_index(TABLE, "idx_symbols_name", &["repo_root", "name"], false),
            &[],
        )?;
        Ok(Self { store })
    }

    /// Replace the symbols of each touched path with the new records, in
    /// one transaction per call.
    pub fn replace_for_paths(
        &self,
        repo_root: &str,
        paths: &[String],
        records: &[SymbolRecord],
    ) -> CodetectResult<()> {
        let mut statements: Vec<(String, Vec<Value>)> = Vec::new();
        for path in paths {
            statements.push((
                format!("DELETE FROM {TABLE} WHERE repo_root = ? AND path = ?"),
                vec![Value::from(repo_root), Value::from(path.clone())],
            ));
        }
        let insert = format!(
            "INSERT INTO {TABLE} (repo_root, path, name, kind, line, language, scope, signature) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        for record in records {
            statements.push((
                insert.clone(),
                vec![
                    Value::from(repo_root),
                    Value::from(record.path.clone()),
                    Value::from(record.name.clone()),
                    Value::from(record.kind.clone()),
                    Value::Integer(i64::from(record.line)),
                    Value::from(record.language.clone()),
                    Value::from(record.scope.clone()),
                    Value::from(record.signature.clone()),
                ],
            ));
        }
        if statements.is_empty() {
            return Ok(());
        }
        self.store.execute_transaction(&statements)
    }

    /// Delete symbols for one path.
    pub fn delete_by_path(&self, repo_root: &str, path: &str) -> CodetectResult<u64> {
        self.store.execute(
            &format!("DELETE FROM {TABLE} WHERE repo_root = ? AND path = ?"),
            &[Value::from(repo_root), Value::from(path)],
        )
    }

    /// Delete all symbols for a repo.
    pub fn delete_by_repo(&self, repo_root: &str) -> CodetectResult<u64> {
        self.store.execute(
            &format!("DELETE FROM {TABLE} WHERE repo_root = ?"),
            &[Value::from(repo_root)],
        )
    }

    /// Lexical lookup: names containing `query`, case-insensitive, up to
    /// `limit` rows.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn search(&self, repo_root: &str, query: &str, limit: usize) -> CodetectResult<Vec<SymbolRecord>> {
        let pattern = format!("%{}%", escape_like(query));
        let sql = format!(
            "SELECT name, path, kind, line, language, scope, signature FROM {TABLE} \
             WHERE repo_root = ? AND LOWER(name) LIKE LOWER(?) ESCAPE '\\' \
             ORDER BY LENGTH(name), name, path, line LIMIT ?"
        );
        #[allow(clippy::cast_possible_wrap)]
        let rows = self.store.query(
            &sql,
            &[
                Value::from(repo_root),
                Value::from(pattern),
                Value::Integer(limit as i64),
            ],
        )?;
        rows.iter()
            .map(|row| {
                Ok(SymbolRecord {
                    name: row.get_string(0)?,
                    path: row.get_string(1)?,
                    kind: row.get_string(2)?,
                    line: row.get_i64(3)? as u32,
                    language: row.get_opt_string(4)?,
                    scope: row.get_opt_string(5)?,
                    signature: row.get_opt_string(6)?,
                })
            })
            .collect::<CodetectResult<Vec<_>>>()
            .map_err(|e| CodetectError::Database(format!("symbol search: {e}")))
    }

    /// Number of symbols indexed for a repo.
    #[allow(clippy::cast_sign_loss)]
    pub fn count(&self, repo_root: &str) -> CodetectResult<usize> {
        let row = self.store.query_one(
            &format!("SELECT COUNT(*) FROM {TABLE} WHERE repo_root = ?"),
            &[Value::from(repo_root)],
        )?;
        Ok(row.map_or(0, |r| r.get_i64(0).unwrap_or(0) as usize))
    }
}

/// Escape LIKE wildcard characters (`%`, `_`, `\`) in user input.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;

    fn test_symbols() -> SymbolStore {
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open_in_memory().expect("open in-memory store"));
        SymbolStore::open(store).expect("open symbol store")
    }

    fn record(name: &str, path: &str, line: u32) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            path: path.to_string(),
            kind: "function".to_string(),
            line,
            language: Some("Go".to_string()),
            scope: None,
            signature: None,
        }
    }

    #[test]
    fn test_replace_and_search() {
        let symbols = test_symbols();
        symbols
            .replace_for_paths(
                "/repo",
                &["a.go".into()],
                &[record("ParseConfig", "a.go", 10), record("parseFlags", "a.go", 30)],
            )
            .expect("replace");

        let hits = symbols.search("/repo", "parse", 10).expect("search");
        assert_eq!(hits.len(), 2);
        // Case-insensitive containment.
        let hits = symbols.search("/repo", "PARSEC", 10).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "ParseConfig");
    }

    #[test]
    fn test_replace_clears_stale_symbols() {
        let symbols = test_symbols();
        symbols
            .replace_for_paths("/repo", &["a.go".into()], &[record("old", "a.go", 1)])
            .expect("replace");
        symbols
            .replace_for_paths("/repo", &["a.go".into()], &[record("new", "a.go", 1)])
            .expect("replace again");

        assert!(symbols.search("/repo", "old", 10).expect("search").is_empty());
        assert_eq!(symbols.search("/repo", "new", 10).expect("search").len(), 1);
        assert_eq!(symbols.count("/repo").expect("count"), 1);
    }

    #[test]
    fn test_like_wildcards_are_escaped() {
        let symbols = test_symbols();
        symbols
            .replace_for_paths(
                "/repo",
                &["a.rs".into()],
                &[record("snake_case", "a.rs", 1), record("snakeXcase", "a.rs", 2)],
            )
            .expect("replace");

        let hits = symbols.search("/repo", "snake_", 10).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "snake_case");
    }

    #[test]
    fn test_search_respects_limit_and_repo() {
        let symbols = test_symbols();
        symbols
            .replace_for_paths(
                "/repo",
                &["a.rs".into()],
                &[record("fn_a", "a.rs", 1), record("fn_b", "a.rs", 2), record("fn_c", "a.rs", 3)],
            )
            .expect("replace");

        assert_eq!(symbols.search("/repo", "fn", 2).expect("search").len(), 2);
        assert!(symbols.search("/other", "fn", 10).expect("search").is_empty());
    }

    #[test]
    fn test_missing_extractor_binary_degrades_to_empty() {
        let extractor = SymbolExtractor::new("definitely-not-a-real-binary-name");
        let records = extractor.extract(Path::new("/tmp"), &["a.go".to_string()]);
        assert!(records.is_empty());
    }

    #[test]
    fn test_tag_line_parsing_shape() {
        let line = r#"{"_type":"tag","name":"main","path":"cmd/main.go","pattern":"/^func main() {$/","kind":"func","line":12,"language":"Go"}"#;
        let tag: TagLine = serde_json::from_str(line).expect("parse tag");
        assert_eq!(tag.record_type, "tag");
        assert_eq!(tag.name.as_deref(), Some("main"));
        assert_eq!(tag.line, Some(12));

        let ptag = r#"{"_type":"ptag","name":"JSON_OUTPUT_VERSION","path":"1.0"}"#;
        let tag: TagLine = serde_json::from_str(ptag).expect("parse ptag");
        assert_ne!(tag.record_type, "tag");
    }
}
