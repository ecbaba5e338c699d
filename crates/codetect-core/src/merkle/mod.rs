//! Content-addressed Merkle tree over a working directory.
//!
//! Change detection between indexing runs: build a tree of the current
//! working tree, diff it against the persisted tree, and re-index only the
//! paths in the resulting change set. Equal root hashes short-circuit the
//! diff in constant time.
//!
//! The tree is persisted as one JSON document per repository at
//! `.codetect/merkle-tree.json`, written atomically (temp file + rename)
//! with one prior copy kept as `.backup`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CodetectError, CodetectResult};
use crate::types::now_epoch;

/// File name of the persisted tree inside the data directory.
pub const TREE_FILE_NAME: &str = "merkle-tree.json";

/// Directories never descended into, regardless of ignore files.
pub const DENY_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    ".next",
    ".cache",
    "vendor",
];

/// Hidden entries that are still included despite the hidden-file rule.
const HIDDEN_ALLOWLIST: &[&str] = &[".gitignore", ".gitattributes", ".editorconfig"];

/// One node in the tree: a file or a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleNode {
    /// Path relative to the repository root (empty for the root itself).
    pub path: String,
    /// SHA-256 hex: file bytes for files, concatenated child hashes for
    /// directories.
    pub hash: String,
    /// Whether this node is a directory.
    pub is_dir: bool,
    /// File size in bytes (0 for directories).
    pub size: u64,
    /// Modification time as Unix seconds (0 when unavailable).
    pub mtime: i64,
    /// Children sorted by path. Empty for files.
    #[serde(default)]
    pub children: Vec<MerkleNode>,
}

/// A built tree plus its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    /// Root directory node.
    pub root: MerkleNode,
    /// Absolute repository root the tree was built from.
    pub repo_path: String,
    /// Unix seconds when the tree was built.
    pub build_time: i64,
    /// Number of file nodes in the tree.
    pub file_count: usize,
}

/// Paths that differ between two trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Present only in the new tree.
    pub added: Vec<String>,
    /// Present in both with differing hashes.
    pub modified: Vec<String>,
    /// Present only in the old tree.
    pub deleted: Vec<String>,
}

impl ChangeSet {
    /// True when no path changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

impl MerkleTree {
    /// Build a tree for the repository root.
    ///
    /// `included` lists the file paths (relative, sorted or not) that
    /// survive ignore filtering; the walker in the indexer produces it.
    /// File contents are hashed in parallel, then the directory structure
    /// is assembled bottom-up so directory hashes are deterministic for
    /// identical content.
    pub fn build(repo_root: &Path, included: &[PathBuf]) -> CodetectResult<Self> {
        // Hash files in parallel. Unreadable files are skipped with a
        // warning; the tree still advances.
        let mut hashed: Vec<(String, String, u64, i64)> = included
            .par_iter()
            .filter_map(|rel| {
                let abs = repo_root.join(rel);
                let bytes = match std::fs::read(&abs) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(path = %abs.display(), error = %e, "skipping unreadable file");
                        return None;
                    }
                };
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let hash = hex::encode(hasher.finalize());
                let mtime = std::fs::metadata(&abs)
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map_or(0, |d| {
                        #[allow(clippy::cast_possible_wrap)]
                        {
                            d.as_secs() as i64
                        }
                    });
                Some((
                    rel.to_string_lossy().replace('\\', "/"),
                    hash,
                    bytes.len() as u64,
                    mtime,
                ))
            })
            .collect();
        hashed.sort_by(|a, b| a.0.cmp(&b.0));

        let file_count = hashed.len();
        let root = assemble_root(&hashed);

        Ok(Self {
            root,
            repo_path: repo_root.to_string_lossy().into_owned(),
            build_time: now_epoch(),
            file_count,
        })
    }

    /// Root hash of the tree.
    pub fn root_hash(&self) -> &str {
        &self.root.hash
    }

    /// Flat `path -> hash` map over file nodes only.
    pub fn file_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        collect_files(&self.root, &mut map);
        map
    }

    /// Persist the tree atomically at `path` (temp file + rename).
    pub fn save(&self, path: &Path) -> CodetectResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Persist the tree, first renaming any existing file to `*.backup`.
    pub fn save_with_backup(&self, path: &Path) -> CodetectResult<()> {
        if path.exists() {
            let backup = path.with_extension("json.backup");
            std::fs::rename(path, &backup)?;
        }
        self.save(path)
    }

    /// Load a persisted tree.
    ///
    /// A missing file is "no prior state" (`Ok(None)`); a file that exists
    /// but cannot be decoded is a fatal error.
    pub fn load(path: &Path) -> CodetectResult<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tree = serde_json::from_slice(&bytes).map_err(|e| CodetectError::CorruptTree {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Some(tree))
    }

    /// Diff two trees into a change set over file nodes.
    ///
    /// Equal root hashes produce an empty set without walking either tree.
    /// Output vectors are sorted for determinism.
    pub fn diff(old: &Self, new: &Self) -> ChangeSet {
        if old.root.hash == new.root.hash {
            return ChangeSet::default();
        }

        let old_files = old.file_map();
        let new_files = new.file_map();
        let mut changes = ChangeSet::default();

        for (path, hash) in &new_files {
            match old_files.get(path) {
                None => changes.added.push(path.clone()),
                Some(old_hash) if old_hash != hash => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in old_files.keys() {
            if !new_files.contains_key(path) {
                changes.deleted.push(path.clone());
            }
        }

        // BTreeMap iteration is already ordered; keep the invariant explicit.
        changes.added.sort();
        changes.modified.sort();
        changes.deleted.sort();
        changes
    }
}

/// Whether a directory entry should be descended into / included, before
/// gitignore rules are applied.
pub fn is_walkable(name: &str, is_dir: bool) -> bool {
    if is_dir && DENY_DIRS.contains(&name) {
        return false;
    }
    if name.starts_with('.') {
        return !is_dir && HIDDEN_ALLOWLIST.contains(&name);
    }
    true
}

/// Assemble the directory structure bottom-up from sorted `(path, hash,
/// size, mtime)` file tuples. Directories with no included files are never
/// materialized.
fn assemble_root(files: &[(String, String, u64, i64)]) -> MerkleNode {
    // Group files under their top-level component, recursing per directory.
    fn build_dir(prefix: &str, files: &[(String, String, u64, i64)]) -> MerkleNode {
        let mut children: Vec<MerkleNode> = Vec::new();
        let mut idx = 0;
        while idx < files.len() {
            let rel = &files[idx].0[prefix.len()..];
            if let Some(sep) = rel.find('/') {
                // Subdirectory: take the run of entries sharing this component.
                let dir_name = &rel[..sep];
                let child_prefix = format!("{prefix}{dir_name}/");
                let start = idx;
                while idx < files.len() && files[idx].0.starts_with(&child_prefix) {
                    idx += 1;
                }
                children.push(build_dir(&child_prefix, &files[start..idx]));
            } else {
                let (path, hash, size, mtime) = &files[idx];
                children.push(MerkleNode {
                    path: path.clone(),
                    hash: hash.clone(),
                    is_dir: false,
                    size: *size,
                    mtime: *mtime,
                    children: Vec::new(),
                });
                idx += 1;
            }
        }

        // Children arrive sorted by path; the directory hash is the digest
        // of their hashes concatenated in that order.
        let mut hasher = Sha256::new();
        for child in &children {
            hasher.update(child.hash.as_bytes());
        }
        MerkleNode {
            path: prefix.trim_end_matches('/').to_string(),
            hash: hex::encode(hasher.finalize()),
            is_dir: true,
            size: 0,
            mtime: 0,
            children,
        }
    }

    build_dir("", files)
}

fn collect_files(node: &MerkleNode, map: &mut BTreeMap<String, String>) {
    if node.is_dir {
        for child in &node.children {
            collect_files(child, map);
        }
    } else {
        map.insert(node.path.clone(), node.hash.clone());
    }
}
