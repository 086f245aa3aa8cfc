//! Directory scanning for convertible media files.
//!
//! Provides a recursive scan used when a directory is first added and a
//! shallow scan used when a watched directory reports a change.

use std::fs;
use std::path::{Path, PathBuf};

/// Normalize a configured extension list: lowercase, leading dots stripped.
pub fn normalize_extensions(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Checks if a file has an allowed extension (case-insensitive).
///
/// `extensions` must already be normalized via [`normalize_extensions`].
pub fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            extensions.iter().any(|e| e == &lower)
        })
        .unwrap_or(false)
}

/// Recursively scans a directory for files with allowed extensions.
///
/// Every reachable subdirectory is visited, hidden ones included; the only
/// intake filter is the extension set.
pub fn scan_recursive(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    use walkdir::WalkDir;

    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .filter(|path| has_allowed_extension(path, extensions))
        .collect()
}

/// Shallow (non-recursive) scan of a single directory.
///
/// Used by the reactive watch path: change notifications may fire for
/// writes and completions as well as true additions, so callers rely on
/// registry dedup to stay idempotent.
pub fn scan_shallow(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    entries
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| has_allowed_extension(path, extensions))
        .collect()
}
