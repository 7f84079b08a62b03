use crate::error::Result;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::{DirEntry, WalkDir};

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Directory names never descended into while collecting files.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "__pycache__", "target", ".venv"];

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Readers never observe a partially written report or cache entry.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a text file, replacing invalid UTF-8. Returns `None` for binary files.
pub fn read_text_lossy(path: &Path) -> Result<Option<String>> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut bytes)?;
    if is_binary(&bytes) {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// A NUL byte in the leading window marks the content as binary.
fn is_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    window.contains(&0)
}

/// Modification time in whole seconds since the epoch; 0 when unavailable.
pub fn mtime_secs(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Recursively collect regular files below `dir`, sorted for determinism.
/// Hidden directories and well-known build/vendor directories are skipped.
/// Symlinks are not followed.
pub fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));
    walker
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .collect()
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

/// Direct children of `dir` (no recursion), sorted by name.
fn children(dir: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
}

/// Regular files directly inside `dir` (no recursion), sorted.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    children(dir)
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .collect()
}

/// Immediate subdirectories of `dir`, sorted, hidden ones excluded.
pub fn list_dirs(dir: &Path) -> Vec<PathBuf> {
    children(dir)
        .filter(|e| e.file_type().is_dir())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(DirEntry::into_path)
        .collect()
}
