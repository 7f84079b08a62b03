use purlin_core::paths::PURLIN_DIR;
use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `PURLIN_PROJECT_ROOT` env var (passed in as `explicit`)
/// 2. Nearest ancestor of the cwd holding `.purlin/`
/// 3. Nearest ancestor of the cwd holding `.git`
/// 4. The cwd itself
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_marked_ancestor(&cwd).unwrap_or(cwd)
}

fn find_marked_ancestor(start: &Path) -> Option<PathBuf> {
    let purlin = start.ancestors().find(|d| d.join(PURLIN_DIR).is_dir());
    // `.git` is a file inside linked worktrees.
    let git = || start.ancestors().find(|d| d.join(".git").exists());
    purlin.or_else(git).map(Path::to_path_buf)
}
