//! Lifecycle reconciliation: TODO, TESTING, or COMPLETE from status commits,
//! file mtime, and a discoveries-insensitive content comparison.

use crate::feature::{self, ParsedFeature};
use crate::io;
use crate::types::Lifecycle;
use crate::vcs::{Git, StatusCommit, StatusTag};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleResolution {
    pub lifecycle: Lifecycle,
    pub candidate: Lifecycle,
    pub complete_ts: i64,
    pub test_ts: i64,
    pub file_mtime: i64,
}

/// Resolve the lifecycle of `feature`. Without a repository every status
/// commit is missing and the result is TODO.
pub fn resolve_lifecycle(git: Option<&Git>, root: &Path, feature: &ParsedFeature) -> LifecycleResolution {
    let rel = feature.rel_path.as_str();
    let path = root.join(rel);
    let file_mtime = io::mtime_secs(&path);

    let complete = git.and_then(|g| g.last_status_commit(StatusTag::Complete, rel));
    let ready = git.and_then(|g| g.last_status_commit(StatusTag::Ready, rel));
    let complete_ts = complete.as_ref().map(|c| c.timestamp).unwrap_or(0);
    let test_ts = ready.as_ref().map(|c| c.timestamp).unwrap_or(0);

    let (candidate, commit): (Lifecycle, Option<&StatusCommit>) = if complete_ts > test_ts {
        (Lifecycle::Complete, complete.as_ref())
    } else if test_ts > 0 {
        (Lifecycle::Testing, ready.as_ref())
    } else {
        (Lifecycle::Todo, None)
    };

    let mut lifecycle = candidate;
    if let Some(commit) = commit {
        if file_mtime > commit.timestamp {
            let before = git
                .and_then(|g| g.show(&commit.hash, rel))
                .unwrap_or_default();
            let now = std::fs::read_to_string(&path).unwrap_or_default();
            if !same_above_discoveries(&before, &now) {
                tracing::debug!(feature = rel, from = candidate.as_str(), "spec edited since status commit");
                lifecycle = candidate.downgrade();
            }
        }
    }

    LifecycleResolution {
        lifecycle,
        candidate,
        complete_ts,
        test_ts,
        file_mtime,
    }
}

fn same_above_discoveries(before: &str, now: &str) -> bool {
    feature::strip_discoveries(before).trim() == feature::strip_discoveries(now).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::load_feature;
    use std::process::Command;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const SPEC: &str = "## Overview\nLogin.\n\n## Scenarios\n### Scenario: Logs in\nGiven a user\nWhen they log in\nThen they see home\n\n## User Testing Discoveries\n";

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    fn git(dir: &Path, args: &[&str], date: &str) {
        let status = Command::new("git")
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_DATE", date)
            .env("GIT_COMMITTER_DATE", date)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q"], "2024-01-01T00:00:00Z");
        std::fs::create_dir_all(dir.path().join("features")).unwrap();
        dir
    }

    fn write(dir: &Path, content: &str) {
        let path = dir.join("features/login.md");
        std::fs::write(&path, content).unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();
    }

    fn commit(dir: &Path, message: &str, date: &str) {
        git(dir, &["add", "-A"], date);
        git(dir, &["commit", "-q", "--allow-empty", "-m", message], date);
    }

    fn resolve(dir: &Path) -> LifecycleResolution {
        let g = Git::new(dir, Duration::from_secs(10));
        let f = load_feature(dir, &dir.join("features/login.md")).unwrap();
        resolve_lifecycle(Some(&g), dir, &f)
    }

    #[test]
    fn no_status_commit_is_todo() {
        if !git_available() {
            return;
        }
        let dir = repo();
        write(dir.path(), SPEC);
        commit(dir.path(), "add login spec", "2024-01-01T00:00:00Z");
        let r = resolve(dir.path());
        assert_eq!(r.lifecycle, Lifecycle::Todo);
        assert_eq!(r.complete_ts, 0);
        assert_eq!(r.test_ts, 0);
    }

    #[test]
    fn discoveries_only_edit_preserves_complete() {
        if !git_available() {
            return;
        }
        let dir = repo();
        write(dir.path(), SPEC);
        commit(
            dir.path(),
            "[Complete features/login.md] [Scope: full]",
            "2024-01-01T00:00:00Z",
        );
        write(
            dir.path(),
            &format!("{SPEC}### [BUG] Button misaligned\n- **Status:** OPEN\n"),
        );
        let r = resolve(dir.path());
        assert_eq!(r.candidate, Lifecycle::Complete);
        assert!(r.file_mtime > r.complete_ts);
        assert_eq!(r.lifecycle, Lifecycle::Complete);
    }

    #[test]
    fn spec_edit_downgrades_complete() {
        if !git_available() {
            return;
        }
        let dir = repo();
        write(dir.path(), SPEC);
        commit(
            dir.path(),
            "[Complete features/login.md] [Scope: full]",
            "2024-01-01T00:00:00Z",
        );
        write(dir.path(), &SPEC.replace("Login.", "Login with SSO."));
        let r = resolve(dir.path());
        assert_eq!(r.lifecycle, Lifecycle::Testing);
    }

    #[test]
    fn later_ready_commit_wins_over_earlier_complete() {
        if !git_available() {
            return;
        }
        let dir = repo();
        write(dir.path(), SPEC);
        commit(
            dir.path(),
            "[Complete features/login.md] [Scope: full]",
            "2024-01-01T00:00:00Z",
        );
        commit(
            dir.path(),
            "[Ready for Verification features/login.md] [Scope: targeted]",
            "2024-01-02T00:00:00Z",
        );
        let r = resolve(dir.path());
        assert_eq!(r.candidate, Lifecycle::Testing);
        assert!(r.test_ts > r.complete_ts);
        assert_eq!(r.lifecycle, Lifecycle::Testing);
    }

    #[test]
    fn unqualified_ready_tag_counts_as_testing() {
        if !git_available() {
            return;
        }
        let dir = repo();
        write(dir.path(), SPEC);
        commit(
            dir.path(),
            "[Ready for features/login.md] [Scope: full]",
            "2024-01-01T00:00:00Z",
        );
        let r = resolve(dir.path());
        assert!(r.test_ts > 0);
        assert_eq!(r.lifecycle, Lifecycle::Testing);
    }

    #[test]
    fn status_tags_for_other_features_are_ignored() {
        if !git_available() {
            return;
        }
        let dir = repo();
        write(dir.path(), SPEC);
        commit(
            dir.path(),
            "[Complete features/login_admin.md] [Scope: full]",
            "2024-01-01T00:00:00Z",
        );
        assert_eq!(resolve(dir.path()).lifecycle, Lifecycle::Todo);
    }

    #[test]
    fn without_git_everything_is_todo() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("features")).unwrap();
        std::fs::write(dir.path().join("features/login.md"), SPEC).unwrap();
        let f = load_feature(dir.path(), &dir.path().join("features/login.md")).unwrap();
        assert_eq!(resolve_lifecycle(None, dir.path(), &f).lifecycle, Lifecycle::Todo);
    }
}
