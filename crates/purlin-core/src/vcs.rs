//! Thin git plumbing for lifecycle reconciliation.
//!
//! Only two commands are issued: `git log` to find status commits and
//! `git show` to read a feature as it was at one of them. Every call is
//! bounded by a timeout; callers treat any failure as an empty answer.

use crate::error::VcsError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// A status commit touching one feature: `<unix seconds>|<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCommit {
    pub timestamp: i64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTag {
    /// `[Complete <path>]`
    Complete,
    /// `[Ready for <path>]` or `[Ready for <anything> <path>]`, including
    /// `Ready for Verification`.
    Ready,
}

#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(root: &Path, timeout: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            timeout,
        }
    }

    /// Run `git <args>` in the project root and return trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VcsError::Spawn(e.to_string()))?;

        let child_pid = child.id();

        // Read stdout/stderr in dedicated threads to avoid pipe-buffer deadlocks
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_thread = std::thread::spawn(move || drain(stdout_handle));
        let stderr_thread = std::thread::spawn(move || drain(stderr_handle));

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(child.wait());
        });

        let status = match rx.recv_timeout(self.timeout) {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(VcsError::Failed(format!("wait failed: {e}"))),
            Err(_) => {
                kill_process(child_pid);
                return Err(VcsError::Timeout(self.timeout.as_secs()));
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        if !status.success() {
            return Err(VcsError::Failed(stderr.trim().to_string()));
        }
        Ok(stdout.trim().to_string())
    }

    /// True when the project root sits inside a git work tree.
    pub fn is_repository(&self) -> bool {
        matches!(
            self.run(&["rev-parse", "--is-inside-work-tree"]).as_deref(),
            Ok("true")
        )
    }

    /// Most recent status commit of `tag` for the feature at `rel_path`.
    /// Errors and misses both yield `None`.
    pub fn last_status_commit(&self, tag: StatusTag, rel_path: &str) -> Option<StatusCommit> {
        let result = match tag {
            StatusTag::Complete => {
                let grep = format!("--grep=[Complete {rel_path}]");
                self.run(&["log", "-1", "--fixed-strings", &grep, "--format=%ct|%H"])
            }
            StatusTag::Ready => {
                let grep = format!("--grep={}", ready_pattern(rel_path));
                self.run(&["log", "-1", "--extended-regexp", &grep, "--format=%ct|%H"])
            }
        };
        let out = match result {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(feature = rel_path, error = %e, "git log failed");
                return None;
            }
        };
        parse_status_line(&out)
    }

    /// File content at `hash`, relative to the project root.
    pub fn show(&self, hash: &str, rel_path: &str) -> Option<String> {
        let spec = format!("{hash}:./{rel_path}");
        match self.run(&["show", &spec]) {
            Ok(out) => Some(out),
            Err(e) => {
                tracing::warn!(feature = rel_path, error = %e, "git show failed");
                None
            }
        }
    }
}

fn drain<R: Read>(handle: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = handle {
        let _ = r.read_to_string(&mut buf);
    }
    buf
}

/// Best-effort SIGKILL by PID.
fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

fn parse_status_line(out: &str) -> Option<StatusCommit> {
    let line = out.lines().next()?.trim();
    let (ts, hash) = line.split_once('|')?;
    Some(StatusCommit {
        timestamp: ts.trim().parse().ok()?,
        hash: hash.trim().to_string(),
    })
}

/// ERE for a Ready tag naming `rel_path`; the qualifier is optional.
fn ready_pattern(rel_path: &str) -> String {
    format!(r"\[Ready for ([^]]* )?{}\]", escape_ere(rel_path))
}

fn escape_ere(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if ".[]()*+?{}|^$\\".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
