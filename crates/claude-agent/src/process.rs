use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::types::QueryOptions;
use crate::{ClaudeAgentError, Result};

// ─── Execution ────────────────────────────────────────────────────────────

/// Run the `claude` binary once with `prompt` on stdin and return its stdout.
///
/// `CLAUDECODE` is removed from the environment so this works both from a
/// terminal and from inside a running Claude session.
pub(crate) async fn execute(prompt: &str, opts: &QueryOptions) -> Result<String> {
    let mut cmd = build_command(opts);
    cmd.env_remove("CLAUDECODE");
    execute_command(cmd, prompt).await
}

/// Spawn `cmd`, feed `input` to its stdin, and collect stdout.
///
/// The child is killed if the returned future is dropped, so an enclosing
/// `tokio::time::timeout` reaps it.
pub(crate) async fn execute_command(mut cmd: Command, input: &str) -> Result<String> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(ClaudeAgentError::Io)?;

    // Write stdin concurrently with draining stdout so a large prompt cannot
    // deadlock against a full stdout pipe.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.as_bytes().to_vec();
        tokio::spawn(async move {
            match stdin.write_all(&input).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        })
    });

    let output = child.wait_with_output().await.map_err(ClaudeAgentError::Io)?;

    if let Some(writer) = writer {
        match writer.await {
            Ok(Err(e)) => return Err(ClaudeAgentError::Io(e)),
            Err(e) => {
                return Err(ClaudeAgentError::Process(format!(
                    "stdin writer task failed: {e}"
                )))
            }
            Ok(Ok(())) => {}
        }
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let msg = match output.status.code() {
            Some(code) if stderr.is_empty() => format!("claude exited with code {code}"),
            Some(code) => format!("claude exited with code {code}\nstderr: {stderr}"),
            None => "claude terminated by signal".to_string(),
        };
        return Err(ClaudeAgentError::Process(msg));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ─── Command builder ──────────────────────────────────────────────────────

fn build_command(opts: &QueryOptions) -> Command {
    let exe = opts.path_to_executable.as_deref().unwrap_or("claude");
    let mut cmd = Command::new(exe);

    cmd.arg("--print").arg("--output-format").arg("json");

    if let Some(model) = &opts.model {
        cmd.arg("--model").arg(model);
    }

    if let Some(max_turns) = opts.max_turns {
        cmd.arg("--max-turns").arg(max_turns.to_string());
    }

    if let Some(sp) = &opts.system_prompt {
        cmd.arg("--system-prompt").arg(sp);
    }

    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }

    // The prompt travels over stdin, never as a positional arg.

    cmd
}
