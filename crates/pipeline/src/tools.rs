//! External tool resolution and supervised execution.
//!
//! Tools run under a blocking `child.wait()` inside a `select!` with a
//! hard wall-clock deadline and a cancellation poll, not a busy-wait.
//! A killed or failed tool never escapes as a panic; everything maps to
//! [`PipelineError`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::adapter::{CancelFn, PipelineError};

/// How often a running tool re-checks the cancellation predicate.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cap on captured tool output kept in an error message.
const MAX_TOOL_DETAIL_LEN: usize = 1200;

/// Captured output of a successfully exited tool.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Resolve a tool binary: an explicit override path wins and does not
/// fall back when it is missing (a misconfigured override should stay
/// visible); otherwise the first match on `PATH`.
pub fn resolve_tool(override_path: Option<&str>, binary: &str) -> Option<PathBuf> {
    if let Some(explicit) = override_path.map(str::trim).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(explicit);
        return path.is_file().then_some(path);
    }

    let path_var = std::env::var_os("PATH")?;
    let dirs: Vec<PathBuf> = std::env::split_paths(&path_var).collect();
    search_dirs(&dirs, binary)
}

/// First `dir/binary` that is a regular file.
fn search_dirs(dirs: &[PathBuf], binary: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Run an external tool to completion.
///
/// The child is killed when the deadline elapses or the cancellation
/// predicate fires; stdout/stderr are drained concurrently so a chatty
/// tool cannot deadlock on a full pipe.
pub async fn run_tool(
    mut command: Command,
    tool: &'static str,
    timeout: Duration,
    cancel: &CancelFn,
) -> Result<ToolOutput, PipelineError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| PipelineError::ToolFailed {
        tool,
        detail: format!("failed to spawn: {e}"),
    })?;

    let stdout_task = tokio::spawn(read_to_string(child.stdout.take()));
    let stderr_task = tokio::spawn(read_to_string(child.stderr.take()));

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(CANCEL_POLL_INTERVAL);

    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            _ = &mut deadline => {
                let _ = child.kill().await;
                tracing::warn!(tool, timeout_secs = timeout.as_secs(), "Tool killed on timeout");
                return Err(PipelineError::Timeout {
                    tool,
                    seconds: timeout.as_secs(),
                });
            }
            _ = poll.tick() => {
                if cancel() {
                    let _ = child.kill().await;
                    tracing::info!(tool, "Tool killed on cancellation");
                    return Err(PipelineError::Cancelled);
                }
            }
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        let detail = if stderr.trim().is_empty() {
            &stdout
        } else {
            &stderr
        };
        return Err(PipelineError::ToolFailed {
            tool,
            detail: truncate_detail(detail.trim()),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Verify a tool actually produced a non-empty artifact before trusting
/// it.
pub fn verify_output(path: &Path, what: &str) -> Result<(), PipelineError> {
    let non_empty = std::fs::metadata(path)
        .map(|meta| meta.len() > 0)
        .unwrap_or(false);
    if non_empty {
        Ok(())
    } else {
        Err(PipelineError::MissingOutput(format!(
            "{what} output is missing or empty: {}",
            path.display()
        )))
    }
}

async fn read_to_string<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut buf = String::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_string(&mut buf).await;
    }
    buf
}

fn truncate_detail(detail: &str) -> String {
    if detail.len() <= MAX_TOOL_DETAIL_LEN {
        return detail.to_string();
    }
    let mut end = MAX_TOOL_DETAIL_LEN;
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    detail[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // -- resolve_tool / search_dirs -------------------------------------------

    #[test]
    fn explicit_override_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("IfcConvert");
        std::fs::write(&tool, b"#!/bin/sh\n").unwrap();

        let resolved = resolve_tool(tool.to_str(), "IfcConvert");
        assert_eq!(resolved, Some(tool));
    }

    #[test]
    fn missing_override_does_not_fall_back() {
        let resolved = resolve_tool(Some("/definitely/not/here/IfcConvert"), "sh");
        assert_eq!(resolved, None);
    }

    #[test]
    fn search_dirs_finds_first_match() {
        let empty = tempfile::tempdir().unwrap();
        let hit = tempfile::tempdir().unwrap();
        let tool = hit.path().join("usdzconvert");
        std::fs::write(&tool, b"").unwrap();

        let dirs = vec![empty.path().to_path_buf(), hit.path().to_path_buf()];
        assert_eq!(search_dirs(&dirs, "usdzconvert"), Some(tool));
        assert_eq!(search_dirs(&dirs, "other"), None);
    }

    // -- verify_output --------------------------------------------------------

    #[test]
    fn verify_output_accepts_non_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.glb");
        std::fs::write(&path, b"glTF").unwrap();
        assert!(verify_output(&path, "GLB").is_ok());
    }

    #[test]
    fn verify_output_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.glb");
        assert_matches!(
            verify_output(&missing, "GLB"),
            Err(PipelineError::MissingOutput(_))
        );

        let empty = dir.path().join("empty.glb");
        std::fs::write(&empty, b"").unwrap();
        assert_matches!(
            verify_output(&empty, "GLB"),
            Err(PipelineError::MissingOutput(_))
        );
    }

    // -- run_tool -------------------------------------------------------------

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tool_captures_stdout_on_success() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo converted");
        let cancel = || false;
        let output = run_tool(cmd, "sh", Duration::from_secs(10), &cancel)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "converted");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tool_reports_stderr_on_failure() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo boom >&2; exit 3");
        let cancel = || false;
        let err = run_tool(cmd, "sh", Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert_matches!(err, PipelineError::ToolFailed { detail, .. } if detail.contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tool_kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = || false;
        let started = std::time::Instant::now();
        let err = run_tool(cmd, "sleep", Duration::from_millis(200), &cancel)
            .await
            .unwrap_err();
        assert_matches!(err, PipelineError::Timeout { .. });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tool_kills_on_cancellation() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let cancel = || true;
        let started = std::time::Instant::now();
        let err = run_tool(cmd, "sleep", Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
