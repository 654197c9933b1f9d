//! Runs a task by handing its prompt to a shell command.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use cadence_tasks::{ScheduledTask, TaskRunner};

/// How much of stderr to keep in a failure message.
const STDERR_TAIL_CHARS: usize = 2000;

/// A [`TaskRunner`] that runs `sh -c <command>` per execution.
///
/// The prompt is written to the child's stdin. The child sees
/// `CADENCE_TASK_ID`, `CADENCE_TASK_NAME` and `CADENCE_SESSION_ID` in its
/// environment. On success the first non-empty stdout line becomes the
/// session ID; otherwise the generated `CADENCE_SESSION_ID` is used.
pub struct CommandRunner {
    command: String,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
        }
    }

    /// Kill the child and fail the run after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn submit(&self, task: &ScheduledTask) -> Result<String, String> {
        let session_id = Uuid::new_v4().to_string();

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("CADENCE_TASK_ID", task.id.as_str())
            .env("CADENCE_TASK_NAME", &task.name)
            .env("CADENCE_SESSION_ID", &session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(task_id = %task.id, command = %self.command, "spawning task command");

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn command: {e}"))?;

        // Feed stdin from its own task so a child that never reads it, or
        // that fills its stdout first, cannot stall us past the timeout.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = task.prompt.clone().into_bytes();
            tokio::spawn(async move {
                // A command that ignores its input may exit before reading it.
                if let Err(e) = stdin.write_all(&prompt).await {
                    debug!(error = %e, "command closed stdin early");
                }
            })
        });

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| format!("command timed out after {}s", limit.as_secs_f64())),
            None => Ok(child.wait_with_output().await),
        };
        if let Some(writer) = writer {
            writer.abort();
        }
        let output = waited?.map_err(|e| format!("failed to wait for command: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                task_id = %task.id,
                exit_code = ?output.status.code(),
                "task command failed"
            );
            let status = match output.status.code() {
                Some(code) => format!("command exited with status {code}"),
                None => "command terminated by signal".to_string(),
            };
            let tail = stderr_tail(&stderr);
            return Err(if tail.is_empty() {
                status
            } else {
                format!("{status}: {tail}")
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or(session_id))
    }
}

/// The last [`STDERR_TAIL_CHARS`] characters of `stderr`, trimmed.
fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed;
    }
    let skip = count - STDERR_TAIL_CHARS;
    match trimmed.char_indices().nth(skip) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}
