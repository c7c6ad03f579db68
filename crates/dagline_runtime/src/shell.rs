//! Task that runs a shell command.

use crate::task::{Task, TaskContext};
use dagline_core::{CoreError, CoreResult};
use std::process::Command;
use tracing::{debug, info};

/// Runs a command through `sh -c` and publishes the last line of its stdout
pub struct ShellTask {
    command: String,
}

impl ShellTask {
    /// Create a task for `command`
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The command line
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Task for ShellTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> CoreResult<()> {
        debug!(task = %ctx.task_id, command = %self.command, "running command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("DAGLINE_PIPELINE", ctx.pipeline_id.as_str())
            .env("DAGLINE_TASK", ctx.task_id.as_str())
            .env("DAGLINE_RUN_ID", ctx.run_id.to_string())
            .output()
            .map_err(|e| CoreError::io(format!("spawn `{}`", self.command), &e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Internal {
                message: format!(
                    "command `{}` exited with {}: {}",
                    self.command,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout.lines().last().unwrap_or_default().to_string();
        info!(task = %ctx.task_id, output = %last_line, "command finished");
        ctx.push(last_line)
    }
}
