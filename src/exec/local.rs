use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{CommandResult, Shell};
use crate::error::{Result, StressError};

/// Runs commands on this machine through `sh -c`.
pub struct LocalShell {
    use_sudo: bool,
    label: String,
}

impl LocalShell {
    /// `use_sudo` prefixes every command with `sudo -n` (non-interactive).
    pub fn new(use_sudo: bool) -> Self {
        Self {
            use_sudo,
            label: "localhost".to_string(),
        }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.args(["-n", "sh", "-c", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Shell for LocalShell {
    fn label(&self) -> &str {
        &self.label
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandResult> {
        info!(%command, "running command on host");

        let output = match tokio::time::timeout(timeout, self.command(command).output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(StressError::CommandTimeout {
                    command: command.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        };

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );
        // Killed by a signal: no code.
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(%command, exit_code, lines = lines.len(), "host command finished");

        Ok(CommandResult::new(lines, exit_code))
    }
}
