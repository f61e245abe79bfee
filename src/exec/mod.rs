//! Command execution on the host and the peer.
//!
//! Both sides are driven through the [`Shell`] trait so that every harness
//! step is written once and bound to a local subprocess runner or to the
//! single remote conversation:
//!
//! - [`LocalShell`] runs `sh -c` on this machine (optionally under `sudo`).
//! - [`RemoteSession`] drives `ssh` through a pseudo-terminal and detects
//!   command boundaries by waiting for a negotiated prompt marker.
//! - [`MockShell`] replays scripted results for tests.
//!
//! A command that exits non-zero is not an error at this layer. It comes back
//! as a [`CommandResult`] and the caller decides, via [`CommandResult::check`]
//! or [`Shell::run_ok`], whether that is fatal.

mod local;
mod mock;
mod remote;

pub use local::LocalShell;
pub use mock::{MockConnector, MockShell};
pub use remote::{RemoteSession, SshConnector};

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, StressError};

/// Output lines and exit status of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub lines: Vec<String>,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn new(lines: Vec<String>, exit_code: i32) -> Self {
        Self { lines, exit_code }
    }

    /// Successful result whose output is `text` split into lines.
    pub fn ok(text: &str) -> Self {
        Self::new(text.lines().map(str::to_string).collect(), 0)
    }

    /// Failed result with the given output and exit code.
    pub fn failed(text: &str, exit_code: i32) -> Self {
        Self::new(text.lines().map(str::to_string).collect(), exit_code)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`StressError::RemoteCommand`].
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(StressError::RemoteCommand {
                command: command.to_string(),
                output: self.lines,
                exit_code: self.exit_code,
            })
        }
    }

    /// Last non-blank output line, trimmed.
    pub fn last_line(&self) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

/// A channel that executes shell commands one at a time.
///
/// `run` takes `&mut self`: a shell carries at most one command in flight.
#[async_trait]
pub trait Shell: Send {
    /// Human-readable name of the machine behind this shell.
    fn label(&self) -> &str;

    /// Run `command`, returning its output and exit status.
    ///
    /// Errors only when the command could not be issued or did not finish
    /// within `timeout`; a non-zero exit is reported in the result.
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandResult>;

    /// Run `command` and fail with [`StressError::RemoteCommand`] on non-zero exit.
    async fn run_ok(&mut self, command: &str, timeout: Duration) -> Result<CommandResult> {
        self.run(command, timeout).await?.check(command)
    }

    /// Release the underlying channel. Further use is an error.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens the remote conversation to the peer.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn login(
        &self,
        address: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Box<dyn Shell>>;
}

/// Quote `text` as a single POSIX shell word.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_through_success() {
        let res = CommandResult::ok("eth0 ACTIVE\n").check("htxcmdline -query").unwrap();
        assert_eq!(res.lines, vec!["eth0 ACTIVE"]);
    }

    #[test]
    fn test_check_carries_command_output_and_code() {
        let err = CommandResult::failed("no such device", 2)
            .check("htxcmdline -run -mdt net.mdt")
            .unwrap_err();
        match err {
            StressError::RemoteCommand {
                command,
                output,
                exit_code,
            } => {
                assert_eq!(command, "htxcmdline -run -mdt net.mdt");
                assert_eq!(output, vec!["no such device"]);
                assert_eq!(exit_code, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_last_line_skips_blank_trailer() {
        let res = CommandResult::ok("banner\nlpar-peer\n\n  \n");
        assert_eq!(res.last_line(), Some("lpar-peer"));
        assert_eq!(CommandResult::default().last_line(), None);
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("a\nb"), "'a\nb'");
    }
}
