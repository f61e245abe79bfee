//! Error taxonomy for a stress run.
//!
//! Every fatal condition in setup, activation, and monitoring maps to one
//! variant here. Teardown never produces these outward; it logs and continues.

use thiserror::Error;

use crate::endpoint::Side;

pub type Result<T> = std::result::Result<T, StressError>;

#[derive(Debug, Error)]
pub enum StressError {
    /// Login, prompt negotiation, or the remote conversation itself failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A checked command exited non-zero.
    #[error("command '{command}' exited with {exit_code}\noutput:\n{}", output.join("\n"))]
    RemoteCommand {
        command: String,
        output: Vec<String>,
        exit_code: i32,
    },

    #[error("command '{command}' did not complete within {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    /// An expected directive, file, or interface is missing.
    #[error("configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("devices {inactive:?} failed to activate on {side}")]
    ActivationVerification { side: Side, inactive: Vec<String> },

    #[error("network ping test failed on {side} after {attempts} attempts")]
    Connectivity { side: Side, attempts: u32 },

    /// The harness error log was non-empty during the run window.
    #[error("harness error log is not empty on {side}:\n{}", log.join("\n"))]
    Monitor { side: Side, log: Vec<String> },

    #[error("HTX is not installed on {side}")]
    HarnessMissing { side: Side },

    #[error("platform '{arch}' does not support HTX")]
    UnsupportedPlatform { arch: String },

    /// Configuration could not be located or parsed.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StressError {
    /// Short label used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            StressError::Connection(_) => "connection",
            StressError::RemoteCommand { .. } => "remote_command",
            StressError::CommandTimeout { .. } => "command_timeout",
            StressError::ConfigValidation(_) => "config_validation",
            StressError::ActivationVerification { .. } => "activation_verification",
            StressError::Connectivity { .. } => "connectivity",
            StressError::Monitor { .. } => "monitor",
            StressError::HarnessMissing { .. } => "harness_missing",
            StressError::UnsupportedPlatform { .. } => "unsupported_platform",
            StressError::Config(_) => "config",
            StressError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_command_display_includes_output() {
        let err = StressError::RemoteCommand {
            command: "htxcmdline -activate all -mdt net.mdt".into(),
            output: vec!["line one".into(), "line two".into()],
            exit_code: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("exited with 3"));
        assert!(msg.contains("line one\nline two"));
        assert_eq!(err.kind(), "remote_command");
    }

    #[test]
    fn test_monitor_display_names_side() {
        let err = StressError::Monitor {
            side: Side::Peer,
            log: vec!["hxecom: miscompare".into()],
        };
        assert!(err.to_string().contains("peer"));
        assert!(err.to_string().contains("miscompare"));
    }
}
