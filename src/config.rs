//! TOML configuration for a stress run.
//!
//! Required fields (addresses, credentials, interface lists) have no
//! defaults; everything else does. The file is found via an explicit path,
//! the `NICSTRESS_CONFIG` environment variable, or the system location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::endpoint::HostEndpoint;
use crate::error::{Result, StressError};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "NICSTRESS_CONFIG";
/// Standard system location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/nicstress/nicstress.toml";

pub const DEFAULT_DESCRIPTOR: &str = "net.mdt";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    pub host_address: String,
    pub peer_address: String,
    pub peer_user: String,
    #[serde(default)]
    pub peer_password: String,
    pub host_interfaces: Vec<String>,
    pub peer_interfaces: Vec<String>,
    pub net_ids: Vec<String>,
    /// Harness descriptor (mdt) selected for the run.
    #[serde(default = "default_descriptor")]
    pub descriptor_file: String,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: u64,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_descriptor() -> String {
    DEFAULT_DESCRIPTOR.to_string()
}

fn default_duration_hours() -> u64 {
    2
}

impl StressConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StressError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content).map_err(|e| match e {
            StressError::Config(msg) => {
                StressError::Config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        info!(path = %path.display(), "loaded stress configuration");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| StressError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Find the config file: `explicit` if given, then `$NICSTRESS_CONFIG`,
    /// then the system path.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            debug!(path = %env_path, "using config path from {}", CONFIG_ENV);
            return Ok(PathBuf::from(env_path));
        }
        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            return Ok(system_path.to_path_buf());
        }
        Err(StressError::Config(format!(
            "no config file: pass --config, set {CONFIG_ENV}, or create {SYSTEM_CONFIG_PATH}"
        )))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StressError::ConfigValidation(msg));

        for (name, value) in [
            ("host_address", &self.host_address),
            ("peer_address", &self.peer_address),
            ("peer_user", &self.peer_user),
            ("descriptor_file", &self.descriptor_file),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{name} must not be empty"));
            }
        }
        if self.host_interfaces.is_empty() {
            return invalid("at least one host interface is required".into());
        }
        if self.host_interfaces.len() != self.net_ids.len()
            || self.peer_interfaces.len() != self.net_ids.len()
        {
            return invalid(format!(
                "host_interfaces ({}), peer_interfaces ({}) and net_ids ({}) must have equal length",
                self.host_interfaces.len(),
                self.peer_interfaces.len(),
                self.net_ids.len()
            ));
        }
        if self.duration_hours == 0 {
            return invalid("duration_hours must be at least 1".into());
        }
        if self.duration_hours.checked_mul(3600).is_none() {
            return invalid(format!("duration_hours {} is too large", self.duration_hours));
        }
        if self.execution.ping_attempts == 0 {
            return invalid("execution.ping_attempts must be at least 1".into());
        }
        if self.execution.monitor_tick_secs == 0 {
            return invalid("execution.monitor_tick_secs must be at least 1".into());
        }
        Ok(())
    }

    /// Monitor budget in seconds.
    pub fn duration_secs(&self) -> u64 {
        self.duration_hours.saturating_mul(3600)
    }

    pub fn host_endpoint(&self) -> HostEndpoint {
        HostEndpoint {
            name: String::new(),
            address: self.host_address.clone(),
            interfaces: self.host_interfaces.clone(),
            net_ids: self.net_ids.clone(),
        }
    }

    pub fn peer_endpoint(&self) -> HostEndpoint {
        HostEndpoint {
            name: String::new(),
            address: self.peer_address.clone(),
            interfaces: self.peer_interfaces.clone(),
            net_ids: self.net_ids.clone(),
        }
    }

    /// Copy with the password blanked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.peer_password.is_empty() {
            copy.peer_password = "********".to_string();
        }
        copy
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Timeouts, retry policy, and host privileges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Run host commands under `sudo -n`.
    pub use_sudo: bool,
    /// Substring `uname -m` must contain; empty disables the check.
    pub required_arch: String,
    pub login_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// PingVerify attempts per side.
    pub ping_attempts: u32,
    pub ping_backoff_secs: u64,
    pub monitor_tick_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            use_sudo: true,
            required_arch: "ppc64".to_string(),
            login_timeout_secs: 60,
            command_timeout_secs: 300,
            ping_attempts: 10,
            ping_backoff_secs: 30,
            monitor_tick_secs: 60,
        }
    }
}

impl ExecutionConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn ping_backoff(&self) -> Duration {
        Duration::from_secs(self.ping_backoff_secs)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_secs(self.monitor_tick_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
