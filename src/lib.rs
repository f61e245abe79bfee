//! nicstress -- dual-host NIC stress orchestration around the HTX harness.
//!
//! This crate drives the harness on a local host and on a peer reached over
//! ssh: it patches the harness topology and `/etc/hosts`, activates the
//! network devices on both sides, watches the error logs for the configured
//! number of hours, and always cleans up afterwards.

pub mod activation;
pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod exec;
pub mod harness;
pub mod monitor;
pub mod orchestrator;
pub mod setup;
pub mod system;
pub mod teardown;

use config::StressConfig;
use exec::SshConnector;
use orchestrator::{Orchestrator, RunReport};

/// Run the full stress lifecycle from this machine against the configured peer.
pub async fn run(config: StressConfig) -> RunReport {
    Orchestrator::for_local_host(config, SshConnector).run().await
}

/// Check both machines without changing anything.
pub async fn preflight(config: StressConfig) -> error::Result<setup::PreflightReport> {
    Orchestrator::for_local_host(config, SshConnector).preflight().await
}
