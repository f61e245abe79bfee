//! The ordered phases that configure, activate, and start the harness.
//!
//! Each mirrored phase runs on the host first, then on the peer. The first
//! fatal error stops the sequence and is returned with the phase it came
//! from; the orchestrator then tears down.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer::{patch_net_ids, patch_other_ids, ConfigBuffer};
use crate::endpoint::{Endpoint, Side};
use crate::error::{Result, StressError};
use crate::harness;
use crate::orchestrator::OrchestratorContext;
use crate::teardown::best_effort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    GenerateTopologyFile,
    VerifyTopologyFileExists,
    PatchOtherIds,
    PatchNetIds,
    BuildNetwork,
    PingVerify,
    StartDaemon,
    SelectConfig,
    VerifyDevicesListed,
    SuspendDevices,
    Activate,
    VerifyDevicesActive,
    StartRun,
}

impl Phase {
    /// Execution order.
    pub const ALL: [Phase; 13] = [
        Phase::GenerateTopologyFile,
        Phase::VerifyTopologyFileExists,
        Phase::PatchOtherIds,
        Phase::PatchNetIds,
        Phase::BuildNetwork,
        Phase::PingVerify,
        Phase::StartDaemon,
        Phase::SelectConfig,
        Phase::VerifyDevicesListed,
        Phase::SuspendDevices,
        Phase::Activate,
        Phase::VerifyDevicesActive,
        Phase::StartRun,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::GenerateTopologyFile => "generate_topology_file",
            Phase::VerifyTopologyFileExists => "verify_topology_file_exists",
            Phase::PatchOtherIds => "patch_other_ids",
            Phase::PatchNetIds => "patch_net_ids",
            Phase::BuildNetwork => "build_network",
            Phase::PingVerify => "ping_verify",
            Phase::StartDaemon => "start_daemon",
            Phase::SelectConfig => "select_config",
            Phase::VerifyDevicesListed => "verify_devices_listed",
            Phase::SuspendDevices => "suspend_devices",
            Phase::Activate => "activate",
            Phase::VerifyDevicesActive => "verify_devices_active",
            Phase::StartRun => "start_run",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fatal error tagged with the phase that raised it.
#[derive(Debug, Error)]
#[error("{phase} failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: StressError,
}

/// Run every phase in order, stopping at the first failure.
pub async fn activate(ctx: &mut OrchestratorContext) -> std::result::Result<(), PhaseError> {
    for phase in Phase::ALL {
        info!(%phase, "entering activation phase");
        run_phase(ctx, phase)
            .await
            .map_err(|source| PhaseError { phase, source })?;
    }
    info!("harness running on all sides");
    Ok(())
}

/// Run one phase on every side.
pub async fn run_phase(ctx: &mut OrchestratorContext, phase: Phase) -> Result<()> {
    for side in Side::BOTH {
        debug!(%phase, %side, "running phase");
        match phase {
            Phase::PatchOtherIds => patch_topology(ctx, side, TopologyPatch::OtherIds).await?,
            Phase::PatchNetIds => patch_topology(ctx, side, TopologyPatch::NetIds).await?,
            Phase::PingVerify => {
                let attempts = ctx.config.execution.ping_attempts;
                let backoff = ctx.config.execution.ping_backoff();
                ping_verify(ctx.endpoint_mut(side)?, attempts, backoff).await?
            }
            _ => {
                let descriptor = ctx.config.descriptor_file.clone();
                run_command_phase(ctx.endpoint_mut(side)?, phase, &descriptor).await?
            }
        }
    }
    Ok(())
}

/// Phases that are a command on one side plus a check of its output.
async fn run_command_phase(ep: &mut Endpoint, phase: Phase, descriptor: &str) -> Result<()> {
    let side = ep.side;
    match phase {
        Phase::GenerateTopologyFile => {
            ep.run_ok(harness::GENERATE_TOPOLOGY).await?;
        }
        Phase::VerifyTopologyFileExists => {
            let res = ep.run(&harness::check_topology_file()).await?;
            if !res.success() || harness::reports_missing(&res.lines) {
                return Err(StressError::ConfigValidation(format!(
                    "topology file {} missing on {side}",
                    harness::TOPOLOGY_FILE
                )));
            }
        }
        Phase::BuildNetwork => {
            let res = ep.run(&harness::build_network()).await?;
            debug!(%side, output = %res.text(), "build_net output");
            if !res.success() {
                warn!(%side, exit_code = res.exit_code, "build_net exited non-zero, continuing");
            }
        }
        Phase::StartDaemon => {
            ep.run_ok(harness::START_DAEMON).await?;
        }
        Phase::SelectConfig => {
            best_effort("clear stale descriptor", ep.run_ok(harness::SHUTDOWN_ACTIVE)).await;
            ep.run_ok(&harness::select(descriptor)).await?;
        }
        Phase::VerifyDevicesListed => {
            let listing = ep.run_ok(&harness::query(descriptor)).await?;
            let missing = harness::missing_devices(&listing.lines, ep.interfaces());
            if !missing.is_empty() {
                return Err(StressError::ConfigValidation(format!(
                    "devices {missing:?} not listed in {descriptor} on {side}"
                )));
            }
        }
        Phase::SuspendDevices => {
            best_effort("suspend devices", ep.run_ok(&harness::suspend(descriptor))).await;
        }
        Phase::Activate => {
            ep.run_ok(&harness::activate(descriptor)).await?;
        }
        Phase::VerifyDevicesActive => {
            // The listing decides; htxcmdline can exit non-zero with every device active.
            let listing = ep.run(&harness::query(descriptor)).await?;
            if !listing.success() {
                debug!(%side, exit_code = listing.exit_code, "device query exited non-zero");
            }
            let inactive = harness::inactive_devices(&listing.lines, ep.interfaces());
            if !inactive.is_empty() {
                return Err(StressError::ActivationVerification { side, inactive });
            }
            info!(%side, devices = ep.interfaces().len(), "all devices active");
        }
        Phase::StartRun => {
            ep.run_ok(&harness::start_run(descriptor)).await?;
        }
        // Need the whole context; dispatched by run_phase.
        Phase::PatchOtherIds | Phase::PatchNetIds | Phase::PingVerify => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Topology patching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum TopologyPatch {
    OtherIds,
    NetIds,
}

/// Apply one patch to the side's topology buffer and flush it. The buffer is
/// loaded on first use and reused by later patches.
async fn patch_topology(ctx: &mut OrchestratorContext, side: Side, patch: TopologyPatch) -> Result<()> {
    let (own, opposite) = ctx.address_pair(side);
    let (own, opposite) = (own.to_string(), opposite.to_string());
    let (ep, slot) = ctx.topology_parts(side)?;

    if slot.is_none() {
        let mut files = ep.files();
        *slot = Some(ConfigBuffer::load(files.as_mut(), harness::TOPOLOGY_FILE).await?);
    }
    let Some(buffer) = slot.as_mut() else {
        return Err(StressError::ConfigValidation("topology buffer not loaded".into()));
    };

    match patch {
        TopologyPatch::OtherIds => patch_other_ids(buffer, &own, &opposite)?,
        TopologyPatch::NetIds => {
            let (interfaces, net_ids) = (&ep.descriptor.interfaces, &ep.descriptor.net_ids);
            patch_net_ids(buffer, interfaces, net_ids)?
        }
    }

    let mut files = ep.files();
    buffer.flush(files.as_mut()).await?;
    info!(%side, patch = ?patch, path = buffer.path(), "patched topology file");
    Ok(())
}

// ---------------------------------------------------------------------------
// PingVerify
// ---------------------------------------------------------------------------

/// Run `pingum` until it confirms every network, up to `attempts` times.
///
/// Between failed attempts networking on the side is restarted and the loop
/// sleeps `backoff`. A timed-out attempt counts as a failure.
pub async fn ping_verify(ep: &mut Endpoint, attempts: u32, backoff: Duration) -> Result<()> {
    let side = ep.side;
    for attempt in 1..=attempts {
        match ep.run(harness::PING_VERIFY).await {
            Ok(res) if harness::ping_ok(&res.lines) => {
                info!(%side, attempt, "all networks ping ok");
                return Ok(());
            }
            Ok(res) => {
                warn!(%side, attempt, attempts, exit_code = res.exit_code, "ping test failed");
                debug!(%side, output = %res.text(), "pingum output");
            }
            Err(StressError::CommandTimeout { .. }) => {
                warn!(%side, attempt, attempts, "ping test timed out");
            }
            Err(e) => return Err(e),
        }

        if attempt < attempts {
            best_effort("restart network", ep.run_ok(harness::RESTART_NETWORK)).await;
            tokio::time::sleep(backoff).await;
        }
    }
    Err(StressError::Connectivity { side, attempts })
}
