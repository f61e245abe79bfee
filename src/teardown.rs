//! Cleanup after a run.
//!
//! Every step is best-effort: a failure is logged, counted, and the next step
//! still runs. Teardown never returns an error.

use std::future::Future;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::{patch_ipaddr, ConfigBuffer};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::harness;
use crate::orchestrator::OrchestratorContext;

/// Await `op`, logging and discarding any error.
pub async fn best_effort<T>(label: &str, op: impl Future<Output = Result<T>>) -> Option<T> {
    match op.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(step = label, kind = e.kind(), error = %e, "best-effort step failed");
            None
        }
    }
}

/// Counts of teardown steps attempted and failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TeardownTally {
    pub attempted: u32,
    pub failed: u32,
}

impl TeardownTally {
    /// [`best_effort`], counted.
    pub async fn step<T>(&mut self, label: &str, op: impl Future<Output = Result<T>>) -> Option<T> {
        self.attempted += 1;
        let result = best_effort(label, op).await;
        if result.is_none() {
            self.failed += 1;
        }
        result
    }
}

/// Stop the harness and restore networking on every reachable side.
pub async fn teardown(ctx: &mut OrchestratorContext) -> TeardownTally {
    let mut tally = TeardownTally::default();
    let descriptor = ctx.config.descriptor_file.clone();
    let sides = ctx.sides();
    if ctx.peer.is_none() {
        info!("peer never logged in, tearing down host only");
    }

    for side in &sides {
        if let Ok(ep) = ctx.endpoint_mut(*side) {
            shutdown_devices(ep, &descriptor, &mut tally).await;
        }
    }
    for side in &sides {
        if let Ok(ep) = ctx.endpoint_mut(*side) {
            stop_daemon(ep, &mut tally).await;
        }
    }
    for side in &sides {
        if let Ok(ep) = ctx.endpoint_mut(*side) {
            restore_network(ep, &mut tally).await;
        }
    }

    info!(
        attempted = tally.attempted,
        failed = tally.failed,
        "teardown complete"
    );
    tally
}

async fn shutdown_devices(ep: &mut Endpoint, descriptor: &str, tally: &mut TeardownTally) {
    let side = ep.side;
    // A non-zero exit still carries the listing.
    let Some(listing) = tally.step("query devices", ep.run(&harness::query(descriptor))).await
    else {
        return;
    };

    let inactive = harness::inactive_devices(&listing.lines, ep.interfaces());
    if !inactive.is_empty() {
        debug!(%side, ?inactive, "devices not all active, skipping harness shutdown");
        return;
    }

    info!(%side, "suspending and shutting down active devices");
    tally
        .step("suspend devices", ep.run_ok(&harness::suspend(descriptor)))
        .await;
    tally
        .step("shutdown descriptor", ep.run_ok(&harness::shutdown(descriptor)))
        .await;
}

async fn stop_daemon(ep: &mut Endpoint, tally: &mut TeardownTally) {
    let side = ep.side;
    let Some(status) = tally.step("daemon status", ep.run(harness::DAEMON_STATUS)).await else {
        return;
    };
    if harness::daemon_running(&status.lines) {
        info!(%side, "stopping harness daemon");
        tally
            .step("stop daemon", ep.run_ok(harness::STOP_DAEMON))
            .await;
    } else {
        debug!(%side, "harness daemon not running");
    }
}

async fn restore_network(ep: &mut Endpoint, tally: &mut TeardownTally) {
    let side = ep.side;
    let Some(distro) = ep.distro else {
        info!(%side, "distro unknown, skipping address restore");
        return;
    };
    let Some(prefix) = distro.ifcfg_prefix() else {
        info!(%side, %distro, "address restore not supported on this distro, skipping");
        return;
    };

    let addrs = ep.interface_addrs.clone();
    for (interface, address) in &addrs {
        let path = format!("{prefix}{interface}");
        info!(%side, %interface, %address, "restoring interface address");
        tally
            .step("restore address", restore_ipaddr(ep, &path, address))
            .await;
    }

    tally
        .step("restart network", ep.run_ok(harness::RESTART_NETWORK))
        .await;
}

async fn restore_ipaddr(ep: &mut Endpoint, path: &str, address: &str) -> Result<()> {
    let mut files = ep.files();
    let mut buffer = ConfigBuffer::load(files.as_mut(), path).await?;
    patch_ipaddr(&mut buffer, address);
    buffer.flush(files.as_mut()).await
}
