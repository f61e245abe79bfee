//! Drives a full stress run: setup, activation, the monitored run window,
//! and teardown.
//!
//! All run state lives in an [`OrchestratorContext`] that is handed to each
//! phase in turn. Teardown runs exactly once per [`Orchestrator::run`], no
//! matter which phase failed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::activation;
use crate::buffer::ConfigBuffer;
use crate::config::StressConfig;
use crate::endpoint::{Endpoint, FileAccess, Side};
use crate::error::{Result, StressError};
use crate::exec::{Connector, LocalShell};
use crate::monitor::Monitor;
use crate::setup;
use crate::teardown::{self, TeardownTally};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything the phases share.
pub struct OrchestratorContext {
    pub config: StressConfig,
    pub host: Endpoint,
    /// `None` until the peer login succeeds.
    pub peer: Option<Endpoint>,
    pub host_topology: Option<ConfigBuffer>,
    pub peer_topology: Option<ConfigBuffer>,
}

impl OrchestratorContext {
    pub fn new(config: StressConfig, host: Endpoint) -> Self {
        Self {
            config,
            host,
            peer: None,
            host_topology: None,
            peer_topology: None,
        }
    }

    /// Sides currently reachable, host first.
    pub fn sides(&self) -> Vec<Side> {
        if self.peer.is_some() {
            Side::BOTH.to_vec()
        } else {
            vec![Side::Host]
        }
    }

    pub fn endpoint(&self, side: Side) -> Result<&Endpoint> {
        match side {
            Side::Host => Ok(&self.host),
            Side::Peer => self.peer.as_ref().ok_or_else(peer_missing),
        }
    }

    pub fn endpoint_mut(&mut self, side: Side) -> Result<&mut Endpoint> {
        match side {
            Side::Host => Ok(&mut self.host),
            Side::Peer => self.peer.as_mut().ok_or_else(peer_missing),
        }
    }

    /// The side's endpoint together with its topology buffer slot.
    pub fn topology_parts(
        &mut self,
        side: Side,
    ) -> Result<(&mut Endpoint, &mut Option<ConfigBuffer>)> {
        match side {
            Side::Host => Ok((&mut self.host, &mut self.host_topology)),
            Side::Peer => {
                let peer = self.peer.as_mut().ok_or_else(peer_missing)?;
                Ok((peer, &mut self.peer_topology))
            }
        }
    }

    /// `(own, opposite)` addresses as seen from `side`.
    pub fn address_pair(&self, side: Side) -> (&str, &str) {
        let host = self.config.host_address.as_str();
        let peer = self.config.peer_address.as_str();
        match side {
            Side::Host => (host, peer),
            Side::Peer => (peer, host),
        }
    }
}

fn peer_missing() -> StressError {
    StressError::Connection("peer session not established".into())
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
}

/// Result of one run, as shown to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    /// Name of the phase that failed (`setup`, an activation phase, or `monitor`).
    pub failed_phase: Option<String>,
    /// Error kind label, see [`StressError::kind`].
    pub error_kind: Option<String>,
    pub message: String,
    pub monitor_ticks: u32,
    pub teardown: TeardownTally,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<C: Connector> {
    ctx: OrchestratorContext,
    connector: C,
}

impl<C: Connector> Orchestrator<C> {
    pub fn new(config: StressConfig, host: Endpoint, connector: C) -> Self {
        Self {
            ctx: OrchestratorContext::new(config, host),
            connector,
        }
    }

    /// Orchestrator whose host side is this machine.
    ///
    /// Host files go through the host shell when `use_sudo` is set so that
    /// writes to `/etc/hosts` and ifcfg files run privileged.
    pub fn for_local_host(config: StressConfig, connector: C) -> Self {
        let exec = &config.execution;
        let file_access = if exec.use_sudo {
            FileAccess::ViaShell
        } else {
            FileAccess::Local
        };
        let host = Endpoint::new(
            Side::Host,
            config.host_endpoint(),
            Box::new(LocalShell::new(exec.use_sudo)),
            file_access,
            exec.command_timeout(),
        );
        Self::new(config, host, connector)
    }

    /// Run setup checks only, without touching any file, then close the
    /// session.
    pub async fn preflight(mut self) -> Result<setup::PreflightReport> {
        let result = setup::preflight(&mut self.ctx, &self.connector).await;
        self.close_sessions().await;
        result
    }

    /// Full lifecycle.
    pub async fn run(mut self) -> RunReport {
        let started_at = Utc::now();
        info!(
            host = %self.ctx.config.host_address,
            peer = %self.ctx.config.peer_address,
            descriptor = %self.ctx.config.descriptor_file,
            hours = self.ctx.config.duration_hours,
            "starting stress run"
        );

        let mut monitor = Monitor::from_config(&self.ctx.config);
        let failure = self.drive(&mut monitor).await.err();

        let tally = teardown::teardown(&mut self.ctx).await;
        self.close_sessions().await;

        let (outcome, failed_phase, error_kind, message) = match failure {
            None => {
                info!(ticks = monitor.ticks(), "stress run passed");
                (
                    Outcome::Passed,
                    None,
                    None,
                    format!(
                        "no harness errors in {} hour(s)",
                        self.ctx.config.duration_hours
                    ),
                )
            }
            Some((phase, err)) => {
                error!(%phase, kind = err.kind(), error = %err, "stress run failed");
                (
                    Outcome::Failed,
                    Some(phase),
                    Some(err.kind().to_string()),
                    err.to_string(),
                )
            }
        };

        RunReport {
            outcome,
            failed_phase,
            error_kind,
            message,
            monitor_ticks: monitor.ticks(),
            teardown: tally,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(&mut self, monitor: &mut Monitor) -> std::result::Result<(), (String, StressError)> {
        setup::setup(&mut self.ctx, &self.connector)
            .await
            .map_err(|e| ("setup".to_string(), e))?;

        activation::activate(&mut self.ctx)
            .await
            .map_err(|e| (e.phase.to_string(), e.source))?;

        monitor
            .run(&mut self.ctx)
            .await
            .map_err(|e| ("monitor".to_string(), e))
    }

    async fn close_sessions(&mut self) {
        if let Some(peer) = self.ctx.peer.as_mut() {
            if let Err(e) = peer.close().await {
                warn!(error = %e, "failed to close peer session");
            }
        }
        if let Err(e) = self.ctx.host.close().await {
            warn!(error = %e, "failed to close host shell");
        }
    }
}
