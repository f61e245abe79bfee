//! Timed watch over the harness error log while the run is in progress.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::StressConfig;
use crate::endpoint::Side;
use crate::error::{Result, StressError};
use crate::harness;
use crate::orchestrator::OrchestratorContext;
use crate::teardown::best_effort;

/// Elapsed time against a fixed deadline, advanced one tick at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorWindow {
    elapsed: Duration,
    tick: Duration,
    deadline: Duration,
}

impl MonitorWindow {
    pub fn new(deadline: Duration, tick: Duration) -> Self {
        Self {
            elapsed: Duration::ZERO,
            tick,
            deadline,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn advance(&mut self) {
        self.elapsed = self.elapsed.saturating_add(self.tick);
    }

    pub fn expired(&self) -> bool {
        self.elapsed >= self.deadline
    }

    /// Ticks left before the deadline, rounding a partial tick up.
    pub fn ticks_remaining(&self) -> u64 {
        let left = self.deadline.saturating_sub(self.elapsed).as_secs();
        let tick = self.tick.as_secs().max(1);
        left.div_ceil(tick)
    }
}

/// Polls the error log on both sides until the window closes or an error
/// shows up.
#[derive(Debug)]
pub struct Monitor {
    window: MonitorWindow,
    ticks: u32,
}

impl Monitor {
    pub fn new(window: MonitorWindow) -> Self {
        Self { window, ticks: 0 }
    }

    pub fn from_config(config: &StressConfig) -> Self {
        Self::new(MonitorWindow::new(
            Duration::from_secs(config.duration_secs()),
            config.execution.monitor_tick(),
        ))
    }

    /// Ticks performed so far, including one that failed.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub async fn run(&mut self, ctx: &mut OrchestratorContext) -> Result<()> {
        info!(
            deadline_secs = self.window.deadline().as_secs(),
            tick_secs = self.window.tick().as_secs(),
            ticks = self.window.ticks_remaining(),
            "monitoring harness error logs"
        );

        loop {
            self.ticks += 1;
            tick(ctx).await?;
            self.window.advance();
            if self.window.expired() {
                break;
            }
            debug!(
                tick = self.ticks,
                elapsed_secs = self.window.elapsed().as_secs(),
                "no harness errors yet"
            );
            tokio::time::sleep(self.window.tick()).await;
        }

        info!(ticks = self.ticks, "run window finished without harness errors");
        Ok(())
    }
}

/// One poll of both sides.
async fn tick(ctx: &mut OrchestratorContext) -> Result<()> {
    check_host_log(ctx).await?;
    check_peer_log(ctx).await?;

    let descriptor = ctx.config.descriptor_file.clone();
    for side in Side::BOTH {
        let ep = ctx.endpoint_mut(side)?;
        let status = best_effort("query devices", ep.run(&harness::query(&descriptor))).await;
        if let Some(status) = status {
            let inactive = harness::inactive_devices(&status.lines, ep.interfaces());
            debug!(%side, output = %status.text(), "device status");
            if !inactive.is_empty() {
                warn!(%side, ?inactive, "devices not reported active");
            }
        }
    }
    Ok(())
}

async fn check_host_log(ctx: &mut OrchestratorContext) -> Result<()> {
    let ep = &mut ctx.host;
    best_effort("fetch host error log", ep.run(harness::GET_ERROR_LOG)).await;

    let mut files = ep.files();
    match files.size(harness::ERROR_LOG).await? {
        None => {
            warn!(side = %Side::Host, path = harness::ERROR_LOG, "error log missing, treating as empty");
            Ok(())
        }
        Some(0) => Ok(()),
        Some(size) => {
            let text = files.read(harness::ERROR_LOG).await?;
            warn!(side = %Side::Host, size, "harness error log is not empty");
            Err(StressError::Monitor {
                side: Side::Host,
                log: text.lines().map(str::to_string).collect(),
            })
        }
    }
}

async fn check_peer_log(ctx: &mut OrchestratorContext) -> Result<()> {
    let ep = ctx.endpoint_mut(Side::Peer)?;
    best_effort("fetch peer error log", ep.run(harness::GET_ERROR_LOG)).await;

    let nonempty = ep.run(&format!("test -s {}", harness::ERROR_LOG)).await?;
    if !nonempty.success() {
        return Ok(());
    }
    let log = ep.run_ok(&format!("cat {}", harness::ERROR_LOG)).await?;
    warn!(side = %Side::Peer, lines = log.lines.len(), "harness error log is not empty");
    Err(StressError::Monitor {
        side: Side::Peer,
        log: log.lines,
    })
}
