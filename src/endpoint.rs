//! The two machines taking part in a run.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::buffer::{FileIo, LocalFiles, ShellFiles};
use crate::error::Result;
use crate::exec::{CommandResult, Shell};
use crate::system::distro::DistroFamily;

/// Which machine an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The machine running the orchestrator.
    Host,
    /// The machine reached over the ssh session.
    Peer,
}

impl Side {
    /// Mirrored steps run in this order.
    pub const BOTH: [Side; 2] = [Side::Host, Side::Peer];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Host => write!(f, "host"),
            Side::Peer => write!(f, "peer"),
        }
    }
}

/// Static description of one side.
///
/// `interfaces` and `net_ids` are paired by position, and are paired
/// positionally with the other side's lists as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostEndpoint {
    /// Resolved with `hostname` during setup.
    pub name: String,
    pub address: String,
    pub interfaces: Vec<String>,
    pub net_ids: Vec<String>,
}

/// How files on a side are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    /// This machine's file system.
    Local,
    /// `cat` / `echo` over the side's shell.
    ViaShell,
}

/// Live state of one side: its descriptor plus the channel to reach it.
pub struct Endpoint {
    pub side: Side,
    pub descriptor: HostEndpoint,
    pub distro: Option<DistroFamily>,
    /// IPv4 address of each configured interface, captured at setup.
    pub interface_addrs: Vec<(String, String)>,
    shell: Box<dyn Shell>,
    file_access: FileAccess,
    timeout: Duration,
}

impl Endpoint {
    pub fn new(
        side: Side,
        descriptor: HostEndpoint,
        shell: Box<dyn Shell>,
        file_access: FileAccess,
        timeout: Duration,
    ) -> Self {
        Self {
            side,
            descriptor,
            distro: None,
            interface_addrs: Vec::new(),
            shell,
            file_access,
            timeout,
        }
    }

    pub fn interfaces(&self) -> &[String] {
        &self.descriptor.interfaces
    }

    /// Default timeout for commands on this side.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&mut self, command: &str) -> Result<CommandResult> {
        self.shell.run(command, self.timeout).await
    }

    pub async fn run_ok(&mut self, command: &str) -> Result<CommandResult> {
        self.shell.run_ok(command, self.timeout).await
    }

    /// File provider bound to this side.
    pub fn files(&mut self) -> Box<dyn FileIo + '_> {
        match self.file_access {
            FileAccess::Local => Box::new(LocalFiles),
            FileAccess::ViaShell => Box::new(ShellFiles::new(self.shell.as_mut(), self.timeout)),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.shell.close().await
    }
}
