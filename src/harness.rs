//! HTX command vocabulary and output parsing.
//!
//! The harness is driven purely through these command lines; its output is
//! plain text scanned for fixed tokens.

/// Install directory; presence means HTX is installed.
pub const INSTALL_DIR: &str = "/usr/lpp/htx/";
/// Binary-pair topology file produced by `build_net help`.
pub const TOPOLOGY_FILE: &str = "/usr/lpp/htx/bpt";
/// Error log written by `htxcmdline -geterrlog`.
pub const ERROR_LOG: &str = "/tmp/htxerr";
/// Name-to-address mapping patched on both sides.
pub const HOSTS_FILE: &str = "/etc/hosts";

pub const GENERATE_TOPOLOGY: &str = "echo n | /usr/bin/build_net help";
pub const PING_VERIFY: &str = "pingum";
pub const START_DAEMON: &str = "/usr/lpp/htx/etc/scripts/htxd_run";
pub const STOP_DAEMON: &str = "/usr/lpp/htx/etc/scripts/htxd_shutdown";
pub const DAEMON_STATUS: &str = "/etc/init.d/htx.d status";
pub const SHUTDOWN_ACTIVE: &str = "htxcmdline -shutdown";
pub const GET_ERROR_LOG: &str = "htxcmdline -geterrlog";
pub const RESTART_NETWORK: &str = "systemctl restart network";

/// Token `pingum` / `build_net` print once every network answers.
pub const PING_OK: &str = "All networks ping Ok";
/// Marker on a device line in `-query` output once it is exercising.
pub const ACTIVE: &str = "ACTIVE";

pub fn check_installed() -> String {
    format!("test -d {INSTALL_DIR}")
}

pub fn check_topology_file() -> String {
    format!("ls {TOPOLOGY_FILE}")
}

pub fn build_network() -> String {
    format!("build_net {TOPOLOGY_FILE}")
}

pub fn select(descriptor: &str) -> String {
    format!("htxcmdline -select -mdt {descriptor}")
}

pub fn query(descriptor: &str) -> String {
    format!("htxcmdline -query -mdt {descriptor}")
}

pub fn suspend(descriptor: &str) -> String {
    format!("htxcmdline -suspend all -mdt {descriptor}")
}

pub fn activate(descriptor: &str) -> String {
    format!("htxcmdline -activate all -mdt {descriptor}")
}

pub fn start_run(descriptor: &str) -> String {
    format!("htxcmdline -run -mdt {descriptor}")
}

pub fn shutdown(descriptor: &str) -> String {
    format!("htxcmdline -shutdown -mdt {descriptor}")
}

pub fn ping_ok(lines: &[String]) -> bool {
    lines.iter().any(|l| l.contains(PING_OK))
}

/// `ls` output that reports a missing file.
pub fn reports_missing(lines: &[String]) -> bool {
    lines.iter().any(|l| l.contains("No such file or directory"))
}

/// Configured interfaces that do not appear anywhere in a `-query` listing.
pub fn missing_devices(listing: &[String], interfaces: &[String]) -> Vec<String> {
    interfaces
        .iter()
        .filter(|intf| !listing.iter().any(|l| has_token(l, intf)))
        .cloned()
        .collect()
}

/// Configured interfaces without a line that names them and says `ACTIVE`.
pub fn inactive_devices(listing: &[String], interfaces: &[String]) -> Vec<String> {
    interfaces
        .iter()
        .filter(|intf| {
            !listing
                .iter()
                .any(|l| has_token(l, intf) && l.contains(ACTIVE) && !l.contains("INACTIVE"))
        })
        .cloned()
        .collect()
}

/// `htx.d status` reports a running daemon.
pub fn daemon_running(lines: &[String]) -> bool {
    lines
        .iter()
        .any(|l| l.split_whitespace().last() == Some("running"))
}

/// Whole-token match, so `eth1` is not found inside `eth10`. `-query` output
/// also separates names with `/` and `:` (`/dev/eth0`, `eth0:`).
fn has_token(line: &str, name: &str) -> bool {
    line.split(|c: char| c.is_whitespace() || matches!(c, '/' | ':' | ',' | '(' | ')'))
        .any(|t| t == name)
}
