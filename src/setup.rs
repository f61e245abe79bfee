//! First lifecycle phase: platform gate, peer login, discovery, and the
//! identity mapping patch.

use serde::Serialize;
use tracing::{info, warn};

use crate::buffer::{patch_identity_mapping, ConfigBuffer};
use crate::endpoint::{Endpoint, FileAccess, Side};
use crate::error::{Result, StressError};
use crate::exec::Connector;
use crate::harness;
use crate::orchestrator::OrchestratorContext;
use crate::system::distro::DistroFamily;
use crate::system::network;

/// Facts gathered by the read-only setup steps.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub arch: String,
    pub sides: Vec<SideFacts>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SideFacts {
    pub side: Side,
    pub hostname: String,
    pub distro: DistroFamily,
    /// `(interface, ipv4)` for interfaces that have an address.
    pub interface_addrs: Vec<(String, String)>,
    pub harness_installed: bool,
}

/// Setup steps that only inspect: platform gate, login, hostnames, distro,
/// interface addresses, harness presence.
pub async fn preflight(ctx: &mut OrchestratorContext, connector: &dyn Connector) -> Result<PreflightReport> {
    let arch = check_platform(ctx).await?;
    login(ctx, connector).await?;

    let mut sides = Vec::new();
    for side in Side::BOTH {
        let ep = ctx.endpoint_mut(side)?;
        discover_hostname(ep).await?;
        detect_distro(ep).await;
        capture_interface_addrs(ep).await?;
        check_harness(ep).await?;

        sides.push(SideFacts {
            side,
            hostname: ep.descriptor.name.clone(),
            distro: ep.distro.unwrap_or(DistroFamily::Unknown),
            interface_addrs: ep.interface_addrs.clone(),
            harness_installed: true,
        });
    }

    Ok(PreflightReport { arch, sides })
}

/// Full setup: [`preflight`] then `/etc/hosts` on both sides.
pub async fn setup(ctx: &mut OrchestratorContext, connector: &dyn Connector) -> Result<()> {
    preflight(ctx, connector).await?;

    let entries = [
        (ctx.host.descriptor.name.clone(), ctx.host.descriptor.address.clone()),
        (
            ctx.endpoint(Side::Peer)?.descriptor.name.clone(),
            ctx.endpoint(Side::Peer)?.descriptor.address.clone(),
        ),
    ];
    let entries: Vec<(&str, &str)> = entries
        .iter()
        .map(|(name, addr)| (name.as_str(), addr.as_str()))
        .collect();

    for side in Side::BOTH {
        let ep = ctx.endpoint_mut(side)?;
        let mut files = ep.files();
        let mut hosts = ConfigBuffer::load(files.as_mut(), harness::HOSTS_FILE).await?;
        let before = hosts.clone();
        patch_identity_mapping(&mut hosts, &entries);
        if hosts != before {
            hosts.flush(files.as_mut()).await?;
            info!(%side, "added identity mappings to {}", harness::HOSTS_FILE);
        } else {
            info!(%side, "identity mappings already present");
        }
    }
    Ok(())
}

async fn check_platform(ctx: &mut OrchestratorContext) -> Result<String> {
    let required = ctx.config.execution.required_arch.clone();
    let arch = ctx
        .host
        .run_ok("uname -m")
        .await?
        .last_line()
        .unwrap_or_default()
        .to_string();

    if !required.is_empty() && !arch.contains(&required) {
        return Err(StressError::UnsupportedPlatform { arch });
    }
    info!(%arch, "platform supported");
    Ok(arch)
}

async fn login(ctx: &mut OrchestratorContext, connector: &dyn Connector) -> Result<()> {
    let config = &ctx.config;
    info!(peer = %config.peer_address, user = %config.peer_user, "logging in to peer");
    let shell = connector
        .login(
            &config.peer_address,
            &config.peer_user,
            &config.peer_password,
            config.execution.login_timeout(),
        )
        .await?;
    ctx.peer = Some(Endpoint::new(
        Side::Peer,
        config.peer_endpoint(),
        shell,
        FileAccess::ViaShell,
        config.execution.command_timeout(),
    ));
    Ok(())
}

async fn discover_hostname(ep: &mut Endpoint) -> Result<()> {
    let res = ep.run_ok("hostname").await?;
    let name = res.last_line().unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(StressError::ConfigValidation(format!(
            "hostname on {} printed nothing",
            ep.side
        )));
    }
    info!(side = %ep.side, hostname = %name, "discovered hostname");
    ep.descriptor.name = name;
    Ok(())
}

async fn detect_distro(ep: &mut Endpoint) {
    let side = ep.side;
    let family = match ep.files().read("/etc/os-release").await {
        Ok(text) => DistroFamily::from_os_release(&text),
        Err(e) => {
            warn!(%side, error = %e, "could not read /etc/os-release");
            DistroFamily::Unknown
        }
    };
    info!(%side, distro = %family, "detected distro");
    ep.distro = Some(family);
}

async fn capture_interface_addrs(ep: &mut Endpoint) -> Result<()> {
    let side = ep.side;
    let mut addrs = Vec::new();
    for interface in ep.interfaces().to_vec() {
        let res = ep.run(&network::ipv4_query(&interface)).await?;
        match network::parse_ipv4(&res.lines) {
            Some(address) => {
                info!(%side, %interface, %address, "captured interface address");
                addrs.push((interface, address));
            }
            None => warn!(%side, %interface, "interface has no IPv4 address"),
        }
    }
    ep.interface_addrs = addrs;
    Ok(())
}

async fn check_harness(ep: &mut Endpoint) -> Result<()> {
    let res = ep.run(&harness::check_installed()).await?;
    if !res.success() {
        return Err(StressError::HarnessMissing { side: ep.side });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::StressConfig;
    use crate::exec::{CommandResult, MockConnector, MockShell};

    const CONFIG: &str = r#"
host_address = "10.0.0.1"
peer_address = "10.0.0.2"
peer_user = "root"
host_interfaces = ["eth0"]
peer_interfaces = ["eth2"]
net_ids = ["10"]
"#;

    fn scripted(name: &str, os_release: &str) -> MockShell {
        let shell = MockShell::new(name);
        shell.on("uname -m", CommandResult::ok("ppc64le"));
        shell.on("hostname", CommandResult::ok(name));
        shell.on("ip addr list", CommandResult::ok("10.10.1.5"));
        shell.put_file("/etc/os-release", os_release);
        shell.put_file(harness::HOSTS_FILE, "127.0.0.1 localhost\n");
        shell
    }

    fn context(host: &MockShell) -> OrchestratorContext {
        let config = StressConfig::parse(CONFIG).unwrap();
        let ep = Endpoint::new(
            Side::Host,
            config.host_endpoint(),
            Box::new(host.clone()),
            FileAccess::ViaShell,
            Duration::from_secs(5),
        );
        OrchestratorContext::new(config, ep)
    }

    #[tokio::test]
    async fn test_setup_discovers_and_patches_hosts() {
        let host = scripted("lpar-host", "ID=\"rhel\"\n");
        let peer = scripted("lpar-peer", "ID=\"sles\"\n");
        let mut ctx = context(&host);

        setup(&mut ctx, &MockConnector::new(peer.clone())).await.unwrap();

        assert_eq!(ctx.host.descriptor.name, "lpar-host");
        assert_eq!(ctx.host.distro, Some(DistroFamily::Rhel));
        let peer_ep = ctx.peer.as_ref().unwrap();
        assert_eq!(peer_ep.distro, Some(DistroFamily::Suse));
        assert_eq!(peer_ep.interface_addrs, vec![("eth2".to_string(), "10.10.1.5".to_string())]);

        for shell in [&host, &peer] {
            let hosts = shell.file(harness::HOSTS_FILE).unwrap();
            assert!(hosts.contains("lpar-host 10.0.0.1"));
            assert!(hosts.contains("lpar-peer 10.0.0.2"));
        }
    }

    #[tokio::test]
    async fn test_setup_leaves_hosts_alone_when_already_mapped() {
        let host = scripted("lpar-host", "ID=rhel\n");
        let peer = scripted("lpar-peer", "ID=rhel\n");
        for shell in [&host, &peer] {
            shell.put_file(harness::HOSTS_FILE, "lpar-host 10.0.0.1\nlpar-peer 10.0.0.2\n");
        }
        let mut ctx = context(&host);

        setup(&mut ctx, &MockConnector::new(peer.clone())).await.unwrap();

        assert_eq!(host.count("echo "), 0);
        assert_eq!(peer.count("echo "), 0);
    }

    #[tokio::test]
    async fn test_wrong_arch_fails_before_login() {
        let host = MockShell::new("host");
        host.on("uname -m", CommandResult::ok("x86_64"));
        let mut ctx = context(&host);

        let err = setup(&mut ctx, &MockConnector::failing("unreachable"))
            .await
            .unwrap_err();
        assert!(matches!(err, StressError::UnsupportedPlatform { arch } if arch == "x86_64"));
        assert!(ctx.peer.is_none());
    }

    #[tokio::test]
    async fn test_login_failure_is_connection_error() {
        let host = scripted("lpar-host", "ID=rhel\n");
        let mut ctx = context(&host);
        let err = preflight(&mut ctx, &MockConnector::failing("Permission denied"))
            .await
            .unwrap_err();
        assert!(matches!(err, StressError::Connection(_)));
        assert!(ctx.peer.is_none());
    }

    #[tokio::test]
    async fn test_missing_harness_names_side() {
        let host = scripted("lpar-host", "ID=rhel\n");
        let peer = scripted("lpar-peer", "ID=rhel\n");
        peer.on("test -d /usr/lpp/htx/", CommandResult::failed("", 1));
        let mut ctx = context(&host);

        let err = preflight(&mut ctx, &MockConnector::new(peer)).await.unwrap_err();
        assert!(matches!(err, StressError::HarnessMissing { side: Side::Peer }));
    }

    #[tokio::test]
    async fn test_preflight_does_not_write_files() {
        let host = scripted("lpar-host", "ID=ubuntu\n");
        let peer = scripted("lpar-peer", "ID=ubuntu\n");
        let mut ctx = context(&host);

        let report = preflight(&mut ctx, &MockConnector::new(peer.clone())).await.unwrap();

        assert_eq!(report.arch, "ppc64le");
        assert_eq!(report.sides.len(), 2);
        assert_eq!(report.sides[1].hostname, "lpar-peer");
        assert_eq!(report.sides[0].distro, DistroFamily::Debian);
        assert_eq!(host.file(harness::HOSTS_FILE).unwrap(), "127.0.0.1 localhost\n");
        assert_eq!(peer.count("echo "), 0);
    }
}
