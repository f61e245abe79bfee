//! End-to-end lifecycle tests against scripted host and peer shells.

use std::time::Duration;

use nicstress::config::StressConfig;
use nicstress::endpoint::{Endpoint, FileAccess, Side};
use nicstress::exec::{CommandResult, MockConnector, MockShell, Shell};
use nicstress::harness;
use nicstress::orchestrator::{Orchestrator, Outcome, RunReport};

const CONFIG: &str = r#"
host_address = "10.0.0.1"
peer_address = "10.0.0.2"
peer_user = "root"
peer_password = "secret"
host_interfaces = ["eth0", "eth1"]
peer_interfaces = ["eth2", "eth3"]
net_ids = ["10", "11"]
duration_hours = 1
"#;

const BPT: &str = "# generated by build_net\nother_ids=\neth0 n\neth1 n\neth2 n\neth3 n\n";

fn ping_ok() -> CommandResult {
    CommandResult::ok("All networks ping Ok")
}

fn ping_failed() -> CommandResult {
    CommandResult::failed("net 10 no reply", 1)
}

/// A side on which every harness step succeeds.
fn healthy(name: &str, interfaces: [&str; 2]) -> MockShell {
    scripted(name, interfaces, vec![ping_ok()])
}

/// Like [`healthy`], with `pingum` answering from `ping` in order.
fn scripted(name: &str, interfaces: [&str; 2], ping: Vec<CommandResult>) -> MockShell {
    let shell = MockShell::new(name);
    shell.on_sequence("pingum", ping);
    shell.on("uname -m", CommandResult::ok("ppc64le"));
    shell.on("hostname", CommandResult::ok(name));
    shell.on("ip addr list", CommandResult::ok("192.168.50.7"));
    shell.on(
        "-query",
        CommandResult::ok(&format!(
            "/dev/{} ACTIVE\n/dev/{} ACTIVE",
            interfaces[0], interfaces[1]
        )),
    );
    shell.on("htx.d status", CommandResult::ok("htxd is running"));
    shell.put_file("/etc/os-release", "NAME=\"Red Hat\"\nID=\"rhel\"\n");
    shell.put_file(harness::HOSTS_FILE, "127.0.0.1 localhost\n");
    shell.put_file(harness::TOPOLOGY_FILE, BPT);
    for intf in interfaces {
        shell.put_file(
            &format!("/etc/sysconfig/network-scripts/ifcfg-{intf}"),
            &format!("DEVICE={intf}\nIPADDR=0.0.0.0\n"),
        );
    }
    shell
}

fn healthy_pair() -> (MockShell, MockShell) {
    let host = healthy("lpar-host", ["eth0", "eth1"]);
    host.put_file(harness::ERROR_LOG, "");
    let peer = healthy("lpar-peer", ["eth2", "eth3"]);
    (host, peer)
}

async fn run(host: &MockShell, connector: MockConnector) -> RunReport {
    let config = StressConfig::parse(CONFIG).unwrap();
    let host_ep = Endpoint::new(
        Side::Host,
        config.host_endpoint(),
        Box::new(host.clone()),
        FileAccess::ViaShell,
        Duration::from_secs(5),
    );
    Orchestrator::new(config, host_ep, connector).run().await
}

fn assert_torn_down_once(shell: &MockShell) {
    assert_eq!(shell.count("htx.d status"), 1, "{} teardown count", shell.label());
    assert!(shell.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_clean_run_passes_and_patches_both_sides() {
    let (host, peer) = healthy_pair();

    let report = run(&host, MockConnector::new(peer.clone())).await;

    assert_eq!(report.outcome, Outcome::Passed, "{}", report.message);
    assert_eq!(report.failed_phase, None);
    assert_eq!(report.monitor_ticks, 60);

    let host_bpt = host.file(harness::TOPOLOGY_FILE).unwrap();
    assert!(host_bpt.contains("other_ids=10.0.0.1:10.0.0.2"));
    assert!(host_bpt.contains("eth0 10") && host_bpt.contains("eth1 11"));
    let peer_bpt = peer.file(harness::TOPOLOGY_FILE).unwrap();
    assert!(peer_bpt.contains("other_ids=10.0.0.2:10.0.0.1"));
    assert!(peer_bpt.contains("eth2 10") && peer_bpt.contains("eth3 11"));

    for shell in [&host, &peer] {
        let hosts = shell.file(harness::HOSTS_FILE).unwrap();
        assert!(hosts.contains("lpar-host 10.0.0.1"));
        assert!(hosts.contains("lpar-peer 10.0.0.2"));
        assert_eq!(shell.count("htxcmdline -run -mdt net.mdt"), 1);
        assert_torn_down_once(shell);
    }

    let ifcfg = peer
        .file("/etc/sysconfig/network-scripts/ifcfg-eth2")
        .unwrap();
    assert!(ifcfg.contains("IPADDR=192.168.50.7"));
    assert_eq!(report.teardown.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_mirrored_phases_run_host_before_peer() {
    let (host, peer) = healthy_pair();
    run(&host, MockConnector::new(peer.clone())).await;

    let host_cmds = host.commands();
    let peer_cmds = peer.commands();
    let position = |cmds: &[String], needle: &str| cmds.iter().position(|c| c.contains(needle));
    // Activation order within a side.
    let order = ["build_net help", "ls /usr/lpp/htx/bpt", "pingum", "htxd_run", "-select", "-activate", "-run -mdt"];
    for cmds in [&host_cmds, &peer_cmds] {
        let positions: Vec<usize> = order.iter().map(|n| position(cmds, n).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_tears_down_host_only() {
    let (host, _) = healthy_pair();

    let report = run(&host, MockConnector::failing("Permission denied")).await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.failed_phase.as_deref(), Some("setup"));
    assert_eq!(report.error_kind.as_deref(), Some("connection"));
    assert_torn_down_once(&host);
    assert_eq!(host.count("pingum"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_peer_ping_exhaustion_fails_after_ten_attempts() {
    let (host, _) = healthy_pair();
    let peer = scripted("lpar-peer", ["eth2", "eth3"], vec![ping_failed()]);

    let report = run(&host, MockConnector::new(peer.clone())).await;

    assert_eq!(report.failed_phase.as_deref(), Some("ping_verify"));
    assert_eq!(report.error_kind.as_deref(), Some("connectivity"));
    assert!(report.message.contains("peer after 10 attempts"));
    assert_eq!(host.count("pingum"), 1);
    assert_eq!(peer.count("pingum"), 10);
    assert_eq!(host.count("htxd_run"), 0);
    assert_eq!(report.monitor_ticks, 0);
    assert_torn_down_once(&host);
    assert_torn_down_once(&peer);
}

#[tokio::test(start_paused = true)]
async fn test_ping_recovers_on_fourth_attempt() {
    let host = scripted(
        "lpar-host",
        ["eth0", "eth1"],
        vec![ping_failed(), ping_failed(), ping_failed(), ping_ok()],
    );
    host.put_file(harness::ERROR_LOG, "");
    let peer = healthy("lpar-peer", ["eth2", "eth3"]);

    let report = run(&host, MockConnector::new(peer.clone())).await;

    assert!(report.passed(), "{}", report.message);
    assert_eq!(host.count("pingum"), 4);
    // Three restarts between attempts, one more in teardown.
    assert_eq!(host.count("systemctl restart network"), 4);
    assert_eq!(peer.count("pingum"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_error_on_first_tick_stops_run() {
    let (host, peer) = healthy_pair();
    peer.put_file(harness::ERROR_LOG, "hxecom: miscompare on eth3\n");

    let report = run(&host, MockConnector::new(peer.clone())).await;

    assert_eq!(report.failed_phase.as_deref(), Some("monitor"));
    assert_eq!(report.error_kind.as_deref(), Some("monitor"));
    assert!(report.message.contains("miscompare on eth3"));
    assert_eq!(report.monitor_ticks, 1);
    assert_eq!(peer.count("cat /tmp/htxerr"), 1);
    assert_torn_down_once(&host);
    assert_torn_down_once(&peer);
}

#[tokio::test(start_paused = true)]
async fn test_missing_other_ids_fails_before_activation() {
    let (host, peer) = healthy_pair();
    host.put_file(harness::TOPOLOGY_FILE, "eth0 n\neth1 n\n");

    let report = run(&host, MockConnector::new(peer.clone())).await;

    assert_eq!(report.failed_phase.as_deref(), Some("patch_other_ids"));
    assert_eq!(report.error_kind.as_deref(), Some("config_validation"));
    for shell in [&host, &peer] {
        assert_eq!(shell.count("-activate"), 0);
        assert_eq!(shell.count("htxd_run"), 0);
        assert_torn_down_once(shell);
    }
    assert_eq!(host.file(harness::TOPOLOGY_FILE).unwrap(), "eth0 n\neth1 n\n");
}

#[tokio::test(start_paused = true)]
async fn test_inactive_device_fails_verification() {
    let (host, _) = healthy_pair();
    let peer = MockShell::new("lpar-peer");
    peer.on("-query", CommandResult::ok("/dev/eth2 ACTIVE\n/dev/eth3 INACTIVE"));
    peer.on("hostname", CommandResult::ok("lpar-peer"));
    peer.on("pingum", ping_ok());
    peer.on("htx.d status", CommandResult::ok("htxd is running"));
    peer.put_file("/etc/os-release", "ID=ubuntu\n");
    peer.put_file(harness::HOSTS_FILE, "");
    peer.put_file(harness::TOPOLOGY_FILE, BPT);

    let report = run(&host, MockConnector::new(peer.clone())).await;

    assert_eq!(report.failed_phase.as_deref(), Some("verify_devices_active"));
    assert_eq!(report.error_kind.as_deref(), Some("activation_verification"));
    assert!(report.message.contains("eth3"));
    assert_eq!(host.count("htxcmdline -run"), 0);
    // Not all active on the peer, so only the host shuts its descriptor down.
    assert_eq!(peer.count("-shutdown -mdt"), 0);
    assert_eq!(host.count("-shutdown -mdt"), 1);
    assert_torn_down_once(&host);
    assert_torn_down_once(&peer);
}
