use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use nicstress::config::{LoggingConfig, StressConfig};

#[derive(Parser)]
#[command(
    name = "nicstress",
    about = "Dual-host NIC stress test driver for the HTX harness",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Config file (default: $NICSTRESS_CONFIG, then /etc/nicstress/nicstress.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full stress test: setup, activation, monitoring, teardown
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Monitoring window in hours
        #[arg(long)]
        duration_hours: Option<u64>,

        /// Harness descriptor (mdt) to select
        #[arg(long)]
        descriptor_file: Option<String>,

        /// Peer login password
        #[arg(long, env = "NICSTRESS_PEER_PASSWORD", hide_env_values = true)]
        peer_password: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Check platform, peer login, and harness installation without changes
    Preflight {
        #[command(flatten)]
        config: ConfigArgs,

        /// Peer login password
        #[arg(long, env = "NICSTRESS_PEER_PASSWORD", hide_env_values = true)]
        peer_password: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration with the password hidden
    ShowConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn load_config(args: &ConfigArgs) -> Result<StressConfig> {
    let path = StressConfig::locate(args.config.as_deref())?;
    StressConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            duration_hours,
            descriptor_file,
            peer_password,
            json,
        } => {
            let mut cfg = load_config(&config)?;
            if let Some(hours) = duration_hours {
                cfg.duration_hours = hours;
            }
            if let Some(descriptor) = descriptor_file {
                cfg.descriptor_file = descriptor;
            }
            if let Some(password) = peer_password {
                cfg.peer_password = password;
            }
            cfg.validate()?;
            init_tracing(&cfg.logging);

            tracing::info!(
                hours = cfg.duration_hours,
                descriptor = %cfg.descriptor_file,
                "Running NIC stress test"
            );
            let report = nicstress::run(cfg).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nnicstress Run Report");
                println!("{:<16} | Value", "Field");
                println!("{:-<16}-|-{:-<50}", "", "");
                let outcome = if report.passed() { "PASS" } else { "FAIL" };
                println!("{:<16} | {}", "Outcome", outcome);
                if let Some(phase) = &report.failed_phase {
                    println!("{:<16} | {}", "Failed phase", phase);
                }
                if let Some(kind) = &report.error_kind {
                    println!("{:<16} | {}", "Error", kind);
                }
                println!("{:<16} | {}", "Monitor ticks", report.monitor_ticks);
                println!(
                    "{:<16} | {} steps, {} failed",
                    "Teardown", report.teardown.attempted, report.teardown.failed
                );
                println!("{:<16} | {}", "Started", report.started_at.to_rfc3339());
                println!("{:<16} | {}", "Finished", report.finished_at.to_rfc3339());
                println!("\n{}\n", report.message);
            }

            if !report.passed() {
                bail!(
                    "stress run failed in {}",
                    report.failed_phase.as_deref().unwrap_or("unknown phase")
                );
            }
        }
        Commands::Preflight {
            config,
            peer_password,
            json,
        } => {
            let mut cfg = load_config(&config)?;
            if let Some(password) = peer_password {
                cfg.peer_password = password;
            }
            init_tracing(&cfg.logging);

            tracing::info!("Running preflight checks");
            let report = nicstress::preflight(cfg).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nnicstress Preflight (arch {})", report.arch);
                println!(
                    "{:<6} | {:<20} | {:<8} | {:<5} | Addresses",
                    "Side", "Hostname", "Distro", "HTX"
                );
                println!("{:-<6}-|-{:-<20}-|-{:-<8}-|-{:-<5}-|-{:-<30}", "", "", "", "", "");
                for facts in &report.sides {
                    let addrs: Vec<String> = facts
                        .interface_addrs
                        .iter()
                        .map(|(intf, addr)| format!("{intf}={addr}"))
                        .collect();
                    println!(
                        "{:<6} | {:<20} | {:<8} | {:<5} | {}",
                        facts.side.to_string(),
                        facts.hostname,
                        facts.distro.to_string(),
                        if facts.harness_installed { "yes" } else { "no" },
                        addrs.join(", ")
                    );
                }
                println!();
            }
        }
        Commands::ShowConfig { config } => {
            let cfg = load_config(&config)?;
            print!("{}", toml::to_string_pretty(&cfg.redacted())?);
        }
    }

    Ok(())
}
