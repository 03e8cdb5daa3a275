//! pulsed — the netpulse daemon.
//!
//! Single binary that assembles the monitor:
//! - State store (redb)
//! - Event bus
//! - Ping prober
//! - Sweeper loop
//!
//! # Usage
//!
//! ```text
//! pulsed device add gateway 192.168.1.1
//! pulsed run --interval 300
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use netpulse_bus::{EventBus, SweepEvent, Topic};
use netpulse_probe::PingProber;
use netpulse_state::{NewDevice, StateStore};
use netpulse_sweep::{SweepConfig, Sweeper};

#[derive(Parser)]
#[command(name = "pulsed", about = "netpulse reachability monitor")]
struct Cli {
    /// Data directory for persistent state.
    #[arg(long, global = true, default_value = "/var/lib/netpulse")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sweep loop in the foreground.
    Run {
        /// Idle delay between sweeps, in seconds.
        #[arg(long, default_value = "300")]
        interval: u64,

        /// Echo requests per device probe.
        #[arg(long, default_value = "1")]
        probe_count: u32,

        /// Per-request probe timeout in seconds.
        #[arg(long, default_value = "1")]
        probe_timeout: u64,
    },

    /// Manage registered devices.
    Device {
        #[command(subcommand)]
        command: DeviceCommand,
    },
}

#[derive(Subcommand)]
enum DeviceCommand {
    /// Register a device for monitoring.
    Add {
        /// Display name.
        name: String,

        /// IPv4 probe target.
        address: Ipv4Addr,

        /// Free-form description.
        #[arg(long)]
        descr: Option<String>,

        /// Register administratively disabled.
        #[arg(long)]
        disabled: bool,
    },

    /// List registered devices as JSON.
    List,

    /// Remove a device by id.
    Remove { id: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pulsed=debug,netpulse=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let store = open_store(&cli.data_dir)?;

    match cli.command {
        Command::Run {
            interval,
            probe_count,
            probe_timeout,
        } => {
            let config = SweepConfig {
                idle_interval: Duration::from_secs(interval),
                probe_count,
                probe_timeout_secs: probe_timeout,
            };
            run(store, config).await
        }
        Command::Device { command } => device(store, command),
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("netpulse.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

async fn run(store: StateStore, config: SweepConfig) -> anyhow::Result<()> {
    info!("netpulse daemon starting");

    // ── Event bus ──────────────────────────────────────────────

    let bus = EventBus::new();
    bus.subscribe(Topic::NewRoutine, |event| {
        if let SweepEvent::NewRoutine { id, timestamp } = event {
            info!(routine_id = id, timestamp, "routine started");
        }
        Ok(())
    });
    bus.subscribe(Topic::PingDone, |event| {
        if let SweepEvent::PingDone(ping) = event {
            info!(
                device_id = ping.device_id,
                rtt = ping.rtt,
                failed = ping.failed,
                "ping recorded"
            );
        }
        Ok(())
    });
    bus.subscribe(Topic::RoutineEnd, |event| {
        if let SweepEvent::RoutineEnd { id, .. } = event {
            info!(routine_id = id, "routine ended");
        }
        Ok(())
    });

    // ── Sweeper ────────────────────────────────────────────────

    let prober = PingProber::new(config.probe_config());
    let sweeper = Arc::new(Sweeper::new(store, prober, bus, config));
    sweeper.start();
    info!("sweep loop started");

    // ── Shutdown ───────────────────────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    sweeper.clear();

    info!("netpulse daemon stopped");
    Ok(())
}

fn device(store: StateStore, command: DeviceCommand) -> anyhow::Result<()> {
    match command {
        DeviceCommand::Add {
            name,
            address,
            descr,
            disabled,
        } => {
            let device = store.add_device(&NewDevice {
                name,
                address,
                descr,
                disabled,
            })?;
            println!("{}", serde_json::to_string_pretty(&device)?);
        }
        DeviceCommand::List => {
            let devices = store.list_devices()?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        DeviceCommand::Remove { id } => {
            if store.delete_device(id)? {
                println!("device {id} removed");
            } else {
                anyhow::bail!("no device with id {id}");
            }
        }
    }
    Ok(())
}
