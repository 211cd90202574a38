//! kvmlink relay daemon
//!
//! Exposes the KVM devices listed in the configuration through rendezvous
//! ports on this host, announces them to the directory service, and keeps
//! a liveness heartbeat running until shutdown.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use config::Config;
use kvmlink_registry::{OverlayIdentity, RegistryClient, start_heartbeat};
use kvmlink_relay::RelayManager;

/// kvmlink - overlay relay for private-LAN KVM devices
#[derive(Parser)]
#[command(name = "kvmlinkd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start relays for all configured devices and run until ctrl-c
    Run,

    /// List the relays the current configuration would expose
    Plan,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Commands::Init { force } = cli.command {
        return init_config(&config_path, force);
    }

    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        })
        .init();

    match cli.command {
        Commands::Run => run(&config).await,
        Commands::Plan => plan(&config),
        Commands::Init { .. } => unreachable!("handled before logging init"),
    }
}

/// Start every configured relay, register, heartbeat, wait for ctrl-c.
async fn run(config: &Config) -> anyhow::Result<()> {
    if config.devices.is_empty() {
        anyhow::bail!("no devices configured; add [[device]] entries or run `kvmlinkd init`");
    }

    let manager = Arc::new(RelayManager::new(config.manager_config()));
    for device in &config.devices {
        match manager.start_relay(device.ip, device.port, &device.name).await {
            Ok(port) => info!(device = %device.ip, name = %device.name, port, "relay ready"),
            Err(e) => warn!(device = %device.ip, error = %e, "relay not started"),
        }
    }

    let identity = OverlayIdentity::discover(&config.overlay.prefix);
    match identity {
        Some(id) => info!(overlay = %id, "overlay identity"),
        None => warn!(
            prefix = %config.overlay.prefix,
            "no overlay address found; registration and heartbeats suspended"
        ),
    }

    for snapshot in manager.list_relays(identity.map(|id| id.ip())) {
        info!(
            device = %snapshot.device_ip,
            name = %snapshot.device_name,
            tcp = snapshot.tcp_listen_port,
            udp = snapshot.udp_listen_port,
            url = snapshot.url.as_deref().unwrap_or("-"),
            "relaying"
        );
    }

    let mut heartbeat = None;
    if config.registry.directory_url.is_empty() {
        info!("no directory service configured; running unregistered");
    } else {
        let client = Arc::new(RegistryClient::new(&config.registry.directory_url)?);
        client
            .register(
                &manager.running_entries(),
                identity,
                &config.registry.location,
            )
            .await;
        heartbeat = Some(start_heartbeat(
            client,
            manager.clone(),
            config.overlay.prefix.clone(),
            Duration::from_secs(config.registry.heartbeat_secs),
        ));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Some(task) = heartbeat {
        task.abort();
    }
    manager.stop_all().await;
    Ok(())
}

/// Print the rendezvous ports the configuration maps each device to,
/// without binding anything.
fn plan(config: &Config) -> anyhow::Result<()> {
    let bands = config.manager_config().bands;
    for device in &config.devices {
        let pair = bands.first_candidate(device.ip, device.port);
        println!(
            "{}:{} ({}) -> tcp {} / udp {}",
            device.ip,
            device.port,
            if device.name.is_empty() { "unnamed" } else { &device.name },
            pair.tcp,
            pair.udp
        );
    }
    Ok(())
}

fn init_config(path: &PathBuf, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(path)?;
    println!("wrote {}", path.display());
    Ok(())
}
