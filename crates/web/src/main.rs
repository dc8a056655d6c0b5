//! Peergate daemon
//!
//! Serves the peer provisioning API.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use peergate_common::Database;
use peergate_web::{
    config::ServerConfig, server, HelperApplier, NetworkApplier, RecordingApplier,
};

#[derive(Parser)]
#[command(name = "peergated")]
#[command(about = "Peergate - tunnel peer provisioning API")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PEERGATE_CONFIG", default_value = "/etc/peergate/peergate.toml")]
    config: PathBuf,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Record interface changes instead of running the helper
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    info!("Peergate v{}", peergate_common::VERSION);

    let mut config = ServerConfig::load(&cli.config)?;
    config.apply_env()?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let pool = if cli.dry_run {
        config.validate_static()?
    } else {
        config.validate()?
    };
    let applier: Arc<dyn NetworkApplier> = if cli.dry_run {
        warn!("Dry run: interface changes are recorded, not applied");
        Arc::new(RecordingApplier::new())
    } else {
        Arc::new(HelperApplier::new(&config.applier))
    };
    info!(
        "Address pool {} ({} bits, max id {})",
        pool.prefix(),
        pool.bits(),
        pool.max_id()
    );

    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(&config.db_path)?;
    info!("State database {}", config.db_path.display());

    let addr: SocketAddr = config.listen.parse()?;
    let state = server::build_state(&config, pool, db, applier)?;
    server::serve(addr, state).await
}
