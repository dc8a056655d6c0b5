//! Peergate CLI - Main Entry Point
//!
//! Operator tooling that works directly on the state database: enrollment
//! tokens, peer inspection and pool usage.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{peer, pool, token, Context};
use peergate_common::Database;
use peergate_web::ServerConfig;

/// Peergate CLI - tunnel peer provisioning
#[derive(Parser)]
#[command(name = "peergate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Server configuration file
    #[arg(
        short,
        long,
        env = "PEERGATE_CONFIG",
        default_value = "/etc/peergate/peergate.toml",
        global = true
    )]
    config: PathBuf,

    /// State database (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage enrollment tokens
    #[command(subcommand)]
    Token(token::TokenCommands),

    /// Inspect provisioned peers
    #[command(subcommand)]
    Peer(peer::PeerCommands),

    /// Inspect the address pool
    #[command(subcommand)]
    Pool(pool::PoolCommands),

    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("Peergate CLI v{}", peergate_common::VERSION);
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config)?;
    config.apply_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let ctx = Context {
        db: Database::open(&config.db_path)?,
        config,
        format: cli.format,
    };

    match cli.command {
        Commands::Token(cmd) => token::execute(cmd, &ctx)?,
        Commands::Peer(cmd) => peer::execute(cmd, &ctx)?,
        Commands::Pool(cmd) => pool::execute(cmd, &ctx)?,
        Commands::Version => {}
    }

    Ok(())
}
