//! CLI Commands

pub mod peer;
pub mod pool;
pub mod token;

use crate::output::OutputFormat;
use peergate_common::Database;
use peergate_web::ServerConfig;

/// Shared state for every command
pub struct Context {
    pub db: Database,
    pub config: ServerConfig,
    pub format: OutputFormat,
}
