//! Peergate Common Library
//!
//! Durable state for the provisioning gateway: the peer store, the address
//! pool counter and enrollment tokens, plus the shared error taxonomy.

pub mod crypto;
pub mod db;
pub mod error;
pub mod peers;
pub mod pool;
pub mod tokens;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, ExternalFailure, Result, UnauthorizedReason};
pub use peers::PeerStore;
pub use pool::{AddressPool, Allocation, PoolConfig};
pub use tokens::TokenStore;
pub use types::*;

/// Peergate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default state directory
pub fn default_store_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/lib/peergate")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("peers.db")
}
