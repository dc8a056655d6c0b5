//! Peergate provisioning API
//!
//! Authorizes requests, allocates tunnel addresses and applies peers to the
//! live interface through a privileged helper.

pub mod applier;
pub mod auth;
pub mod config;
pub mod provisioner;
pub mod routes;
pub mod server;

pub use applier::{ApplyOutcome, HelperApplier, NetworkApplier, RecordingApplier};
pub use auth::{AuthPolicy, CredentialAuthority};
pub use config::ServerConfig;
pub use provisioner::{ClientConfig, Provisioned, Provisioner};
pub use routes::{router, AppState};
