//! Server bootstrap: wire the components from a validated config and serve

use crate::applier::NetworkApplier;
use crate::auth::CredentialAuthority;
use crate::config::ServerConfig;
use crate::provisioner::Provisioner;
use crate::routes::{router, AppState};
use peergate_common::{AddressPool, Database, PeerStore, PoolConfig, Result, TokenStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Build application state on an open database.
///
/// Fails with `InvalidConfig` when the stored counter is already past what
/// `pool.bits` can address, which happens after narrowing the pool.
pub fn build_state(
    config: &ServerConfig,
    pool: PoolConfig,
    db: Database,
    applier: Arc<dyn NetworkApplier>,
) -> Result<AppState> {
    let pool = AddressPool::new(db.clone(), pool);
    let status = pool.check_counter()?;
    info!(
        "Address pool counter at {} of {}",
        status.last_allocated_id, status.max_id
    );

    let authority = CredentialAuthority::new(
        config.auth.master_token.clone(),
        TokenStore::new(db.clone()),
    );
    let provisioner = Provisioner::new(
        PeerStore::new(db.clone()),
        pool,
        applier,
        config.tunnel.clone(),
    );
    Ok(AppState {
        authority,
        provisioner,
    })
}

/// Serve until ctrl-c
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Peergate API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(Arc::new(state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Peergate API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received shutdown signal");
    }
}
