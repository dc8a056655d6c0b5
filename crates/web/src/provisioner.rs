//! Provisioning coordinator
//!
//! Orders the peer store, address pool and network applier for create and
//! delete. Create writes the record first and compensates by deleting it when
//! the interface refuses the peer; delete touches the interface first and
//! only drops the record once the peer is gone from the network.
//!
//! Everything after the first durable write runs on a spawned task, so a
//! dropped request still finishes the external effect and its compensation.
//! While that task runs the name is claimed, and other requests for it get
//! `Conflict` instead of a record whose interface state is not settled.

use crate::applier::{ApplyOutcome, NetworkApplier};
use crate::config::TunnelConfig;
use parking_lot::Mutex;
use peergate_common::db::now_epoch_secs;
use peergate_common::validate::{validate_name, validate_public_key};
use peergate_common::{AddressPool, Error, Peer, PeerStore, PoolStatus, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of CreatePeer
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub peer: Peer,
    /// False when the name already existed and nothing was changed
    pub created: bool,
}

/// Everything a client needs to bring up its side of the tunnel
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    pub address: String,
    pub server_public_key: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    pub allowed_ips: String,
    pub keepalive: u16,
    pub wg_conf: String,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Holds a name in the in-flight set until dropped
struct NameClaim {
    in_flight: InFlight,
    name: String,
}

impl Drop for NameClaim {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.name);
    }
}

/// Outcome of looking a name up under the in-flight lock
enum Slot {
    Claimed(NameClaim),
    Existing(Peer),
}

fn in_progress(name: &str) -> Error {
    Error::Conflict(format!("peer '{}' has a change in progress; retry later", name))
}

pub struct Provisioner {
    peers: PeerStore,
    pool: AddressPool,
    applier: Arc<dyn NetworkApplier>,
    tunnel: TunnelConfig,
    in_flight: InFlight,
}

impl Provisioner {
    pub fn new(
        peers: PeerStore,
        pool: AddressPool,
        applier: Arc<dyn NetworkApplier>,
        tunnel: TunnelConfig,
    ) -> Self {
        Self {
            peers,
            pool,
            applier,
            tunnel,
            in_flight: Arc::default(),
        }
    }

    /// Claim `name`, or return its settled record when one exists.
    ///
    /// The in-flight lock is held across the lookup so a record is never
    /// observed between its insert and the end of its apply/compensate step.
    fn claim_or_existing(&self, name: &str) -> Result<Slot> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains(name) {
            return Err(in_progress(name));
        }
        if let Some(existing) = self.peers.find_by_name(name)? {
            return Ok(Slot::Existing(existing));
        }
        in_flight.insert(name.to_string());
        Ok(Slot::Claimed(NameClaim {
            in_flight: self.in_flight.clone(),
            name: name.to_string(),
        }))
    }

    fn claim(&self, name: &str) -> Result<NameClaim> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(name.to_string()) {
            return Err(in_progress(name));
        }
        Ok(NameClaim {
            in_flight: self.in_flight.clone(),
            name: name.to_string(),
        })
    }

    /// Create a peer, or return the existing one with the same name
    pub async fn create_peer(&self, name: &str, public_key: &str) -> Result<Provisioned> {
        validate_name(name)?;
        validate_public_key(public_key)?;

        let claim = match self.claim_or_existing(name)? {
            Slot::Claimed(claim) => claim,
            Slot::Existing(existing) => {
                if existing.public_key != public_key {
                    warn!(
                        "Create for existing peer {} with a different public key; returning stored record",
                        name
                    );
                }
                return Ok(Provisioned {
                    peer: existing,
                    created: false,
                });
            }
        };

        if let Some(holder) = self.peers.find_by_public_key(public_key)? {
            return Err(Error::Conflict(format!(
                "public key already registered to peer '{}'",
                holder.name
            )));
        }

        let allocation = self.pool.allocate()?;
        let peer = Peer {
            name: name.to_string(),
            public_key: public_key.to_string(),
            address: allocation.address,
            pool_id: allocation.id,
            created_at: now_epoch_secs(),
        };

        // A conflict here means another request won the key; the allocated
        // address stays consumed.
        let peer = self.peers.insert(&peer).map_err(|e| {
            if matches!(e, Error::Conflict(_)) {
                warn!(
                    "Insert of {} lost a race; pool id {} ({}) is abandoned",
                    name, peer.pool_id, peer.address
                );
            }
            e
        })?;

        let peers = self.peers.clone();
        let applier = self.applier.clone();
        let task = tokio::spawn(async move {
            let _claim = claim;
            apply_create(&peers, applier.as_ref(), peer).await
        });
        task.await
            .map_err(|e| Error::Internal(format!("create task for '{}' failed: {}", name, e)))?
    }

    /// Remove a peer from the interface, then from the store
    pub async fn delete_peer(&self, name: &str) -> Result<Peer> {
        let claim = self.claim(name)?;
        let peer = self
            .peers
            .find_by_name(name)?
            .ok_or_else(|| Error::peer_not_found(name))?;

        let peers = self.peers.clone();
        let applier = self.applier.clone();
        let task = tokio::spawn(async move {
            let _claim = claim;
            apply_delete(&peers, applier.as_ref(), peer).await
        });
        task.await
            .map_err(|e| Error::Internal(format!("delete task for '{}' failed: {}", name, e)))?
    }

    pub fn get_peer(&self, name: &str) -> Result<Peer> {
        self.peers
            .find_by_name(name)?
            .ok_or_else(|| Error::peer_not_found(name))
    }

    pub fn list_peers(&self) -> Result<Vec<Peer>> {
        self.peers.list()
    }

    pub fn pool_status(&self) -> Result<PoolStatus> {
        self.pool.status()
    }

    /// Connection parameters and rendered config for a peer
    pub fn client_config(&self, peer: &Peer) -> ClientConfig {
        ClientConfig {
            address: peer.address.clone(),
            server_public_key: self.tunnel.server_public_key.clone(),
            endpoint: self.tunnel.endpoint(),
            dns: self.tunnel.dns.clone(),
            allowed_ips: self.tunnel.allowed_ips.clone(),
            keepalive: self.tunnel.keepalive,
            wg_conf: render_client_config(peer, &self.tunnel),
        }
    }
}

/// Apply a freshly inserted peer, deleting the record if the interface
/// refuses it
async fn apply_create(
    peers: &PeerStore,
    applier: &dyn NetworkApplier,
    peer: Peer,
) -> Result<Provisioned> {
    match applier.apply_create(&peer.public_key, &peer.address).await {
        ApplyOutcome::Applied { .. } => {
            info!("Provisioned peer {} at {}", peer.name, peer.address);
            Ok(Provisioned {
                peer,
                created: true,
            })
        }
        ApplyOutcome::Failed(failure) => {
            warn!(
                "Interface rejected peer {} ({}); rolling back record",
                peer.name, failure
            );
            if let Err(e) = peers.delete(&peer.name) {
                error!(
                    "Compensation failed for peer {} at {}: {}; record is stale",
                    peer.name, peer.address, e
                );
                return Err(Error::Inconsistent(format!(
                    "peer '{}' could not be applied ({}) and its record could not be removed: {}",
                    peer.name, failure, e
                )));
            }
            Err(Error::ExternalFailure(failure))
        }
    }
}

/// Remove a peer from the interface, then drop its record
async fn apply_delete(peers: &PeerStore, applier: &dyn NetworkApplier, peer: Peer) -> Result<Peer> {
    if let ApplyOutcome::Failed(failure) =
        applier.apply_delete(&peer.public_key, &peer.address).await
    {
        warn!(
            "Interface removal of peer {} failed ({}); record kept",
            peer.name, failure
        );
        return Err(Error::ExternalFailure(failure));
    }

    match peers.delete(&peer.name) {
        Ok(()) => {
            info!("Deprovisioned peer {} at {}", peer.name, peer.address);
            Ok(peer)
        }
        Err(Error::NotFound { .. }) => {
            warn!("Peer {} was already removed from the store", peer.name);
            Ok(peer)
        }
        Err(e) => {
            error!(
                "Peer {} removed from interface but record delete failed: {}",
                peer.name, e
            );
            Err(Error::Inconsistent(format!(
                "peer '{}' was removed from the interface but its record remains: {}",
                peer.name, e
            )))
        }
    }
}

/// Render a client-side WireGuard config. The private key stays a
/// placeholder; it never leaves the client.
pub fn render_client_config(peer: &Peer, tunnel: &TunnelConfig) -> String {
    let dns_line = tunnel
        .dns
        .as_ref()
        .map(|d| format!("DNS = {}\n", d))
        .unwrap_or_default();

    format!(
        r#"# WireGuard configuration for {name}

[Interface]
PrivateKey = <your-private-key>
Address = {address}/128
{dns_line}
[Peer]
PublicKey = {server_key}
Endpoint = {endpoint}
AllowedIPs = {allowed_ips}
PersistentKeepalive = {keepalive}
"#,
        name = peer.name,
        address = peer.address,
        dns_line = dns_line,
        server_key = tunnel.server_public_key,
        endpoint = tunnel.endpoint(),
        allowed_ips = tunnel.allowed_ips,
        keepalive = tunnel.keepalive,
    )
}
