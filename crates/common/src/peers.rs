//! Peer store
//!
//! Source of truth for what should be configured on the tunnel interface.
//! Uniqueness of name, public key, address and pool id is enforced by the
//! schema, so concurrent inserts cannot slip past a check-then-insert window.

use crate::db::Database;
use crate::error::is_unique_violation;
use crate::types::Peer;
use crate::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

const PEER_COLUMNS: &str = "name, public_key, address, pool_id, created_at";

#[derive(Clone)]
pub struct PeerStore {
    db: Database,
}

impl PeerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Peer>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let peer = conn
            .query_row(
                &format!("SELECT {} FROM peers WHERE name = ?1", PEER_COLUMNS),
                params![name],
                peer_from_row,
            )
            .optional()?;
        Ok(peer)
    }

    pub fn find_by_public_key(&self, public_key: &str) -> Result<Option<Peer>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let peer = conn
            .query_row(
                &format!("SELECT {} FROM peers WHERE public_key = ?1", PEER_COLUMNS),
                params![public_key],
                peer_from_row,
            )
            .optional()?;
        Ok(peer)
    }

    /// Insert a peer. Any uniqueness violation becomes `Conflict`.
    pub fn insert(&self, peer: &Peer) -> Result<Peer> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO peers (name, public_key, address, pool_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                peer.name,
                peer.public_key,
                peer.address,
                peer.pool_id,
                peer.created_at,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!(
                    "peer '{}' conflicts with an existing name, key or address",
                    peer.name
                ))
            } else {
                Error::Database(e)
            }
        })?;

        info!("Stored peer {} at {}", peer.name, peer.address);
        Ok(peer.clone())
    }

    /// Delete a peer by name
    pub fn delete(&self, name: &str) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let rows = conn.execute("DELETE FROM peers WHERE name = ?1", params![name])?;
        if rows == 0 {
            return Err(Error::peer_not_found(name));
        }
        debug!("Deleted peer {}", name);
        Ok(())
    }

    /// All peers, oldest first
    pub fn list(&self) -> Result<Vec<Peer>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM peers ORDER BY pool_id ASC",
            PEER_COLUMNS
        ))?;

        let rows = stmt.query_map([], peer_from_row)?;
        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM peers", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn peer_from_row(row: &Row<'_>) -> rusqlite::Result<Peer> {
    Ok(Peer {
        name: row.get(0)?,
        public_key: row.get(1)?,
        address: row.get(2)?,
        pool_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}
