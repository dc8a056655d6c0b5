//! Address pool commands

use anyhow::Result;
use clap::Subcommand;
use peergate_common::{AddressPool, PeerStore, PoolConfig, PoolStatus};
use serde::Serialize;

use super::Context;
use crate::output::{print_item, print_warning, TableDisplay};

#[derive(Subcommand)]
pub enum PoolCommands {
    /// Show counter position and remaining capacity
    Status,
}

#[derive(Serialize)]
pub struct PoolDisplay {
    pub prefix: String,
    pub bits: u8,
    pub last_allocated_id: u32,
    pub max_id: u32,
    pub remaining: u32,
    pub peers: usize,
}

impl PoolDisplay {
    fn new(prefix: &str, status: PoolStatus, peers: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            bits: status.bits,
            last_allocated_id: status.last_allocated_id,
            max_id: status.max_id,
            remaining: status.remaining(),
            peers,
        }
    }
}

impl TableDisplay for PoolDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Prefix", "Bits", "Last ID", "Max ID", "Remaining", "Peers"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.prefix.clone(),
            self.bits.to_string(),
            self.last_allocated_id.to_string(),
            self.max_id.to_string(),
            self.remaining.to_string(),
            self.peers.to_string(),
        ]
    }
}

pub fn execute(cmd: PoolCommands, ctx: &Context) -> Result<()> {
    match cmd {
        PoolCommands::Status => {
            let config = PoolConfig::new(ctx.config.pool.prefix.clone(), ctx.config.pool.bits)?;
            let pool = AddressPool::new(ctx.db.clone(), config);
            let status = pool.status()?;
            let peers = PeerStore::new(ctx.db.clone()).count()?;

            let display = PoolDisplay::new(pool.config().prefix(), status, peers);
            print_item(&display, ctx.format)?;

            // Ids consumed by failed or deleted provisioning are never reused
            let abandoned = (status.last_allocated_id as usize).saturating_sub(peers);
            if abandoned > 0 {
                print_warning(&format!("{} pool ids are consumed without a peer", abandoned));
            }
            if let Err(e) = pool.check_counter() {
                print_warning(&e.to_string());
            } else if status.remaining() == 0 {
                print_warning("Address pool is exhausted");
            }
        }
    }

    Ok(())
}
