//! Peer inspection commands
//!
//! Read-only: creating and deleting peers has to go through the API so the
//! interface and the store stay in step.

use anyhow::Result;
use clap::Subcommand;
use peergate_common::{Error, Peer, PeerStore};
use peergate_web::provisioner::render_client_config;
use serde::Serialize;

use super::Context;
use crate::output::{format_time, print_item, print_list, TableDisplay};

#[derive(Subcommand)]
pub enum PeerCommands {
    /// List provisioned peers
    List,

    /// Show one peer
    Get {
        /// Peer name
        name: String,

        /// Print the client WireGuard config instead
        #[arg(long)]
        wg_conf: bool,
    },
}

#[derive(Serialize)]
pub struct PeerDisplay {
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub pool_id: u32,
    pub created_at: i64,
}

impl From<Peer> for PeerDisplay {
    fn from(peer: Peer) -> Self {
        Self {
            name: peer.name,
            address: peer.address,
            public_key: peer.public_key,
            pool_id: peer.pool_id,
            created_at: peer.created_at,
        }
    }
}

impl TableDisplay for PeerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Address", "Public Key", "Pool ID", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.address.clone(),
            self.public_key.clone(),
            self.pool_id.to_string(),
            format_time(self.created_at),
        ]
    }
}

pub fn execute(cmd: PeerCommands, ctx: &Context) -> Result<()> {
    let store = PeerStore::new(ctx.db.clone());

    match cmd {
        PeerCommands::List => {
            let peers: Vec<PeerDisplay> =
                store.list()?.into_iter().map(PeerDisplay::from).collect();
            print_list(&peers, "No peers provisioned.", ctx.format)?;
        }

        PeerCommands::Get { name, wg_conf } => {
            let peer = store
                .find_by_name(&name)?
                .ok_or_else(|| Error::peer_not_found(&name))?;
            if wg_conf {
                print!("{}", render_client_config(&peer, &ctx.config.tunnel));
            } else {
                print_item(&PeerDisplay::from(peer), ctx.format)?;
            }
        }
    }

    Ok(())
}
