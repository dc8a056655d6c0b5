//! Address pool allocator
//!
//! Ids come from a durable, strictly monotonic counter and are never
//! recycled, even after the peer holding them is deleted. The composed
//! address is a pure function of the id.

use crate::db::{now_epoch_secs, Database};
use crate::types::PoolStatus;
use crate::{Error, Result};
use rusqlite::{params, OptionalExtension, Transaction};
use std::net::Ipv6Addr;
use tracing::{error, info, warn};

pub const MIN_POOL_BITS: u8 = 1;
pub const MAX_POOL_BITS: u8 = 32;

/// Validated pool parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    prefix: String,
    bits: u8,
}

impl PoolConfig {
    /// Validate prefix and width. Fails with `InvalidConfig`; meant to run
    /// once at startup.
    pub fn new(prefix: impl Into<String>, bits: u8) -> Result<Self> {
        let prefix = prefix.into().trim_end_matches(':').to_string();

        if !(MIN_POOL_BITS..=MAX_POOL_BITS).contains(&bits) {
            return Err(Error::InvalidConfig(format!(
                "pool bits must be between {} and {} (got {})",
                MIN_POOL_BITS, MAX_POOL_BITS, bits
            )));
        }
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(Error::InvalidConfig(format!(
                "pool prefix '{}' must be hex groups separated by ':'",
                prefix
            )));
        }

        let config = Self { prefix, bits };

        // Every id in the pool must yield a parseable address; checking both
        // ends covers the group count of the widest id.
        for id in [1, config.max_id()] {
            let address = config.compose(id);
            if address.parse::<Ipv6Addr>().is_err() {
                return Err(Error::InvalidConfig(format!(
                    "pool prefix '{}' with {} bits composes invalid address {}",
                    config.prefix, bits, address
                )));
            }
        }

        Ok(config)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Largest allocatable id, `2^bits - 1`
    pub fn max_id(&self) -> u32 {
        ((1u64 << self.bits) - 1) as u32
    }

    /// Compose the address for `id`: zero-padded lowercase hex, split into
    /// 16-bit groups from the right, appended to the prefix after `::`.
    pub fn compose(&self, id: u32) -> String {
        let width = (self.bits as usize + 3) / 4;
        let digits = format!("{:0width$x}", id, width = width);

        let mut groups = Vec::new();
        let mut end = digits.len();
        while end > 0 {
            let start = end.saturating_sub(4);
            groups.push(&digits[start..end]);
            end = start;
        }
        groups.reverse();

        format!("{}::{}", self.prefix, groups.join(":"))
    }
}

/// A successful allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub id: u32,
    pub address: String,
}

/// Hands out unique addresses from the durable pool counter
#[derive(Clone)]
pub struct AddressPool {
    db: Database,
    config: PoolConfig,
}

impl AddressPool {
    pub fn new(db: Database, config: PoolConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Allocate the next address.
    ///
    /// Read, increment and write happen in one IMMEDIATE transaction.
    /// Exhaustion and collisions roll back, leaving the counter untouched.
    pub fn allocate(&self) -> Result<Allocation> {
        let max_id = self.config.max_id();

        let allocation = self.db.with_immediate_transaction(|tx| {
            let last = read_counter(tx)?;
            if last >= max_id {
                warn!("Address pool exhausted at id {} (max {})", last, max_id);
                return Err(Error::PoolExhausted { max_id });
            }

            let next = last + 1;
            let address = self.config.compose(next);

            let holder: Option<String> = tx
                .query_row(
                    "SELECT name FROM peers WHERE address = ?1 OR pool_id = ?2",
                    params![address, next],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(holder) = holder {
                error!(
                    "Pool id {} ({}) is already held by peer {}; counter left at {}",
                    next, address, holder, last
                );
                return Err(Error::AllocationFailed(format!(
                    "address {} already assigned",
                    address
                )));
            }

            tx.execute(
                "UPDATE pool_counter SET last_allocated_id = ?1, updated_at = ?2 WHERE id = 1",
                params![next, now_epoch_secs()],
            )?;

            Ok(Allocation { id: next, address })
        })?;

        info!("Allocated pool id {} -> {}", allocation.id, allocation.address);
        Ok(allocation)
    }

    /// Current pool usage
    pub fn status(&self) -> Result<PoolStatus> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let last: i64 = conn.query_row(
            "SELECT last_allocated_id FROM pool_counter WHERE id = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(PoolStatus {
            bits: self.config.bits,
            last_allocated_id: counter_value(last)?,
            max_id: self.config.max_id(),
        })
    }

    /// Startup check that the durable counter still fits the configured
    /// width. A counter past `max_id` means the pool was narrowed after ids
    /// were handed out.
    pub fn check_counter(&self) -> Result<PoolStatus> {
        let status = self.status()?;
        if status.last_allocated_id > status.max_id {
            return Err(Error::InvalidConfig(format!(
                "pool counter is at {} but {} bits allow at most {}; widen pool.bits",
                status.last_allocated_id, status.bits, status.max_id
            )));
        }
        Ok(status)
    }
}

fn read_counter(tx: &Transaction<'_>) -> Result<u32> {
    let last: i64 = tx.query_row(
        "SELECT last_allocated_id FROM pool_counter WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    counter_value(last)
}

fn counter_value(raw: i64) -> Result<u32> {
    u32::try_from(raw)
        .map_err(|_| Error::Internal(format!("pool counter out of range: {}", raw)))
}
