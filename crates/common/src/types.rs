//! Core types for Peergate

use serde::{Deserialize, Serialize};

/// A provisioned tunnel peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub public_key: String,
    /// Allocated pool address, without prefix length
    pub address: String,
    /// Pool counter value this address was composed from
    pub pool_id: u32,
    pub created_at: i64,
}

/// How a request was authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Master,
    Enrollment,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Enrollment => write!(f, "enrollment"),
        }
    }
}

/// Enrollment token record as stored (the plaintext value is never kept)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentToken {
    pub id: i64,
    pub token_hash: String,
    pub expires_at: i64,
    pub used: bool,
    pub used_at: Option<i64>,
    pub created_by: String,
    pub note: Option<String>,
    pub created_at: i64,
}

impl EnrollmentToken {
    /// Short identifier safe to print in logs and listings
    pub fn short_id(&self) -> &str {
        &self.token_hash[..self.token_hash.len().min(12)]
    }

    pub fn status(&self, now: i64) -> TokenStatus {
        if self.used {
            TokenStatus::Used
        } else if self.expires_at <= now {
            TokenStatus::Expired
        } else {
            TokenStatus::Active
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Used,
    Expired,
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Used => write!(f, "used"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Freshly issued enrollment token. `token` is shown to the operator once.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub record: EnrollmentToken,
}

/// Snapshot of pool usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub bits: u8,
    pub last_allocated_id: u32,
    pub max_id: u32,
}

impl PoolStatus {
    /// Ids left; zero when the counter sits past a narrowed pool
    pub fn remaining(&self) -> u32 {
        self.max_id.saturating_sub(self.last_allocated_id)
    }
}
