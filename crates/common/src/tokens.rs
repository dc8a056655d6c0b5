//! Enrollment token store
//!
//! Tokens are single-use and time-limited. Redemption is one conditional
//! UPDATE, so two concurrent requests presenting the same token cannot both
//! succeed. Rows are never deleted; used and expired tokens stay as an
//! audit trail.

use crate::crypto::{generate_token, hash_token};
use crate::db::{now_epoch_secs, Database};
use crate::types::{EnrollmentToken, IssuedToken};
use crate::{Error, Result};
use rusqlite::{params, Row};
use tracing::info;

#[derive(Clone)]
pub struct TokenStore {
    db: Database,
}

impl TokenStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Issue a new token valid for `ttl_secs` from now
    pub fn issue(&self, ttl_secs: i64, created_by: &str, note: Option<&str>) -> Result<IssuedToken> {
        if ttl_secs <= 0 {
            return Err(Error::InvalidInput(format!(
                "token lifetime must be positive (got {}s)",
                ttl_secs
            )));
        }
        let now = now_epoch_secs();
        let expires_at = now.checked_add(ttl_secs).ok_or_else(|| {
            Error::InvalidInput(format!("token lifetime of {}s is too large", ttl_secs))
        })?;
        self.issue_at(now, expires_at, created_by, note)
    }

    /// Issue a token with an explicit expiry
    pub fn issue_at(
        &self,
        now: i64,
        expires_at: i64,
        created_by: &str,
        note: Option<&str>,
    ) -> Result<IssuedToken> {
        let token = generate_token();
        let token_hash = hash_token(&token);

        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO enrollment_tokens (token_hash, expires_at, used, created_by, note, created_at)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)",
            params![token_hash, expires_at, created_by, note, now],
        )?;
        let id = conn.last_insert_rowid();

        let record = EnrollmentToken {
            id,
            token_hash,
            expires_at,
            used: false,
            used_at: None,
            created_by: created_by.to_string(),
            note: note.map(String::from),
            created_at: now,
        };
        info!(
            "Issued enrollment token {} by {} (expires {})",
            record.short_id(),
            created_by,
            expires_at
        );

        Ok(IssuedToken { token, record })
    }

    /// Atomically mark the token used if it is unused and unexpired.
    /// Returns true when exactly this call consumed it.
    pub fn redeem(&self, token: &str) -> Result<bool> {
        self.redeem_at(token, now_epoch_secs())
    }

    pub fn redeem_at(&self, token: &str, now: i64) -> Result<bool> {
        let token_hash = hash_token(token);
        let conn = self.db.connection();
        let conn = conn.lock();
        let rows = conn.execute(
            "UPDATE enrollment_tokens SET used = 1, used_at = ?2
             WHERE token_hash = ?1 AND used = 0 AND expires_at > ?2",
            params![token_hash, now],
        )?;
        Ok(rows == 1)
    }

    /// All tokens, newest first
    pub fn list(&self) -> Result<Vec<EnrollmentToken>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, token_hash, expires_at, used, used_at, created_by, note, created_at
             FROM enrollment_tokens ORDER BY id DESC",
        )?;

        let rows = stmt.query_map([], token_from_row)?;
        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<EnrollmentToken> {
    Ok(EnrollmentToken {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        expires_at: row.get(2)?,
        used: row.get::<_, i64>(3)? != 0,
        used_at: row.get(4)?,
        created_by: row.get(5)?,
        note: row.get(6)?,
        created_at: row.get(7)?,
    })
}
