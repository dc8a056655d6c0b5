//! Credential authority
//!
//! Accepts either the static master secret or a single-use enrollment token
//! presented as a bearer token.

use peergate_common::crypto::{constant_time_eq, hash_token};
use peergate_common::{AuthMethod, Error, Result, TokenStore, UnauthorizedReason};
use tracing::{debug, warn};

/// Which credentials an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Master secret, or redeem one enrollment token
    MasterOrEnrollment,
    /// Master secret only; enrollment tokens are refused without being spent
    MasterOnly,
}

pub struct CredentialAuthority {
    master_token: Option<String>,
    tokens: TokenStore,
}

impl CredentialAuthority {
    pub fn new(master_token: Option<String>, tokens: TokenStore) -> Self {
        Self {
            master_token: master_token.filter(|t| !t.is_empty()),
            tokens,
        }
    }

    /// Authorize a request from its raw Authorization header value
    pub fn authorize(&self, header: Option<&str>, policy: AuthPolicy) -> Result<AuthMethod> {
        let token = extract_bearer(header)
            .ok_or_else(|| Error::unauthorized(UnauthorizedReason::Missing))?;

        if let Some(master) = &self.master_token {
            if constant_time_eq(master, token) {
                debug!("Request authorized with master token");
                return Ok(AuthMethod::Master);
            }
        }

        if policy == AuthPolicy::MasterOnly {
            warn!("Rejected non-master credential on master-only operation");
            return Err(Error::unauthorized(UnauthorizedReason::MasterRequired));
        }

        if self.tokens.redeem(token)? {
            let hash = hash_token(token);
            debug!("Redeemed enrollment token {}", &hash[..12]);
            return Ok(AuthMethod::Enrollment);
        }

        warn!("Rejected invalid, expired or already used token");
        Err(Error::unauthorized(UnauthorizedReason::InvalidOrExpired))
    }
}

/// Pull the token out of `Bearer <token>` (scheme is case-insensitive)
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, rest) = header.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
