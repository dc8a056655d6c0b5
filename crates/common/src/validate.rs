//! Peer input validation
//!
//! Names must be:
//! - 1-32 characters
//! - [A-Za-z0-9._-] characters only
//! - Not in the blocklist of reserved words (case-insensitive)
//!
//! Public keys must be 44-char standard base64 decoding to 32 bytes that are
//! neither all-zero nor all-one.

use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use std::collections::HashSet;

pub const NAME_MAX_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const PUBLIC_KEY_ENCODED_LEN: usize = 44;

/// Reserved names that cannot be registered
static BLOCKLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // System accounts
        "root", "admin", "administrator", "system", "daemon", "nobody",
        // Interfaces
        "wg", "wg0", "wg1", "lo", "eth0", "all", "default",
        // Path traversal
        ".", "..",
        // Reserved words
        "null", "undefined", "none",
        // Brand
        "peergate", "gateway", "server",
    ]
    .into_iter()
    .collect()
});

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyName,
    NameTooLong { max: usize, got: usize },
    InvalidCharacter { position: usize, char: char },
    Reserved { name: String },
    KeyLength { expected: usize, got: usize },
    KeyEncoding,
    WeakKey,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "Peer name cannot be empty"),
            Self::NameTooLong { max, got } => {
                write!(f, "Peer name must be at most {} characters (got {})", max, got)
            }
            Self::InvalidCharacter { position, char } => write!(
                f,
                "Invalid character '{}' at position {}. Only letters, digits, '.', '_' and '-' are allowed.",
                char, position
            ),
            Self::Reserved { name } => write!(f, "The name '{}' is reserved", name),
            Self::KeyLength { expected, got } => write!(
                f,
                "Public key must be {} base64 characters (got {})",
                expected, got
            ),
            Self::KeyEncoding => write!(f, "Public key is not valid base64 for a 32-byte key"),
            Self::WeakKey => write!(f, "Public key is a degenerate value"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::Error {
    fn from(e: ValidationError) -> Self {
        crate::Error::InvalidInput(e.to_string())
    }
}

/// Validate a peer name. Names are kept as given (no case folding).
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyName);
    }
    if len > NAME_MAX_LEN {
        return Err(ValidationError::NameTooLong { max: NAME_MAX_LEN, got: len });
    }

    for (i, c) in name.chars().enumerate() {
        if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-') {
            return Err(ValidationError::InvalidCharacter { position: i, char: c });
        }
    }

    let lowered = name.to_ascii_lowercase();
    if BLOCKLIST.contains(lowered.as_str()) {
        return Err(ValidationError::Reserved { name: name.to_string() });
    }

    Ok(())
}

/// Validate a WireGuard public key and return its raw bytes
pub fn validate_public_key(key: &str) -> Result<[u8; PUBLIC_KEY_LEN], ValidationError> {
    if key.len() != PUBLIC_KEY_ENCODED_LEN {
        return Err(ValidationError::KeyLength {
            expected: PUBLIC_KEY_ENCODED_LEN,
            got: key.len(),
        });
    }

    let decoded = STANDARD
        .decode(key)
        .map_err(|_| ValidationError::KeyEncoding)?;
    let bytes: [u8; PUBLIC_KEY_LEN] = decoded
        .try_into()
        .map_err(|_| ValidationError::KeyEncoding)?;

    if bytes.iter().all(|b| *b == 0x00) || bytes.iter().all(|b| *b == 0xFF) {
        return Err(ValidationError::WeakKey);
    }

    Ok(bytes)
}
