//! Secret hashing and comparison for permission records.
//!
//! Records store the SHA-256 hex digest of a secret; identification
//! compares digests in constant time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Lowercase hex SHA-256 of `secret`.
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time digest comparison. Hex case is ignored.
pub fn digests_match(stored: &str, offered: &str) -> bool {
    let stored = stored.trim().to_ascii_lowercase();
    let offered = offered.trim().to_ascii_lowercase();
    stored.len() == offered.len() && bool::from(stored.as_bytes().ct_eq(offered.as_bytes()))
}
