//! Authorization for the bot's users.
//!
//! - **AuthStore**: per-connection wildcard-identity permission table
//! - **Password**: SHA-256 digests with constant-time comparison

pub mod authz;
pub mod password;

pub use authz::{AuthStore, PermissionRecord};
pub use password::{digests_match, hash_secret};
