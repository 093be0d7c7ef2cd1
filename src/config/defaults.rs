//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Bot Defaults
// =============================================================================

pub fn default_tick_ms() -> u64 {
    50
}

pub fn default_shutdown_grace_secs() -> u64 {
    5
}

pub fn default_ctcp_version() -> String {
    format!("slircbot {}", env!("CARGO_PKG_VERSION"))
}

// =============================================================================
// Identity Defaults
// =============================================================================

pub fn default_nickname() -> String {
    "slircbot".to_string()
}

pub fn default_username() -> String {
    "slircbot".to_string()
}

pub fn default_realname() -> String {
    "Straylight IRC bot".to_string()
}

// =============================================================================
// Flood Control Defaults
// =============================================================================

/// Outgoing bytes per second tolerated before lines are queued.
pub fn default_flood_threshold() -> f64 {
    256.0
}

/// Number of one-second buckets in the rolling window.
pub fn default_flood_samples() -> usize {
    5
}

pub fn default_max_line_len() -> usize {
    512
}

pub fn default_recv_max_line_len() -> usize {
    8192
}

// =============================================================================
// Keepalive / Reconnect Defaults
// =============================================================================

pub fn default_keepalive_interval_secs() -> u64 {
    120
}

pub fn default_max_unacked() -> u32 {
    2
}

pub fn default_base_delay_secs() -> u64 {
    15
}

pub fn default_max_attempts() -> u32 {
    5
}

pub fn default_dial_timeout_secs() -> u64 {
    10
}

// =============================================================================
// Network Defaults
// =============================================================================

pub fn default_port() -> u16 {
    6667
}
