//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::collections::HashSet;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("duplicate network name: {0}")]
    DuplicateNetwork(String),
    #[error("network {0} lists no servers")]
    NoServers(String),
    #[error("duplicate connection name: {0}")]
    DuplicateConnection(String),
    #[error("connection {connection} references unknown network {network}")]
    UnknownNetwork { connection: String, network: String },
    #[error("connection {0} has an empty nickname")]
    EmptyNickname(String),
    #[error("connection {connection} seeds an empty user mask")]
    EmptyMask { connection: String },
    #[error("flood.samples must be at least 1")]
    ZeroFloodSamples,
    #[error("flood.threshold must be positive, got {0}")]
    InvalidFloodThreshold(f64),
    #[error("flood.max_line_len must leave room for a command, got {0}")]
    LineTooShort(usize),
    #[error("reconnect.max_attempts must be at least 1")]
    ZeroMaxAttempts,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut networks = HashSet::new();
    for network in &config.networks {
        if !networks.insert(network.name.as_str()) {
            errors.push(ValidationError::DuplicateNetwork(network.name.clone()));
        }
        if network.servers.is_empty() {
            errors.push(ValidationError::NoServers(network.name.clone()));
        }
    }

    let mut connections = HashSet::new();
    for conn in &config.connections {
        if !connections.insert(conn.name.as_str()) {
            errors.push(ValidationError::DuplicateConnection(conn.name.clone()));
        }
        if !networks.contains(conn.network.as_str()) {
            errors.push(ValidationError::UnknownNetwork {
                connection: conn.name.clone(),
                network: conn.network.clone(),
            });
        }
        let nickname = conn.nickname.as_deref().unwrap_or(&config.identity.nickname);
        if nickname.trim().is_empty() {
            errors.push(ValidationError::EmptyNickname(conn.name.clone()));
        }
        if conn.users.iter().any(|u| u.mask.trim().is_empty()) {
            errors.push(ValidationError::EmptyMask {
                connection: conn.name.clone(),
            });
        }
    }

    if config.flood.samples == 0 {
        errors.push(ValidationError::ZeroFloodSamples);
    }
    if config.flood.threshold.is_nan() || config.flood.threshold <= 0.0 {
        errors.push(ValidationError::InvalidFloodThreshold(config.flood.threshold));
    }
    if config.flood.max_line_len < 64 {
        errors.push(ValidationError::LineTooShort(config.flood.max_line_len));
    }
    if config.reconnect.max_attempts == 0 {
        errors.push(ValidationError::ZeroMaxAttempts);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
