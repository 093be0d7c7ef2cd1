//! Unified error handling for slircbot.
//!
//! Transport failures are values, never panics: the socket reports them
//! to its connection, which turns them into a [`DisconnectReason`] and a
//! reconnect decision. Plugin faults carry the plugin name so the driver
//! can route them to the error event.

use std::io;

use thiserror::Error;

// ============================================================================
// Transport Errors (socket layer)
// ============================================================================

/// Failures of the byte stream underneath a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no server configured")]
    NoServer,

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("dial to {address} timed out")]
    DialTimeout { address: String },

    #[error("dial to {address} failed: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid bind address: {0}")]
    Bind(String),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("connection closed by peer")]
    Eof,

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

impl TransportError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoServer => "no_server",
            Self::Resolve(_) => "resolve",
            Self::DialTimeout { .. } => "dial_timeout",
            Self::Dial { .. } => "dial_failed",
            Self::Bind(_) => "bind",
            Self::Tls(_) => "tls",
            Self::Eof => "eof",
            Self::Read(_) => "read_error",
            Self::Write(_) => "write_error",
        }
    }
}

/// Why a connection left the `Ready`/`Registering` states.
#[derive(Debug, Error)]
pub enum DisconnectReason {
    #[error("quit requested")]
    Quit,

    #[error("no keepalive reply after {0} probes")]
    PingTimeout(u32),

    #[error("shutting down")]
    Shutdown,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DisconnectReason {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::PingTimeout(_) => "ping_timeout",
            Self::Shutdown => "shutdown",
            Self::Transport(e) => e.error_code(),
        }
    }

    /// Whether the connection should try to come back.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PingTimeout(_) | Self::Transport(_))
    }
}

// ============================================================================
// Plugin Errors (registry)
// ============================================================================

/// Load failures and handler faults.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("plugin not loaded: {0}")]
    NotLoaded(String),

    #[error("plugin {plugin} failed to initialise: {source}")]
    Instantiate {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin {plugin} rejected: {reason}")]
    Contract { plugin: String, reason: String },

    #[error("plugin {plugin} failed in {event}: {source}")]
    Handler {
        plugin: String,
        event: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl PluginError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyLoaded(_) => "already_loaded",
            Self::NotLoaded(_) => "not_loaded",
            Self::Instantiate { .. } => "instantiate",
            Self::Contract { .. } => "contract",
            Self::Handler { .. } => "handler",
        }
    }

    /// Name of the plugin involved.
    pub fn plugin(&self) -> &str {
        match self {
            Self::NotFound(name) | Self::AlreadyLoaded(name) | Self::NotLoaded(name) => name,
            Self::Instantiate { plugin, .. }
            | Self::Contract { plugin, .. }
            | Self::Handler { plugin, .. } => plugin,
        }
    }
}

// ============================================================================
// Supervisor Errors
// ============================================================================

/// Malformed connection selection queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("empty selection query")]
    Empty,

    #[error("unknown selection token: {0}")]
    UnknownToken(String),

    #[error("missing value for {0}:")]
    MissingValue(&'static str),

    #[error("{0} given more than once")]
    Repeated(&'static str),
}

impl FilterError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::UnknownToken(_) => "unknown_token",
            Self::MissingValue(_) => "missing_value",
            Self::Repeated(_) => "repeated",
        }
    }
}

/// Connection management failures.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("connection already registered: {0}")]
    DuplicateConnection(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}

impl SupervisorError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateConnection(_) => "duplicate_connection",
            Self::UnknownNetwork(_) => "unknown_network",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_timeouts_are_recoverable() {
        assert!(DisconnectReason::PingTimeout(2).is_recoverable());
        assert!(DisconnectReason::from(TransportError::Eof).is_recoverable());
        assert!(!DisconnectReason::Quit.is_recoverable());
        assert!(!DisconnectReason::Shutdown.is_recoverable());
    }

    #[test]
    fn transport_codes_pass_through_disconnects() {
        let reason = DisconnectReason::from(TransportError::DialTimeout {
            address: "irc.example.net:6667".into(),
        });
        assert_eq!(reason.error_code(), "dial_timeout");
        assert_eq!(reason.to_string(), "dial to irc.example.net:6667 timed out");
    }

    #[test]
    fn plugin_errors_name_their_plugin() {
        let err = PluginError::Handler {
            plugin: "greeter".into(),
            event: "on_join",
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.plugin(), "greeter");
        assert_eq!(err.error_code(), "handler");
        assert!(err.to_string().contains("on_join"));
    }
}
