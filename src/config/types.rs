//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;
use crate::network::connection::Role;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bot configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Driver loop and reporting settings.
    #[serde(default)]
    pub bot: BotConfig,
    /// Identity used by connections that do not override it.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Outgoing flood control.
    #[serde(default)]
    pub flood: FloodConfig,
    /// Dead-peer detection.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// Dial and backoff settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Plugins to load and their dispatch priority.
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Known networks.
    #[serde(default, rename = "network")]
    pub networks: Vec<NetworkConfig>,
    /// Connections started at boot.
    #[serde(default, rename = "connection")]
    pub connections: Vec<ConnectionConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Look up a network by name.
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }
}

/// How much detail to log when a plugin handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorVerbosity {
    /// Plugin name and error code only.
    Quiet,
    /// Plugin name and top-level message.
    #[default]
    Brief,
    /// The full error chain.
    Full,
}

/// `[bot]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Sleep between driver iterations, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Plugin fault reporting detail.
    #[serde(default)]
    pub error_verbosity: ErrorVerbosity,
    /// Time allowed for QUIT lines to flush on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Answer to CTCP VERSION.
    #[serde(default = "default_ctcp_version")]
    pub ctcp_version: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            error_verbosity: ErrorVerbosity::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            ctcp_version: default_ctcp_version(),
        }
    }
}

impl BotConfig {
    /// Tick interval as a duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Shutdown grace period as a duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// `[identity]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_nickname")]
    pub nickname: String,
    /// Tried once when the primary nickname is taken.
    #[serde(default)]
    pub alt_nickname: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_realname")]
    pub realname: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            alt_nickname: None,
            username: default_username(),
            realname: default_realname(),
        }
    }
}

/// `[flood]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FloodConfig {
    /// Average outgoing bytes per second above which sends are queued.
    #[serde(default = "default_flood_threshold")]
    pub threshold: f64,
    /// Width of the rolling window, in one-second buckets.
    #[serde(default = "default_flood_samples")]
    pub samples: usize,
    /// Longest outgoing line, terminator included.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
    /// Longest accepted incoming line; longer ones are dropped.
    #[serde(default = "default_recv_max_line_len")]
    pub recv_max_line_len: usize,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            threshold: default_flood_threshold(),
            samples: default_flood_samples(),
            max_line_len: default_max_line_len(),
            recv_max_line_len: default_recv_max_line_len(),
        }
    }
}

/// `[keepalive]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveConfig {
    #[serde(default = "default_keepalive_interval_secs")]
    pub interval_secs: u64,
    /// Unanswered probes tolerated before the peer is declared dead.
    #[serde(default = "default_max_unacked")]
    pub max_unacked: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_keepalive_interval_secs(),
            max_unacked: default_max_unacked(),
        }
    }
}

impl KeepaliveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// `[reconnect]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry; doubles with every attempt.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Dial attempts before a connection is destroyed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            max_attempts: default_max_attempts(),
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs.max(1))
    }
}

/// `[plugins]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsConfig {
    /// Plugins loaded at startup, in order.
    #[serde(default)]
    pub load: Vec<String>,
    /// Plugins dispatched before all others, in this order.
    #[serde(default)]
    pub priority: Vec<String>,
}

/// `[[network]]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    /// Dialed round-robin, one per attempt.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Local address to bind before dialing.
    #[serde(default)]
    pub bind: Option<String>,
}

/// One server of a network.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Set to `false` only for test networks with self-signed certificates.
    #[serde(default = "default_true")]
    pub verify_cert: bool,
}

/// `[[connection]]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Unique connection name, used for selection.
    pub name: String,
    /// Name of a `[[network]]` block.
    pub network: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub alt_nickname: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    /// Server password, sent as PASS.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Role,
    /// Joined after registration.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Seed permission records.
    #[serde(default, rename = "user")]
    pub users: Vec<UserSeed>,
}

/// `[[connection.user]]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSeed {
    /// `nick!user@host`, each segment literal or `*`.
    pub mask: String,
    /// SHA-256 hex of the password; absent means mask-only trust.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.bot.tick_ms, 50);
        assert_eq!(config.bot.error_verbosity, ErrorVerbosity::Brief);
        assert_eq!(config.flood.threshold, 256.0);
        assert_eq!(config.flood.samples, 5);
        assert_eq!(config.keepalive.max_unacked, 2);
        assert_eq!(config.reconnect.base_delay_secs, 15);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.identity.nickname, "slircbot");
        assert!(config.connections.is_empty());
    }

    #[test]
    fn parses_networks_connections_and_seed_users() {
        let config = Config::parse(
            r##"
            [bot]
            error_verbosity = "full"

            [plugins]
            load = ["greeter", "logger"]
            priority = ["logger"]

            [[network]]
            name = "libera"
            servers = [
                { address = "irc.libera.chat", port = 6697, tls = true },
                { address = "irc.eu.libera.chat" },
            ]

            [[connection]]
            name = "main"
            network = "libera"
            nickname = "straybot"
            role = "slave"
            channels = ["#rust"]

            [[connection.user]]
            mask = "alice!*@*"
            password_hash = "abc"
            permissions = ["admin"]
            "##,
        )
        .unwrap();

        assert_eq!(config.bot.error_verbosity, ErrorVerbosity::Full);
        assert_eq!(config.plugins.priority, vec!["logger"]);
        let net = config.network("libera").unwrap();
        assert_eq!(net.servers.len(), 2);
        assert!(net.servers[0].tls && net.servers[0].verify_cert);
        assert_eq!(net.servers[1].port, 6667);

        let conn = &config.connections[0];
        assert_eq!(conn.role, Role::Slave);
        assert_eq!(conn.users[0].permissions, vec!["admin"]);
    }

    #[test]
    fn rejects_unknown_role() {
        let err = Config::parse("[[connection]]\nname = \"a\"\nnetwork = \"n\"\nrole = \"boss\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }
}
