//! Connection - one client session on one network.
//!
//! A `Connection` owns its [`Socket`] and its [`AuthStore`], tracks the
//! registration state, the bot's current nickname and the channels it is
//! in, and turns every received line into an [`Event`] for the plugin
//! registry.
//!
//! ```text
//!   Disconnected ──connect()──▶ Connecting ──dial ok──▶ Registering
//!        ▲                          │                        │ 001
//!        │   retry timer / give up  │ dial failed            ▼
//!        └──────────────────────────┴────── failure ◀──── Ready
//! ```
//!
//! - [`lifecycle`]: dialing, backoff, keepalive, quit and teardown.
//! - [`receive`]: line parsing, bookkeeping and dispatch.
//!
//! [`Event`]: crate::plugins::Event

mod lifecycle;
mod receive;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use slircbot_proto::casemap::fold;
use slircbot_proto::frame::sanitize;
use slircbot_proto::text::{split_text, truncate_utf8_safe};
use slircbot_proto::{Ctcp, Frame, Identity};
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::{Config, ConnectionConfig, NetworkConfig, UserSeed};
use crate::error::{DisconnectReason, TransportError};
use crate::network::socket::{Dialer, Endpoint, FloodSettings, Socket, Statistics};
use crate::scheduler::TimerId;
use crate::security::AuthStore;

/// Room left for the `:nick!user@host ` prefix the server adds when it
/// relays our line, on top of the nickname itself.
const RELAY_PREFIX_ALLOWANCE: usize = 1 + 1 + 10 + 1 + 63 + 1;

/// Smallest text chunk a split will produce.
const MIN_CHUNK: usize = 32;

/// Registration progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registering,
    Ready,
}

/// What plugins get to see of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full dispatch.
    #[default]
    Master,
    /// Relay-only: bookkeeping runs, plugins only see raw lines.
    Slave,
}

/// Per-connection knobs, resolved from the configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub nickname: String,
    pub alt_nickname: Option<String>,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
    pub channels: Vec<String>,
    pub role: Role,
    pub keepalive_interval: Duration,
    pub max_unacked: u32,
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub max_line_len: usize,
    pub ctcp_version: String,
    /// How long a quitting connection waits for the server to close.
    pub quit_grace: Duration,
}

impl Settings {
    /// Connection values win over the global `[identity]` defaults.
    pub fn resolve(connection: &ConnectionConfig, config: &Config) -> Self {
        let identity = &config.identity;
        Self {
            nickname: connection
                .nickname
                .clone()
                .unwrap_or_else(|| identity.nickname.clone()),
            alt_nickname: connection
                .alt_nickname
                .clone()
                .or_else(|| identity.alt_nickname.clone()),
            username: connection
                .username
                .clone()
                .unwrap_or_else(|| identity.username.clone()),
            realname: connection
                .realname
                .clone()
                .unwrap_or_else(|| identity.realname.clone()),
            password: connection.password.clone(),
            channels: connection.channels.clone(),
            role: connection.role,
            keepalive_interval: config.keepalive.interval(),
            max_unacked: config.keepalive.max_unacked,
            base_delay: config.reconnect.base_delay(),
            max_attempts: config.reconnect.max_attempts,
            max_line_len: config.flood.max_line_len,
            ctcp_version: config.bot.ctcp_version.clone(),
            quit_grace: config.bot.shutdown_grace(),
        }
    }
}

/// Network descriptor: name plus the servers to rotate through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub servers: Vec<Endpoint>,
}

impl From<&NetworkConfig> for NetworkInfo {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            name: network.name.clone(),
            servers: network
                .servers
                .iter()
                .map(|server| Endpoint {
                    address: server.address.clone(),
                    port: server.port,
                    secure: server.tls,
                    verify_cert: server.verify_cert,
                    bind: network.bind.clone(),
                })
                .collect(),
        }
    }
}

/// One managed client session.
pub struct Connection {
    name: String,
    network: NetworkInfo,
    settings: Settings,
    clock: SharedClock,
    socket: Socket,
    auth: AuthStore,

    state: ConnectionState,
    /// Nickname in use, or being registered.
    nickname: String,
    /// Dial attempts since the last successful registration.
    attempts: u32,
    /// Delay computed by the most recent attempt.
    retry_delay: Duration,
    /// Keepalive probes sent without a PONG.
    unacked: u32,
    alt_tried: bool,
    next_server: usize,

    /// Folded name -> name as the server spelled it.
    channels: BTreeMap<String, String>,
    /// Channels to join again after a reconnect.
    rejoin: Vec<String>,
    /// Folded channel -> (channel, members) while 353s arrive.
    pending_names: HashMap<String, (String, Vec<String>)>,

    keepalive_timer: Option<TimerId>,
    retry_timer: Option<TimerId>,

    /// Lines received but not yet dispatched.
    inbox: VecDeque<String>,
    /// Transport failure to handle once `inbox` is drained.
    failure: Option<TransportError>,
    /// Lines sent since the last raw-send fan-out.
    pending_raw: Vec<String>,
    in_raw_send: bool,

    start_pending: bool,
    quitting: Option<Instant>,
    destroyed: bool,
    /// Why the last session ended.
    last_disconnect: Option<DisconnectReason>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("network", &self.network.name)
            .field("state", &self.state)
            .field("nickname", &self.nickname)
            .field("attempts", &self.attempts)
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        network: NetworkInfo,
        settings: Settings,
        socket: Socket,
        clock: SharedClock,
        seeds: &[UserSeed],
    ) -> Self {
        let name = name.into();
        let mut auth = AuthStore::new(name.clone());
        auth.initialize(&name, seeds);
        Self {
            nickname: settings.nickname.clone(),
            name,
            network,
            settings,
            clock,
            socket,
            auth,
            state: ConnectionState::Disconnected,
            attempts: 0,
            retry_delay: Duration::ZERO,
            unacked: 0,
            alt_tried: false,
            next_server: 0,
            channels: BTreeMap::new(),
            rejoin: Vec::new(),
            pending_names: HashMap::new(),
            keepalive_timer: None,
            retry_timer: None,
            inbox: VecDeque::new(),
            failure: None,
            pending_raw: Vec::new(),
            in_raw_send: false,
            start_pending: true,
            quitting: None,
            destroyed: false,
            last_disconnect: None,
        }
    }

    /// Build a connection from its `[[connection]]` block.
    pub fn from_config(
        connection: &ConnectionConfig,
        network: &NetworkConfig,
        config: &Config,
        dialer: Box<dyn Dialer>,
        clock: SharedClock,
    ) -> Self {
        let socket = Socket::new(
            dialer,
            clock.clone(),
            FloodSettings::from(&config.flood),
            config.reconnect.dial_timeout(),
        );
        Self::new(
            connection.name.clone(),
            NetworkInfo::from(network),
            Settings::resolve(connection, config),
            socket,
            clock,
            &connection.users,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &NetworkInfo {
        &self.network
    }

    pub fn network_name(&self) -> &str {
        &self.network.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn role(&self) -> Role {
        self.settings.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// The bot as it appears on this network, as far as we know it.
    pub fn identity(&self) -> Identity {
        Identity::new(self.nickname.as_str(), self.settings.username.as_str(), "")
            .on_network(self.network.name.as_str())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn unacked_probes(&self) -> u32 {
        self.unacked
    }

    pub fn last_disconnect(&self) -> Option<&DisconnectReason> {
        self.last_disconnect.as_ref()
    }

    /// Channels the bot is in, as the server spelled them.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.values().map(String::as_str)
    }

    /// Case-insensitive membership test.
    pub fn is_on(&self, channel: &str) -> bool {
        self.channels.contains_key(&fold(channel))
    }

    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut AuthStore {
        &mut self.auth
    }

    pub fn statistics(&self) -> Statistics {
        self.socket.statistics()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.socket.endpoint()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.is_some()
    }

    /// Marked for removal by the supervisor.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Write `line` to the server. Unless `skip_dispatch` is set, or a
    /// raw-send fan-out is already running, the line is also queued for
    /// the raw-send event. Returns bytes written or queued; 0 while
    /// disconnected.
    pub fn send(&mut self, line: &str, skip_dispatch: bool) -> usize {
        if !self.socket.is_connected() {
            debug!(connection = %self.name, "send while disconnected dropped");
            return 0;
        }
        let line = sanitize(line);
        let line = truncate_utf8_safe(&line, self.settings.max_line_len.saturating_sub(2));
        let written = self.socket.send(line);
        if !skip_dispatch && !self.in_raw_send {
            self.pending_raw.push(line.to_owned());
        }
        written
    }

    /// Send an arbitrary line.
    pub fn raw(&mut self, line: &str) -> usize {
        self.send(line, false)
    }

    pub fn privmsg(&mut self, target: &str, text: &str) -> usize {
        self.send_split("PRIVMSG", target, text, None)
    }

    pub fn notice(&mut self, target: &str, text: &str) -> usize {
        self.send_split("NOTICE", target, text, None)
    }

    /// `/me` emote.
    pub fn action(&mut self, target: &str, text: &str) -> usize {
        self.send_split("PRIVMSG", target, text, Some("ACTION"))
    }

    /// CTCP request.
    pub fn ctcp(&mut self, target: &str, command: &str, params: Option<&str>) -> usize {
        let body = Ctcp::new(command, params).to_string();
        self.send(&Frame::privmsg(target, &body).to_string(), false)
    }

    /// CTCP reply.
    pub fn ctcp_reply(&mut self, target: &str, command: &str, params: Option<&str>) -> usize {
        let body = Ctcp::new(command, params).to_string();
        self.send(&Frame::notice(target, &body).to_string(), false)
    }

    pub fn join(&mut self, channel: &str, key: Option<&str>) -> usize {
        self.send(&Frame::join(channel, key).to_string(), false)
    }

    pub fn part(&mut self, channel: &str, reason: Option<&str>) -> usize {
        self.send(&Frame::part(channel, reason).to_string(), false)
    }

    /// Request a nickname change. Our own nickname updates when the
    /// server confirms it.
    pub fn set_nick(&mut self, nickname: &str) -> usize {
        self.send(&Frame::nick(nickname).to_string(), false)
    }

    /// Message bodies are split so no line outgrows the configured
    /// maximum once the server prefixes it with our mask.
    fn send_split(&mut self, command: &str, target: &str, text: &str, ctcp: Option<&str>) -> usize {
        let text = sanitize(text);
        if text.is_empty() && ctcp.is_none() {
            return 0;
        }
        let wrapper = ctcp.map_or(0, |c| c.len() + 3);
        let overhead = command.len()
            + 1
            + target.len()
            + 2
            + 2
            + wrapper
            + self.nickname.len()
            + RELAY_PREFIX_ALLOWANCE;
        let budget = self
            .settings
            .max_line_len
            .saturating_sub(overhead)
            .max(MIN_CHUNK);

        let mut chunks: Vec<&str> = split_text(&text, budget).collect();
        if chunks.is_empty() {
            chunks.push("");
        }
        let mut total = 0;
        for chunk in chunks {
            let body = match ctcp {
                Some(c) => Ctcp::new(c, Some(chunk)).to_string(),
                None => chunk.to_owned(),
            };
            let line = Frame::new(command)
                .with_param(target)
                .with_trailing(&body)
                .to_string();
            total += self.send(&line, false);
        }
        total
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::network::socket::mock::MockDialer;
    use std::sync::Arc;

    pub fn settings() -> Settings {
        Settings {
            nickname: "bot".into(),
            alt_nickname: None,
            username: "botuser".into(),
            realname: "Test Bot".into(),
            password: None,
            channels: Vec::new(),
            role: Role::Master,
            keepalive_interval: Duration::from_secs(120),
            max_unacked: 2,
            base_delay: Duration::from_secs(15),
            max_attempts: 5,
            max_line_len: 512,
            ctcp_version: "slircbot test".into(),
            quit_grace: Duration::from_secs(5),
        }
    }

    pub fn network() -> NetworkInfo {
        NetworkInfo {
            name: "testnet".into(),
            servers: vec![
                Endpoint::plain("irc1.test", 6667),
                Endpoint::plain("irc2.test", 6667),
            ],
        }
    }

    pub fn connection_with(
        name: &str,
        settings: Settings,
        clock: SharedClock,
        dialer: MockDialer,
    ) -> Connection {
        let socket = Socket::new(
            Box::new(dialer),
            clock.clone(),
            FloodSettings {
                threshold: 1_000_000.0,
                ..FloodSettings::default()
            },
            Duration::from_secs(10),
        );
        Connection::new(name, network(), settings, socket, clock, &[])
    }

    /// Disconnected connection on a mock dialer with default settings.
    pub fn connection(name: &str) -> (Connection, MockDialer) {
        let dialer = MockDialer::new();
        let conn = connection_with(name, settings(), SystemClock::shared(), dialer.clone());
        (conn, dialer)
    }

    pub fn manual_clock() -> (Arc<ManualClock>, SharedClock) {
        let clock = Arc::new(ManualClock::new());
        let shared: SharedClock = clock.clone();
        (clock, shared)
    }
}
