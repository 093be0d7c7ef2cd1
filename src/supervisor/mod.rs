//! Supervisor - owns every connection and drives them once per tick.
//!
//! - [`filter`]: selection query parsing and matching.
//! - [`group`]: the [`Target`] trait and multi-connection groups.
//!
//! Connections are kept in registration order. A connection marked
//! destroyed (quit acknowledged, backoff exhausted, forced close) is
//! reaped at the end of the tick that marked it, after its timers are
//! cancelled.

pub mod filter;
pub mod group;

use std::fmt;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::config::{Config, ConnectionConfig, ErrorVerbosity};
use crate::error::{DisconnectReason, FilterError, PluginError, SupervisorError};
use crate::network::connection::{Connection, Role};
use crate::network::socket::{Dialer, Statistics};
use crate::plugins::{Event, SystemEvent};
use crate::runtime::{Env, Timers, log_fault};
use crate::telemetry::spans;

pub use filter::Filter;
pub use group::{Group, Selection, Target};

/// Produces a dialer for every new connection.
pub type DialerFactory = Box<dyn Fn() -> Box<dyn Dialer>>;

/// Process signals forwarded by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

#[derive(Debug)]
struct ShutdownState {
    reason: String,
    deadline: Instant,
}

/// Traffic totals across all connections.
#[derive(Debug, Clone, Default)]
pub struct SupervisorStatistics {
    pub total: Statistics,
    pub connections: Vec<(String, Statistics)>,
}

pub struct Supervisor {
    config: Config,
    connections: Vec<Connection>,
    dialers: DialerFactory,
    clock: SharedClock,
    signals: Option<UnboundedReceiver<Signal>>,
    shutdown: Option<ShutdownState>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("connections", &self.connections)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

impl Supervisor {
    pub fn new(config: Config, dialers: DialerFactory, clock: SharedClock) -> Self {
        Self {
            config,
            connections: Vec::new(),
            dialers,
            clock,
            signals: None,
            shutdown: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn verbosity(&self) -> ErrorVerbosity {
        self.config.bot.error_verbosity
    }

    /// Create every `[[connection]]` of the configuration.
    pub fn initialize(&mut self) -> Result<(), SupervisorError> {
        let entries = self.config.connections.clone();
        for settings in &entries {
            self.create_from(settings)?;
        }
        info!(connections = self.connections.len(), "supervisor initialized");
        Ok(())
    }

    /// Add a connection. It dials on the next tick.
    pub fn register(&mut self, connection: Connection) -> Result<(), SupervisorError> {
        if self.get(connection.name()).is_some() {
            return Err(SupervisorError::DuplicateConnection(
                connection.name().to_owned(),
            ));
        }
        info!(
            connection = %connection.name(),
            network = %connection.network_name(),
            "connection registered"
        );
        self.connections.push(connection);
        Ok(())
    }

    /// Remove a connection at once, closing its socket without a QUIT.
    pub fn unregister(&mut self, name: &str, timers: &mut Timers) -> bool {
        let Some(index) = self.connections.iter().position(|c| c.name() == name) else {
            return false;
        };
        let mut connection = self.connections.remove(index);
        connection.force_close(DisconnectReason::Shutdown, timers);
        connection.release_timers(timers);
        info!(connection = %name, "connection unregistered");
        true
    }

    /// Create a connection on a configured network at runtime.
    pub fn create(
        &mut self,
        name: &str,
        network: &str,
        channels: &[String],
    ) -> Result<(), SupervisorError> {
        let settings = ConnectionConfig {
            name: name.to_owned(),
            network: network.to_owned(),
            nickname: None,
            alt_nickname: None,
            username: None,
            realname: None,
            password: None,
            role: Role::Master,
            channels: channels.to_vec(),
            users: Vec::new(),
        };
        self.create_from(&settings)
    }

    fn create_from(&mut self, settings: &ConnectionConfig) -> Result<(), SupervisorError> {
        if self.get(&settings.name).is_some() {
            return Err(SupervisorError::DuplicateConnection(settings.name.clone()));
        }
        let network = self
            .config
            .network(&settings.network)
            .ok_or_else(|| SupervisorError::UnknownNetwork(settings.network.clone()))?;
        let connection = Connection::from_config(
            settings,
            network,
            &self.config,
            (self.dialers)(),
            self.clock.clone(),
        );
        self.register(connection)
    }

    pub fn get(&self, name: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.name() == name)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Resolve a connection name or a filter query.
    ///
    /// An exact connection name wins; anything else is parsed as a
    /// [`Filter`].
    pub fn select(&mut self, query: &str) -> Result<Selection<'_>, FilterError> {
        let query = query.trim();
        if let Some(index) = self.connections.iter().position(|c| c.name() == query) {
            return Ok(Selection::One(&mut self.connections[index]));
        }
        let filter = Filter::parse(query)?;
        let matches = self
            .connections
            .iter_mut()
            .filter(|c| filter.matches(c))
            .collect();
        Ok(Selection::from_matches(matches))
    }

    /// Accept process signals from the driver.
    pub fn set_signal_source(&mut self, signals: UnboundedReceiver<Signal>) {
        self.signals = Some(signals);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Shutdown requested and every connection gone.
    pub fn is_finished(&self) -> bool {
        self.shutdown.is_some() && self.connections.is_empty()
    }

    /// Tell plugins, then QUIT every connection. Connections still open
    /// after the grace period are closed.
    pub fn begin_shutdown(&mut self, reason: &str, env: &mut Env<'_>) {
        if self.shutdown.is_some() {
            return;
        }
        info!(reason, connections = self.connections.len(), "shutting down");
        self.shutdown = Some(ShutdownState {
            reason: reason.to_owned(),
            deadline: self.clock.now() + self.config.bot.shutdown_grace(),
        });

        let event = SystemEvent::Shutdown {
            reason: reason.to_owned(),
        };
        if let Err(e) = env.plugins.dispatch_system(&event, env.timers, env.actions) {
            route_system_fault(e, env, self.verbosity());
        }
        for connection in &mut self.connections {
            connection.quit(Some(reason));
        }
    }

    fn drain_signals(&mut self, env: &mut Env<'_>) {
        let mut received = Vec::new();
        if let Some(signals) = &mut self.signals {
            while let Ok(signal) = signals.try_recv() {
                received.push(signal);
            }
        }
        for signal in received {
            match &mut self.shutdown {
                Some(shutdown) => {
                    warn!(%signal, reason = %shutdown.reason, "second signal, closing now");
                    shutdown.deadline = self.clock.now();
                }
                None => self.begin_shutdown(&format!("caught {signal}"), env),
            }
        }
    }

    /// One tick: signals, every connection, the shutdown deadline, reaping.
    pub fn process(&mut self, env: &mut Env<'_>) {
        self.drain_signals(env);

        let verbosity = self.verbosity();
        for connection in &mut self.connections {
            let span = spans::connection(connection.name(), connection.network_name());
            let _enter = span.enter();
            if let Err(e) = connection.update(env) {
                route_fault(connection, e, env, verbosity);
            }
        }

        if let Some(shutdown) = &self.shutdown {
            if self.clock.now() >= shutdown.deadline {
                for connection in &mut self.connections {
                    if !connection.is_destroyed() {
                        connection.force_close(DisconnectReason::Shutdown, env.timers);
                    }
                }
            }
        }
        self.reap(env.timers);
    }

    fn reap(&mut self, timers: &mut Timers) {
        self.connections.retain_mut(|connection| {
            if !connection.is_destroyed() {
                return true;
            }
            connection.release_timers(timers);
            match connection.last_disconnect() {
                Some(reason) => info!(
                    connection = %connection.name(),
                    reason = %reason,
                    error_code = reason.error_code(),
                    "connection removed"
                ),
                None => info!(connection = %connection.name(), "connection removed"),
            }
            false
        });
    }

    pub fn statistics(&self) -> SupervisorStatistics {
        let mut stats = SupervisorStatistics::default();
        for connection in &self.connections {
            let snapshot = connection.statistics();
            stats.total += &snapshot;
            stats.connections.push((connection.name().to_owned(), snapshot));
        }
        stats
    }
}

/// Report a handler fault and let plugins hear about it. Faults raised
/// while handling the error event are only logged.
fn route_fault(
    connection: &mut Connection,
    error: PluginError,
    env: &mut Env<'_>,
    verbosity: ErrorVerbosity,
) {
    log_fault(verbosity, &error);
    let event = Event::Error {
        plugin: error.plugin().to_owned(),
        message: error.to_string(),
    };
    if let Err(nested) = connection.emit(&event, env) {
        warn!(
            plugin = nested.plugin(),
            error = %nested,
            "error handler failed"
        );
    }
}

/// [`route_fault`] for faults outside any connection.
pub(crate) fn route_system_fault(error: PluginError, env: &mut Env<'_>, verbosity: ErrorVerbosity) {
    log_fault(verbosity, &error);
    let event = SystemEvent::Error {
        plugin: error.plugin().to_owned(),
        message: error.to_string(),
    };
    if let Err(nested) = env
        .plugins
        .dispatch_system(&event, env.timers, env.actions)
    {
        warn!(
            plugin = nested.plugin(),
            error = %nested,
            "error handler failed"
        );
    }
}
