//! Driver loop.
//!
//! Everything runs on one thread. Each tick:
//!
//! 1. the supervisor drains signals and updates every connection, which
//!    dispatches whatever arrived;
//! 2. plugins get the tick event;
//! 3. due timers fire;
//! 4. actions queued by handlers (plugin loads, new connections,
//!    shutdown) are applied.
//!
//! Handlers never touch the registry or the connection list directly;
//! they queue an [`Action`] and the driver applies it once dispatch has
//! unwound.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::config::{Config, ErrorVerbosity};
use crate::error::{PluginError, SupervisorError};
use crate::network::connection::Connection;
use crate::network::socket::{Dialer, TcpDialer};
use crate::plugins::{Catalog, Registry};
use crate::scheduler::Scheduler;
use crate::supervisor::{DialerFactory, Signal, Supervisor, route_system_fault};

/// Timer table shared by the runtime, connections and plugins.
pub type Timers = Scheduler<Core>;

/// Rounds of follow-up actions applied per tick before the rest waits.
const MAX_ACTION_ROUNDS: usize = 16;

/// Deferred request from a handler or timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    LoadPlugin(String),
    UnloadPlugin(String),
    ReloadPlugin(String),
    /// Open a new connection on a configured network.
    CreateConnection {
        name: String,
        network: String,
        channels: Vec<String>,
    },
    Shutdown { reason: String },
}

/// State handed to timer callbacks.
pub struct Core {
    pub supervisor: Supervisor,
    pub plugins: Registry,
    actions: Vec<Action>,
}

impl Core {
    /// Run `f` against the named connection, if it still exists.
    pub fn with_connection<R>(
        &mut self,
        name: &str,
        timers: &mut Timers,
        f: impl FnOnce(&mut Connection, &mut Env<'_>) -> R,
    ) -> Option<R> {
        let Core {
            supervisor,
            plugins,
            actions,
        } = self;
        let connection = supervisor.get_mut(name)?;
        let mut env = Env {
            plugins,
            timers,
            actions,
        };
        Some(f(connection, &mut env))
    }

    /// Queue an action for the end of the tick.
    pub fn request(&mut self, action: Action) {
        self.actions.push(action);
    }
}

/// Everything a connection needs while it dispatches.
pub struct Env<'a> {
    pub plugins: &'a mut Registry,
    pub timers: &'a mut Timers,
    pub actions: &'a mut Vec<Action>,
}

/// Log a plugin fault at the configured detail.
pub(crate) fn log_fault(verbosity: ErrorVerbosity, error: &PluginError) {
    match verbosity {
        ErrorVerbosity::Quiet => debug!(
            plugin = error.plugin(),
            error_code = error.error_code(),
            "plugin fault"
        ),
        ErrorVerbosity::Brief => error!(
            plugin = error.plugin(),
            error_code = error.error_code(),
            error = %error,
            "plugin fault"
        ),
        ErrorVerbosity::Full => error!(
            plugin = error.plugin(),
            error_code = error.error_code(),
            error = ?error,
            "plugin fault"
        ),
    }
}

/// The bot: supervisor, plugins and timers behind one tick loop.
pub struct Bot {
    core: Core,
    timers: Timers,
    tick: Duration,
    autoload: Vec<String>,
    started: bool,
}

impl Bot {
    /// Bot dialing real servers on the system clock.
    pub fn new(config: Config, catalog: Catalog) -> Result<Self, SupervisorError> {
        Self::with_parts(
            config,
            catalog,
            Box::new(|| Box::new(TcpDialer::new()) as Box<dyn Dialer>),
            SystemClock::shared(),
        )
    }

    pub fn with_parts(
        config: Config,
        catalog: Catalog,
        dialers: DialerFactory,
        clock: SharedClock,
    ) -> Result<Self, SupervisorError> {
        let plugins = Registry::new(catalog, config.plugins.priority.clone());
        let tick = config.bot.tick();
        let autoload = config.plugins.load.clone();
        let mut supervisor = Supervisor::new(config, dialers, clock.clone());
        supervisor.initialize()?;
        Ok(Self {
            core: Core {
                supervisor,
                plugins,
                actions: Vec::new(),
            },
            timers: Timers::new(clock),
            tick,
            autoload,
            started: false,
        })
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.core.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.core.supervisor
    }

    pub fn plugins(&self) -> &Registry {
        &self.core.plugins
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Queue an action for the next tick.
    pub fn request(&mut self, action: Action) {
        self.core.request(action);
    }

    /// Load the configured plugins. Called by the first tick if needed.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let names = std::mem::take(&mut self.autoload);
        for name in &names {
            self.core
                .plugins
                .load(name, &mut self.timers, &mut self.core.actions);
        }
        info!(
            plugins = self.core.plugins.len(),
            connections = self.core.supervisor.len(),
            "bot started"
        );
        self.apply_actions();
    }

    /// One pass of the driver loop.
    pub fn tick(&mut self) {
        self.start();
        let verbosity = self.core.supervisor.config().bot.error_verbosity;
        {
            let Core {
                supervisor,
                plugins,
                actions,
            } = &mut self.core;
            let mut env = Env {
                plugins,
                timers: &mut self.timers,
                actions,
            };
            supervisor.process(&mut env);
            if let Err(e) = env.plugins.on_tick(env.timers, env.actions) {
                route_system_fault(e, &mut env, verbosity);
            }
        }
        self.timers.process(&mut self.core);
        self.apply_actions();
    }

    fn apply_actions(&mut self) {
        for _ in 0..MAX_ACTION_ROUNDS {
            let pending = std::mem::take(&mut self.core.actions);
            if pending.is_empty() {
                return;
            }
            for action in pending {
                self.apply(action);
            }
        }
        if !self.core.actions.is_empty() {
            warn!(
                pending = self.core.actions.len(),
                "actions keep queueing more actions, deferring the rest"
            );
        }
    }

    fn apply(&mut self, action: Action) {
        debug!(?action, "applying action");
        let Core {
            supervisor,
            plugins,
            actions,
        } = &mut self.core;
        let timers = &mut self.timers;
        match action {
            Action::LoadPlugin(name) => {
                plugins.load(&name, timers, actions);
            }
            Action::UnloadPlugin(name) => {
                plugins.unload(&name, timers, actions);
            }
            Action::ReloadPlugin(name) => {
                if let Err(e) = plugins.reload(&name, timers, actions) {
                    warn!(plugin = %name, error = %e, error_code = e.error_code(), "reload failed");
                }
            }
            Action::CreateConnection {
                name,
                network,
                channels,
            } => {
                if let Err(e) = supervisor.create(&name, &network, &channels) {
                    warn!(connection = %name, error = %e, error_code = e.error_code(), "cannot create connection");
                }
            }
            Action::Shutdown { reason } => {
                let mut env = Env {
                    plugins,
                    timers,
                    actions,
                };
                supervisor.begin_shutdown(&reason, &mut env);
            }
        }
    }

    /// Tick until every connection is gone.
    ///
    /// SIGINT and SIGTERM start an orderly shutdown; a second signal
    /// closes whatever is left.
    pub async fn run(mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.supervisor.set_signal_source(rx);
        let forwarder = tokio::spawn(forward_signals(tx));

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.start();
        loop {
            interval.tick().await;
            self.tick();
            if self.core.supervisor.is_finished() {
                break;
            }
            if self.core.supervisor.is_empty() {
                warn!("no connections left");
                self.request(Action::Shutdown {
                    reason: "no connections left".into(),
                });
                self.apply_actions();
            }
        }
        forwarder.abort();
        info!("bot stopped");
    }
}

#[cfg(unix)]
async fn forward_signals(tx: UnboundedSender<Signal>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "cannot watch SIGTERM");
            None
        }
    };
    loop {
        let received = tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => Signal::Interrupt,
                Err(e) => {
                    warn!(error = %e, "cannot watch SIGINT");
                    return;
                }
            },
            Some(()) = async {
                match terminate.as_mut() {
                    Some(stream) => stream.recv().await,
                    None => std::future::pending().await,
                }
            } => Signal::Terminate,
        };
        if tx.send(received).is_err() {
            return;
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(tx: UnboundedSender<Signal>) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot watch SIGINT");
            return;
        }
        if tx.send(Signal::Interrupt).is_err() {
            return;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::plugins::{Context, Event, EventKind, Flow, HandlerResult, Plugin, SystemContext, SystemEvent};

    /// Timer table on a manual clock.
    pub fn timers() -> (Timers, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (Timers::new(clock.clone()), clock)
    }

    /// What the recorder plugin saw, and how it should behave.
    #[derive(Debug, Default)]
    pub struct RecorderState {
        pub events: Vec<Event>,
        pub system: Vec<SystemEvent>,
        pub finish_on: Option<EventKind>,
        pub fail_on: Option<EventKind>,
        pub echo_raw: bool,
    }

    pub type SharedRecorder = Rc<RefCell<RecorderState>>;

    /// Subscribes to everything and records it.
    struct Recorder {
        state: SharedRecorder,
    }

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn events(&self) -> &[EventKind] {
            &EventKind::ALL
        }

        fn on_event(&mut self, cx: &mut Context<'_>, event: &Event) -> HandlerResult {
            let (finish, fail, echo) = {
                let mut state = self.state.borrow_mut();
                state.events.push(event.clone());
                let kind = Some(event.kind());
                (state.finish_on == kind, state.fail_on == kind, state.echo_raw)
            };
            if fail {
                anyhow::bail!("scripted failure on {}", event.kind().name());
            }
            if let (true, Event::RawSend { line }) = (echo, event) {
                cx.connection.privmsg("#echo", line);
            }
            Ok(if finish { Flow::Finished } else { Flow::Continue })
        }

        fn on_system(&mut self, _cx: &mut SystemContext<'_>, event: &SystemEvent) -> HandlerResult {
            if *event != SystemEvent::Tick {
                self.state.borrow_mut().system.push(event.clone());
            }
            Ok(Flow::Continue)
        }
    }

    /// Catalog offering the recorder plugin, plus its shared record.
    pub fn recorder_catalog() -> (Catalog, SharedRecorder) {
        let state = SharedRecorder::default();
        let mut catalog = Catalog::new();
        let shared = state.clone();
        catalog.register("recorder", move || {
            Ok(Box::new(Recorder {
                state: shared.clone(),
            }) as Box<dyn Plugin>)
        });
        (catalog, state)
    }

    /// Registry with the recorder loaded, timers and an action queue.
    pub struct Harness {
        pub registry: Registry,
        pub timers: Timers,
        pub actions: Vec<Action>,
        pub clock: Arc<ManualClock>,
        recorder: SharedRecorder,
    }

    impl Harness {
        pub fn new() -> Self {
            let (catalog, recorder) = recorder_catalog();
            let (mut timers, clock) = timers();
            let mut actions = Vec::new();
            let mut registry = Registry::new(catalog, Vec::new());
            assert!(registry.load("recorder", &mut timers, &mut actions));
            Self {
                registry,
                timers,
                actions,
                clock,
                recorder,
            }
        }

        pub fn env(&mut self) -> Env<'_> {
            Env {
                plugins: &mut self.registry,
                timers: &mut self.timers,
                actions: &mut self.actions,
            }
        }

        pub fn shared_clock(&self) -> SharedClock {
            self.clock.clone()
        }

        pub fn clear(&self) {
            let mut state = self.recorder.borrow_mut();
            state.events.clear();
            state.system.clear();
        }

        /// Interpreted events seen, raw ones excluded.
        pub fn events(&self) -> Vec<Event> {
            self.recorder
                .borrow()
                .events
                .iter()
                .filter(|e| !e.kind().is_raw())
                .cloned()
                .collect()
        }

        pub fn raw_received(&self) -> Vec<String> {
            self.recorder
                .borrow()
                .events
                .iter()
                .filter_map(|e| match e {
                    Event::RawReceive { line } => Some(line.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn raw_sent(&self) -> Vec<String> {
            self.recorder
                .borrow()
                .events
                .iter()
                .filter_map(|e| match e {
                    Event::RawSend { line } => Some(line.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn finish_on(&self, kind: EventKind) {
            self.recorder.borrow_mut().finish_on = Some(kind);
        }

        pub fn fail_on(&self, kind: EventKind) {
            self.recorder.borrow_mut().fail_on = Some(kind);
        }

        /// Make the recorder answer every raw-send with a PRIVMSG to #echo.
        pub fn echo_raw_sends(&self) {
            self.recorder.borrow_mut().echo_raw = true;
        }
    }
}
