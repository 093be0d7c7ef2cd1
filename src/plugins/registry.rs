//! Plugin registry and event fan-out.
//!
//! The `Registry` owns every loaded plugin, keeps them sorted by priority
//! and indexes their declared events so dispatch is a map lookup. It also
//! counts dispatches per event for the statistics surface.
//!
//! Handler errors are not caught here: they leave [`Registry::dispatch`]
//! as [`PluginError::Handler`] and the driver decides what to do.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, info, warn};

use super::{
    AuthListener, Catalog, Context, Event, EventKind, Flow, Listener, Plugin, SystemContext,
    SystemEvent, API_VERSION,
};
use crate::error::PluginError;
use crate::network::connection::Connection;
use crate::runtime::{Action, Timers};
use crate::telemetry::spans;

/// (position in the configured priority list or `usize::MAX`, load sequence)
type Rank = (usize, u64);

struct PluginRecord {
    name: String,
    instance: Box<dyn Plugin>,
    events: BTreeSet<EventKind>,
    rank: Rank,
}

/// Listing entry returned by [`Registry::loaded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPlugin {
    pub name: String,
    pub events: Vec<EventKind>,
}

/// Process-wide plugin table.
pub struct Registry {
    catalog: Catalog,
    priority: Vec<String>,
    listeners: Vec<Box<dyn Listener>>,
    /// Sorted by rank; dispatch order.
    plugins: Vec<PluginRecord>,
    /// Event kind -> indexes into `plugins`, in dispatch order.
    index: HashMap<EventKind, Vec<usize>>,
    sequence: u64,
    /// Dispatch counters per event kind.
    dispatch_counts: HashMap<EventKind, u64>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("catalog", &self.catalog)
            .field("priority", &self.priority)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    /// Create a registry with the core listeners installed.
    pub fn new(catalog: Catalog, priority: Vec<String>) -> Self {
        Self {
            catalog,
            priority,
            listeners: vec![Box::new(AuthListener)],
            plugins: Vec::new(),
            index: HashMap::new(),
            sequence: 0,
            dispatch_counts: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Append an internal listener; listeners run before any plugin.
    pub fn add_listener(&mut self, listener: Box<dyn Listener>) {
        debug!(listener = listener.name(), "listener registered");
        self.listeners.push(listener);
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Loaded plugins in dispatch order with their capabilities.
    pub fn loaded(&self) -> Vec<LoadedPlugin> {
        self.plugins
            .iter()
            .map(|p| LoadedPlugin {
                name: p.name.clone(),
                events: p.events.iter().copied().collect(),
            })
            .collect()
    }

    /// How many times `kind` has been dispatched.
    pub fn dispatch_count(&self, kind: EventKind) -> u64 {
        self.dispatch_counts.get(&kind).copied().unwrap_or(0)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|p| p.name == name)
    }

    fn rank_for(&mut self, name: &str) -> Rank {
        let pinned = self
            .priority
            .iter()
            .position(|p| p == name)
            .unwrap_or(usize::MAX);
        self.sequence += 1;
        (pinned, self.sequence)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (slot, record) in self.plugins.iter().enumerate() {
            for kind in &record.events {
                self.index.entry(*kind).or_default().push(slot);
            }
        }
    }

    /// Load `name`, logging any failure.
    pub fn load(&mut self, name: &str, timers: &mut Timers, actions: &mut Vec<Action>) -> bool {
        match self.try_load(name, timers, actions) {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %name, error = %e, error_code = e.error_code(), "plugin load failed");
                false
            }
        }
    }

    /// Instantiate `name` from the catalog, check it and index it.
    pub fn try_load(
        &mut self,
        name: &str,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<(), PluginError> {
        if self.is_loaded(name) {
            return Err(PluginError::AlreadyLoaded(name.to_owned()));
        }
        let instance = match self.catalog.instantiate(name) {
            None => return Err(PluginError::NotFound(name.to_owned())),
            Some(Err(source)) => {
                return Err(PluginError::Instantiate {
                    plugin: name.to_owned(),
                    source,
                });
            }
            Some(Ok(instance)) => instance,
        };
        check_contract(name, instance.as_ref())?;

        let events: BTreeSet<EventKind> = instance.events().iter().copied().collect();
        let rank = self.rank_for(name);
        let slot = self.plugins.partition_point(|p| p.rank < rank);
        info!(
            plugin = %name,
            events = ?events,
            pinned = rank.0 != usize::MAX,
            "plugin loaded"
        );
        self.plugins.insert(
            slot,
            PluginRecord {
                name: name.to_owned(),
                instance,
                events,
                rank,
            },
        );
        self.rebuild_index();
        self.announce_load(name, timers, actions);
        Ok(())
    }

    /// Tell existing plugins about `name`, and `name` about each of them.
    fn announce_load(&mut self, name: &str, timers: &mut Timers, actions: &mut Vec<Action>) {
        let mut cx = SystemContext::new(timers, actions);
        let event = SystemEvent::PluginLoaded {
            name: name.to_owned(),
        };
        let mut others = Vec::new();
        for record in &mut self.plugins {
            if record.name == name {
                continue;
            }
            others.push(record.name.clone());
            if record.events.contains(&EventKind::PluginLoad) {
                notify(record, &mut cx, &event);
            }
        }

        let Some(slot) = self.position(name) else {
            return;
        };
        let newcomer = &mut self.plugins[slot];
        if !newcomer.events.contains(&EventKind::PluginLoad) {
            return;
        }
        for other in others {
            notify(newcomer, &mut cx, &SystemEvent::PluginLoaded { name: other });
        }
    }

    pub fn unload(&mut self, name: &str, timers: &mut Timers, actions: &mut Vec<Action>) -> bool {
        match self.try_unload(name, timers, actions) {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %name, error = %e, error_code = e.error_code(), "plugin unload failed");
                false
            }
        }
    }

    /// Remove `name`. The plugin hears its own unload first, then the rest.
    pub fn try_unload(
        &mut self,
        name: &str,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<(), PluginError> {
        let slot = self
            .position(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_owned()))?;
        let mut cx = SystemContext::new(timers, actions);
        let event = SystemEvent::PluginUnloaded {
            name: name.to_owned(),
        };

        let mut record = self.plugins.remove(slot);
        self.rebuild_index();
        if record.events.contains(&EventKind::PluginUnload) {
            notify(&mut record, &mut cx, &event);
        }
        for other in &mut self.plugins {
            if other.events.contains(&EventKind::PluginUnload) {
                notify(other, &mut cx, &event);
            }
        }
        info!(plugin = %name, "plugin unloaded");
        Ok(())
    }

    /// Unload then load again from the catalog.
    pub fn reload(
        &mut self,
        name: &str,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<(), PluginError> {
        self.try_unload(name, timers, actions)?;
        self.try_load(name, timers, actions)
    }

    /// Fan a connection event out: listeners first, then subscribed
    /// plugins in priority order.
    pub fn dispatch(
        &mut self,
        event: &Event,
        connection: &mut Connection,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<Flow, PluginError> {
        let kind = event.kind();
        *self.dispatch_counts.entry(kind).or_default() += 1;
        let span = spans::dispatch(kind.name(), Some(connection.name()));
        let _enter = span.enter();

        if self.dispatch_listeners(event, connection).is_finished() {
            return Ok(Flow::Finished);
        }
        self.fan_out(event, connection, timers, actions)
    }

    /// Dispatch to plugins only, for an event whose listeners already ran.
    pub fn dispatch_plugins(
        &mut self,
        event: &Event,
        connection: &mut Connection,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<Flow, PluginError> {
        let kind = event.kind();
        *self.dispatch_counts.entry(kind).or_default() += 1;
        let span = spans::dispatch(kind.name(), Some(connection.name()));
        let _enter = span.enter();
        self.fan_out(event, connection, timers, actions)
    }

    fn fan_out(
        &mut self,
        event: &Event,
        connection: &mut Connection,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<Flow, PluginError> {
        let kind = event.kind();
        let Some(slots) = self.index.get(&kind) else {
            return Ok(Flow::Continue);
        };
        let mut cx = Context::new(connection, timers, actions);
        for &slot in slots {
            let record = &mut self.plugins[slot];
            match record.instance.on_event(&mut cx, event) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished) => {
                    debug!(plugin = %record.name, "dispatch finished early");
                    return Ok(Flow::Finished);
                }
                Err(source) => {
                    return Err(PluginError::Handler {
                        plugin: record.name.clone(),
                        event: kind.name(),
                        source,
                    });
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Run only the internal listeners.
    pub fn dispatch_listeners(&mut self, event: &Event, connection: &mut Connection) -> Flow {
        for listener in &mut self.listeners {
            if listener.on_event(connection, event).is_finished() {
                debug!(listener = listener.name(), "dispatch finished by listener");
                return Flow::Finished;
            }
        }
        Flow::Continue
    }

    /// Fan a process-wide event out to subscribed plugins.
    pub fn dispatch_system(
        &mut self,
        event: &SystemEvent,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<Flow, PluginError> {
        let kind = event.kind();
        *self.dispatch_counts.entry(kind).or_default() += 1;
        let span = spans::dispatch(kind.name(), None);
        let _enter = span.enter();

        let Some(slots) = self.index.get(&kind) else {
            return Ok(Flow::Continue);
        };
        let mut cx = SystemContext::new(timers, actions);
        for &slot in slots {
            let record = &mut self.plugins[slot];
            match record.instance.on_system(&mut cx, event) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished) => return Ok(Flow::Finished),
                Err(source) => {
                    return Err(PluginError::Handler {
                        plugin: record.name.clone(),
                        event: kind.name(),
                        source,
                    });
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Per-tick notification.
    pub fn on_tick(
        &mut self,
        timers: &mut Timers,
        actions: &mut Vec<Action>,
    ) -> Result<Flow, PluginError> {
        self.dispatch_system(&SystemEvent::Tick, timers, actions)
    }
}

fn check_contract(name: &str, plugin: &dyn Plugin) -> Result<(), PluginError> {
    let reason = if plugin.name() != name {
        format!("reports name {:?}", plugin.name())
    } else if plugin.api_version() != API_VERSION {
        format!(
            "api version {} (runtime speaks {})",
            plugin.api_version(),
            API_VERSION
        )
    } else {
        return Ok(());
    };
    Err(PluginError::Contract {
        plugin: name.to_owned(),
        reason,
    })
}

/// Load/unload notifications are advisory; a failing handler is logged.
fn notify(record: &mut PluginRecord, cx: &mut SystemContext<'_>, event: &SystemEvent) {
    if let Err(e) = record.instance.on_system(cx, event) {
        warn!(plugin = %record.name, event = event.kind().name(), error = %e, "notification handler failed");
    }
}
