//! Plugin contract and dispatch.
//!
//! A plugin is a boxed [`Plugin`] produced by a factory in the
//! [`Catalog`]. At load time it declares which [`EventKind`]s it handles;
//! the [`Registry`] indexes those once and later calls only the plugins
//! registered for an event, in priority order, until one returns
//! [`Flow::Finished`].
//!
//! Handlers receive a [`Context`] carrying the originating connection,
//! the shared timer table and a queue for [`Action`]s that touch the
//! registry or the set of connections and therefore run after dispatch.

mod catalog;
mod event;
mod listener;
mod registry;

pub use catalog::{Catalog, Factory};
pub use event::{Event, EventKind, SystemEvent};
pub use listener::{AuthListener, Listener};
pub use registry::{LoadedPlugin, Registry};

use crate::network::connection::Connection;
use crate::runtime::{Action, Timers};

/// Version of the plugin contract implemented by this runtime.
pub const API_VERSION: u32 = 1;

/// Whether dispatch continues past a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    /// Stop the chain; later handlers and default replies are skipped.
    Finished,
}

impl Flow {
    #[inline]
    pub fn is_finished(self) -> bool {
        self == Self::Finished
    }
}

/// Result of a plugin handler. Errors propagate out of dispatch.
pub type HandlerResult = anyhow::Result<Flow>;

/// Handler context for connection-scoped events.
pub struct Context<'a> {
    pub connection: &'a mut Connection,
    pub timers: &'a mut Timers,
    actions: &'a mut Vec<Action>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        connection: &'a mut Connection,
        timers: &'a mut Timers,
        actions: &'a mut Vec<Action>,
    ) -> Self {
        Self {
            connection,
            timers,
            actions,
        }
    }

    /// Queue an action for after the current dispatch.
    pub fn request(&mut self, action: Action) {
        self.actions.push(action);
    }
}

/// Handler context for process-wide events.
pub struct SystemContext<'a> {
    pub timers: &'a mut Timers,
    actions: &'a mut Vec<Action>,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(timers: &'a mut Timers, actions: &'a mut Vec<Action>) -> Self {
        Self { timers, actions }
    }

    pub fn request(&mut self, action: Action) {
        self.actions.push(action);
    }
}

/// A dynamically loaded event handler.
pub trait Plugin {
    /// Unique name; must equal the catalog name it was loaded under.
    fn name(&self) -> &str;

    fn api_version(&self) -> u32 {
        API_VERSION
    }

    /// Events this plugin handles. Read once at load time.
    fn events(&self) -> &[EventKind];

    /// Connection-scoped events.
    fn on_event(&mut self, cx: &mut Context<'_>, event: &Event) -> HandlerResult {
        let _ = (cx, event);
        Ok(Flow::Continue)
    }

    /// Process-wide events.
    fn on_system(&mut self, cx: &mut SystemContext<'_>, event: &SystemEvent) -> HandlerResult {
        let _ = (cx, event);
        Ok(Flow::Continue)
    }
}
