//! Internal listeners that run ahead of every plugin.

use super::{Event, Flow};
use crate::network::connection::Connection;

/// Core subsystem hook. Listeners cannot fail.
pub trait Listener {
    fn name(&self) -> &'static str;

    fn on_event(&mut self, connection: &mut Connection, event: &Event) -> Flow;
}

/// Keeps each connection's permission store in step with nick changes and
/// quits, before any plugin can look up permissions for the event.
#[derive(Debug, Default)]
pub struct AuthListener;

impl Listener for AuthListener {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn on_event(&mut self, connection: &mut Connection, event: &Event) -> Flow {
        let origin = connection.name().to_owned();
        match event {
            Event::Nick {
                source,
                new_nickname,
            } => connection
                .auth_mut()
                .on_change_nick(&origin, source, new_nickname),
            Event::Quit { source, .. } => connection.auth_mut().on_quit(&origin, source),
            _ => {}
        }
        Flow::Continue
    }
}
