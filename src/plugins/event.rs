//! Fixed event surface delivered to plugins.
//!
//! [`Event`]s belong to one connection and are dispatched together with
//! it; [`SystemEvent`]s concern the whole process. Both map onto the
//! closed [`EventKind`] set that plugins declare interest in at load time.

use std::fmt;

use slircbot_proto::{Ctcp, Frame, Identity};

/// Names of every event a plugin can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Topic,
    Names,
    Invite,
    Join,
    Part,
    Kick,
    Mode,
    Nick,
    Notice,
    PrivateMessage,
    ChannelMessage,
    Ctcp,
    CtcpReply,
    Quit,
    RawReceive,
    RawSend,
    Unhandled,
    PluginLoad,
    PluginUnload,
    Error,
    Tick,
    Shutdown,
}

impl EventKind {
    pub const ALL: [EventKind; 23] = [
        Self::Connect,
        Self::Topic,
        Self::Names,
        Self::Invite,
        Self::Join,
        Self::Part,
        Self::Kick,
        Self::Mode,
        Self::Nick,
        Self::Notice,
        Self::PrivateMessage,
        Self::ChannelMessage,
        Self::Ctcp,
        Self::CtcpReply,
        Self::Quit,
        Self::RawReceive,
        Self::RawSend,
        Self::Unhandled,
        Self::PluginLoad,
        Self::PluginUnload,
        Self::Error,
        Self::Tick,
        Self::Shutdown,
    ];

    /// Stable name used in logs and spans.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connect => "on_connect",
            Self::Topic => "on_topic",
            Self::Names => "on_names",
            Self::Invite => "on_invite",
            Self::Join => "on_join",
            Self::Part => "on_part",
            Self::Kick => "on_kick",
            Self::Mode => "on_mode",
            Self::Nick => "on_nick",
            Self::Notice => "on_notice",
            Self::PrivateMessage => "on_private_message",
            Self::ChannelMessage => "on_channel_message",
            Self::Ctcp => "on_ctcp",
            Self::CtcpReply => "on_ctcp_reply",
            Self::Quit => "on_quit",
            Self::RawReceive => "on_raw_receive",
            Self::RawSend => "on_raw_send",
            Self::Unhandled => "on_unhandled",
            Self::PluginLoad => "on_plugin_load",
            Self::PluginUnload => "on_plugin_unload",
            Self::Error => "on_error",
            Self::Tick => "on_tick",
            Self::Shutdown => "on_shutdown",
        }
    }

    /// Raw passthrough events still reach plugins on relay-only connections.
    pub const fn is_raw(self) -> bool {
        matches!(self, Self::RawReceive | Self::RawSend)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that happened on one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Registration completed.
    Connected,
    /// Topic seen on join (`setter` is `None`) or changed by someone.
    Topic {
        channel: String,
        topic: String,
        setter: Option<Identity>,
    },
    /// Complete member list, role markers stripped.
    Names { channel: String, names: Vec<String> },
    Invite { source: Identity, channel: String },
    Join { source: Identity, channel: String },
    Part {
        source: Identity,
        channel: String,
        reason: Option<String>,
    },
    Kick {
        source: Option<Identity>,
        channel: String,
        target: String,
        reason: Option<String>,
    },
    Mode {
        source: Option<Identity>,
        target: String,
        modes: Vec<String>,
    },
    Nick {
        source: Identity,
        new_nickname: String,
    },
    /// Non-CTCP notice. `source` is `None` for server notices.
    Notice {
        source: Option<Identity>,
        target: String,
        text: String,
    },
    /// Message addressed to the bot. `action` marks a CTCP ACTION.
    PrivateMessage {
        source: Identity,
        text: String,
        action: bool,
    },
    ChannelMessage {
        source: Identity,
        channel: String,
        text: String,
        action: bool,
    },
    /// CTCP request other than ACTION.
    Ctcp {
        source: Identity,
        target: String,
        ctcp: Ctcp,
    },
    CtcpReply { source: Identity, ctcp: Ctcp },
    Quit {
        source: Identity,
        reason: Option<String>,
    },
    RawReceive { line: String },
    RawSend { line: String },
    /// Anything without a dedicated event, including lines that failed to parse.
    Unhandled { line: String, frame: Option<Frame> },
    /// A plugin failed while handling an event on this connection.
    Error { plugin: String, message: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connect,
            Self::Topic { .. } => EventKind::Topic,
            Self::Names { .. } => EventKind::Names,
            Self::Invite { .. } => EventKind::Invite,
            Self::Join { .. } => EventKind::Join,
            Self::Part { .. } => EventKind::Part,
            Self::Kick { .. } => EventKind::Kick,
            Self::Mode { .. } => EventKind::Mode,
            Self::Nick { .. } => EventKind::Nick,
            Self::Notice { .. } => EventKind::Notice,
            Self::PrivateMessage { .. } => EventKind::PrivateMessage,
            Self::ChannelMessage { .. } => EventKind::ChannelMessage,
            Self::Ctcp { .. } => EventKind::Ctcp,
            Self::CtcpReply { .. } => EventKind::CtcpReply,
            Self::Quit { .. } => EventKind::Quit,
            Self::RawReceive { .. } => EventKind::RawReceive,
            Self::RawSend { .. } => EventKind::RawSend,
            Self::Unhandled { .. } => EventKind::Unhandled,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// Process-wide happenings, dispatched without a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// `name` was loaded. Also delivered to a new plugin once per plugin
    /// that was already loaded.
    PluginLoaded { name: String },
    /// `name` is being unloaded; the plugin itself hears it first.
    PluginUnloaded { name: String },
    /// Once per driver tick.
    Tick,
    /// A plugin failed outside any connection.
    Error { plugin: String, message: String },
    /// Orderly shutdown has begun.
    Shutdown { reason: String },
}

impl SystemEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PluginLoaded { .. } => EventKind::PluginLoad,
            Self::PluginUnloaded { .. } => EventKind::PluginUnload,
            Self::Tick => EventKind::Tick,
            Self::Error { .. } => EventKind::Error,
            Self::Shutdown { .. } => EventKind::Shutdown,
        }
    }
}
