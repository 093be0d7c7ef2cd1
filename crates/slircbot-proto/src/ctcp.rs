//! Client-to-client extension messages.
//!
//! A CTCP message rides inside a PRIVMSG (request) or NOTICE (reply) body,
//! framed by `\x01` bytes: `\x01VERSION\x01`, `\x01PING 1700000000\x01`.
//! The closing delimiter is optional on receipt; some clients drop it.

use std::fmt;

/// Framing byte around every CTCP body.
pub const DELIM: char = '\x01';

/// Requests the runtime answers itself unless a plugin claims them.
pub const BUILTIN_REPLIES: &[&str] = &["VERSION", "PING", "TIME", "CLIENTINFO"];

/// Well-known CTCP commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtcpKind {
    /// `/me` emote; delivered as a message, not a request.
    Action,
    /// Client name and version.
    Version,
    /// Round-trip probe; the reply echoes the parameters.
    Ping,
    /// Local time.
    Time,
    /// Supported commands.
    ClientInfo,
    /// Anything else.
    Other,
}

impl CtcpKind {
    /// Classify an uppercased command word.
    pub fn of(command: &str) -> Self {
        match command {
            "ACTION" => Self::Action,
            "VERSION" => Self::Version,
            "PING" => Self::Ping,
            "TIME" => Self::Time,
            "CLIENTINFO" => Self::ClientInfo,
            _ => Self::Other,
        }
    }
}

/// One decoded CTCP body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ctcp {
    /// Uppercased command word, e.g. `ACTION`.
    pub command: String,
    /// Everything after the first space, if non-empty.
    pub params: Option<String>,
}

impl Ctcp {
    /// Build a CTCP value from parts.
    pub fn new(command: &str, params: Option<&str>) -> Self {
        Self {
            command: command.to_ascii_uppercase(),
            params: params.filter(|p| !p.is_empty()).map(str::to_owned),
        }
    }

    /// Decode a message body. `None` unless the body starts with `\x01`
    /// and carries a command word.
    pub fn parse(body: &str) -> Option<Self> {
        let inner = body.strip_prefix(DELIM)?;
        let inner = inner.strip_suffix(DELIM).unwrap_or(inner);
        let (command, params) = match inner.split_once(' ') {
            Some((command, params)) => (command, Some(params)),
            None => (inner, None),
        };
        if command.is_empty() {
            return None;
        }
        Some(Self::new(command, params))
    }

    /// Whether a message body is CTCP-framed.
    #[inline]
    pub fn is_ctcp(body: &str) -> bool {
        body.starts_with(DELIM)
    }

    /// Case-insensitive command check.
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }

    /// Which well-known command this is.
    pub fn kind(&self) -> CtcpKind {
        CtcpKind::of(&self.command)
    }

    /// Parameters or the empty string.
    pub fn params_or_empty(&self) -> &str {
        self.params.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Ctcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DELIM}{}", self.command)?;
        if let Some(params) = &self.params {
            write!(f, " {params}")?;
        }
        write!(f, "{DELIM}")
    }
}
