//! Message sources: server names and `nick!user@host` identities.
//!
//! # Reference
//! - RFC 2812 Section 2.3.1: Message format

use std::fmt;

use crate::casemap;

/// A user as seen on one network.
///
/// Produced by parsing a wire prefix, then stamped with the network the
/// line arrived on. The same value is used as event payload and as input
/// to permission matching.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Current nickname.
    pub nickname: String,
    /// Username (ident); may be empty when the server omitted it.
    pub user: String,
    /// Hostname; may be empty when the server omitted it.
    pub host: String,
    /// Network name this identity was observed on.
    pub network: String,
}

impl Identity {
    /// Build an identity from its three mask segments.
    pub fn new(
        nickname: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            user: user.into(),
            host: host.into(),
            network: String::new(),
        }
    }

    /// Attach the network name.
    #[must_use]
    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Same user and host under a different nickname.
    #[must_use]
    pub fn renamed(&self, nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..self.clone()
        }
    }

    /// Render as `nick!user@host`.
    pub fn mask(&self) -> String {
        format!("{}!{}@{}", self.nickname, self.user, self.host)
    }

    /// Case-folded `nick!user@host`, used as a lookup key.
    pub fn key(&self) -> String {
        casemap::fold(&self.mask())
    }

    /// Whether this identity carries `nickname` (case-insensitive).
    pub fn is(&self, nickname: &str) -> bool {
        casemap::irc_eq(&self.nickname, nickname)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nickname)?;
        if !self.user.is_empty() {
            write!(f, "!{}", self.user)?;
        }
        if !self.host.is_empty() {
            write!(f, "@{}", self.host)?;
        }
        Ok(())
    }
}

/// Origin of a frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Prefix {
    /// A server name such as `irc.example.net`.
    Server(String),
    /// A user.
    User(Identity),
}

impl Prefix {
    /// Lenient split of a prefix string (without the leading `:`).
    ///
    /// A dot before any `!` or `@` marks a server name; everything else is
    /// treated as a (possibly partial) user prefix.
    pub fn parse(raw: &str) -> Self {
        let (head, host) = match raw.split_once('@') {
            Some((head, host)) => (head, Some(host)),
            None => (raw, None),
        };
        let (nick, user) = match head.split_once('!') {
            Some((nick, user)) => (nick, Some(user)),
            None => (head, None),
        };

        if user.is_none() && host.is_none() && nick.contains('.') {
            return Prefix::Server(nick.to_owned());
        }

        Prefix::User(Identity::new(
            nick,
            user.unwrap_or_default(),
            host.unwrap_or_default(),
        ))
    }

    /// The identity, if this prefix names a user.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Prefix::User(identity) => Some(identity),
            Prefix::Server(_) => None,
        }
    }

    /// Nickname or server name, whichever this prefix carries.
    pub fn name(&self) -> &str {
        match self {
            Prefix::Server(name) => name,
            Prefix::User(identity) => &identity.nickname,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => f.write_str(name),
            Prefix::User(identity) => identity.fmt(f),
        }
    }
}
