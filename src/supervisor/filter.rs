//! Connection selection queries.
//!
//! A query is a whitespace separated list of tokens:
//!
//! - `network:<name>` - connections on that network (case-insensitive)
//! - `channel:<name>` - connections currently in that channel
//! - `master` / `slave` - connections with that role
//!
//! Every given token must match. Each key may appear once.

use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;
use crate::network::connection::{Connection, Role};

/// Parsed selection query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub network: Option<String>,
    pub channel: Option<String>,
    pub role: Option<Role>,
}

impl Filter {
    pub fn parse(query: &str) -> Result<Self, FilterError> {
        let mut filter = Self::default();
        let mut tokens = query.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return Err(FilterError::Empty);
        }

        for token in tokens {
            match token.split_once(':') {
                Some((key, value)) => {
                    let (slot, name) = match key.to_ascii_lowercase().as_str() {
                        "network" => (&mut filter.network, "network"),
                        "channel" => (&mut filter.channel, "channel"),
                        _ => return Err(FilterError::UnknownToken(token.to_owned())),
                    };
                    if value.is_empty() {
                        return Err(FilterError::MissingValue(name));
                    }
                    if slot.replace(value.to_owned()).is_some() {
                        return Err(FilterError::Repeated(name));
                    }
                }
                None => {
                    let role = if token.eq_ignore_ascii_case("master") {
                        Role::Master
                    } else if token.eq_ignore_ascii_case("slave") {
                        Role::Slave
                    } else {
                        return Err(FilterError::UnknownToken(token.to_owned()));
                    };
                    if filter.role.replace(role).is_some() {
                        return Err(FilterError::Repeated("role"));
                    }
                }
            }
        }
        Ok(filter)
    }

    /// Whether `connection` satisfies every constraint.
    pub fn matches(&self, connection: &Connection) -> bool {
        self.network
            .as_deref()
            .is_none_or(|n| n.eq_ignore_ascii_case(connection.network_name()))
            && self
                .channel
                .as_deref()
                .is_none_or(|c| connection.is_on(c))
            && self.role.is_none_or(|r| r == connection.role())
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(network) = &self.network {
            parts.push(format!("network:{network}"));
        }
        if let Some(channel) = &self.channel {
            parts.push(format!("channel:{channel}"));
        }
        match self.role {
            Some(Role::Master) => parts.push("master".into()),
            Some(Role::Slave) => parts.push("slave".into()),
            None => {}
        }
        f.write_str(&parts.join(" "))
    }
}
