//! Numeric replies the runtime reacts to.
//!
//! # Reference
//! - RFC 2812 Section 5: Replies

#![allow(non_camel_case_types)]

use std::fmt;

/// Server numerics with dedicated handling. Everything else is surfaced
/// to plugins as an unhandled line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Numeric {
    /// 001 - registration complete
    RPL_WELCOME = 1,
    /// 331 - channel has no topic
    RPL_NOTOPIC = 331,
    /// 332 - channel topic
    RPL_TOPIC = 332,
    /// 353 - one chunk of a channel's member list
    RPL_NAMREPLY = 353,
    /// 366 - end of a channel's member list
    RPL_ENDOFNAMES = 366,
    /// 432 - erroneous nickname
    ERR_ERRONEUSNICKNAME = 432,
    /// 433 - nickname already in use
    ERR_NICKNAMEINUSE = 433,
}

impl Numeric {
    /// Look up a three digit command token.
    pub fn from_command(command: &str) -> Option<Self> {
        if command.len() != 3 {
            return None;
        }
        match command.parse::<u16>().ok()? {
            1 => Some(Self::RPL_WELCOME),
            331 => Some(Self::RPL_NOTOPIC),
            332 => Some(Self::RPL_TOPIC),
            353 => Some(Self::RPL_NAMREPLY),
            366 => Some(Self::RPL_ENDOFNAMES),
            432 => Some(Self::ERR_ERRONEUSNICKNAME),
            433 => Some(Self::ERR_NICKNAMEINUSE),
            _ => None,
        }
    }

    /// Numeric value.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}
