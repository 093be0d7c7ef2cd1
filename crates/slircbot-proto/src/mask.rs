//! Identity patterns.
//!
//! A [`Mask`] is a `nick!user@host` triple in which every segment is either
//! a literal (compared case-insensitively) or the whole-segment wildcard
//! `*`. Partial globs such as `ali*` are literals: permission records name
//! people, not families of hostnames.

use std::fmt;

use crate::casemap;
use crate::identity::Identity;

/// The whole-segment wildcard.
pub const WILDCARD: &str = "*";

/// A `nick!user@host` pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mask {
    /// Nickname segment.
    pub nick: String,
    /// Username segment.
    pub user: String,
    /// Hostname segment.
    pub host: String,
}

impl Mask {
    /// Build a mask from explicit segments; empty segments become `*`.
    pub fn new(nick: &str, user: &str, host: &str) -> Self {
        let seg = |s: &str| {
            if s.is_empty() {
                WILDCARD.to_owned()
            } else {
                s.to_owned()
            }
        };
        Self {
            nick: seg(nick),
            user: seg(user),
            host: seg(host),
        }
    }

    /// Parse `nick!user@host`. Missing parts default to `*`, so `alice`
    /// becomes `alice!*@*` and `*@example.org` becomes `*!*@example.org`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (head, host) = raw.split_once('@').unwrap_or((raw, ""));
        let (nick, user) = head.split_once('!').unwrap_or((head, ""));
        Self::new(nick, user, host)
    }

    /// The exact mask of a concrete identity.
    pub fn of(identity: &Identity) -> Self {
        Self::new(&identity.nickname, &identity.user, &identity.host)
    }

    /// Whether every segment of `identity` is accepted by this pattern.
    pub fn matches(&self, identity: &Identity) -> bool {
        segment_matches(&self.nick, &identity.nickname)
            && segment_matches(&self.user, &identity.user)
            && segment_matches(&self.host, &identity.host)
    }

    /// Case-insensitive equality of the patterns themselves.
    pub fn same_as(&self, other: &Mask) -> bool {
        casemap::irc_eq(&self.nick, &other.nick)
            && casemap::irc_eq(&self.user, &other.user)
            && casemap::irc_eq(&self.host, &other.host)
    }

    /// View the pattern as an identity (wildcards kept verbatim).
    pub fn to_identity(&self) -> Identity {
        Identity::new(&self.nick, &self.user, &self.host)
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}@{}", self.nick, self.user, self.host)
    }
}

/// One segment: `*` accepts anything, otherwise rfc1459 equality.
pub fn segment_matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || casemap::irc_eq(pattern, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fills_missing_segments() {
        assert_eq!(Mask::parse("alice"), Mask::new("alice", "*", "*"));
        assert_eq!(Mask::parse("*@example.org"), Mask::new("*", "*", "example.org"));
        assert_eq!(Mask::parse("a!b@c").to_string(), "a!b@c");
    }

    #[test]
    fn wildcard_is_whole_segment_only() {
        let mask = Mask::parse("ali*!*@*");
        assert!(!mask.matches(&Identity::new("alice", "u", "h")));
        assert!(mask.matches(&Identity::new("ali*", "u", "h")));
    }

    #[test]
    fn literal_segments_ignore_case() {
        let mask = Mask::parse("Alice!*@Example.ORG");
        assert!(mask.matches(&Identity::new("ALICE", "whatever", "example.org")));
        assert!(!mask.matches(&Identity::new("alice", "u", "other.org")));
    }

    #[test]
    fn same_as_compares_patterns() {
        assert!(Mask::parse("Bob!*@*").same_as(&Mask::parse("bob")));
        assert!(!Mask::parse("bob!x@*").same_as(&Mask::parse("bob")));
    }
}
