//! One parsed wire line.
//!
//! ```text
//! [@tags] [:prefix] <command> [params...] [:trailing]
//! ```
//!
//! Parsing is lenient where servers are sloppy (repeated spaces, missing
//! user/host in prefixes) and strict where ambiguity would change meaning
//! (the command token must be letters or a three digit numeric). IRCv3
//! tags are accepted and skipped; the runtime does not negotiate them.

use std::borrow::Cow;
use std::fmt;

use nom::{
    bytes::complete::{take_till, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;

use crate::error::{ParseError, Result};
use crate::identity::{Identity, Prefix};

/// RFC 2812: at most 15 parameters; the 15th absorbs the remainder.
pub const MAX_PARAMS: usize = 15;

/// A parsed (or to-be-serialized) protocol line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Message source, absent on most client-originated lines.
    pub prefix: Option<Prefix>,
    /// Uppercased command word or three digit numeric.
    pub command: String,
    /// Middle parameters.
    pub params: Vec<String>,
    /// The `:`-introduced final parameter, which may contain spaces.
    pub trailing: Option<String>,
}

fn tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_till(|c: char| c == ' '))(input)
}

fn prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_till(|c: char| c == ' '))(input)
}

fn command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

fn spaces(input: &str) -> IResult<&str, &str> {
    space0(input)
}

fn is_valid_command(cmd: &str) -> bool {
    cmd.bytes().all(|b| b.is_ascii_alphabetic())
        || (cmd.len() == 3 && cmd.bytes().all(|b| b.is_ascii_digit()))
}

/// Split what follows the command into middle params and the trailing one.
fn split_params(mut rest: &str) -> (SmallVec<[&str; MAX_PARAMS]>, Option<&str>) {
    let mut params: SmallVec<[&str; MAX_PARAMS]> = SmallVec::new();

    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            return (params, None);
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            return (params, Some(trailing));
        }
        if params.len() == MAX_PARAMS - 1 {
            return (params, Some(rest));
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }
}

impl Frame {
    /// Parse one line. Line terminators are ignored if present.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let (rest, _) = opt(tags)(line).map_err(|_| ParseError::Empty)?;
        let (rest, _) = spaces(rest).map_err(|_| ParseError::Empty)?;
        let (rest, raw_prefix) = opt(prefix)(rest).map_err(|_| ParseError::EmptyPrefix)?;
        if raw_prefix == Some("") {
            return Err(ParseError::EmptyPrefix);
        }
        let (rest, _) = spaces(rest).map_err(|_| ParseError::Empty)?;
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let token = rest.split(' ').next().unwrap_or(rest);
        let (rest, cmd) =
            command(rest).map_err(|_| ParseError::InvalidCommand(token.to_owned()))?;
        if !is_valid_command(cmd) {
            return Err(ParseError::InvalidCommand(token.to_owned()));
        }
        if !rest.is_empty() && !rest.starts_with(' ') {
            return Err(ParseError::TrailingInput(line.len() - rest.len()));
        }

        let (params, trailing) = split_params(rest);

        Ok(Self {
            prefix: raw_prefix.map(Prefix::parse),
            command: cmd.to_ascii_uppercase(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            trailing: trailing.map(str::to_owned),
        })
    }

    /// Start an outgoing frame.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params: Vec::new(),
            trailing: None,
        }
    }

    /// Append a middle parameter. Spaces and line breaks are removed.
    #[must_use]
    pub fn with_param(mut self, param: &str) -> Self {
        self.params.push(sanitize_param(param).into_owned());
        self
    }

    /// Set the trailing parameter. Line breaks and NULs are removed.
    #[must_use]
    pub fn with_trailing(mut self, trailing: &str) -> Self {
        self.trailing = Some(sanitize(trailing).into_owned());
        self
    }

    /// Positional argument `n`, counting the trailing parameter as the last one.
    pub fn arg(&self, n: usize) -> Option<&str> {
        match self.params.get(n) {
            Some(p) => Some(p.as_str()),
            None if n == self.params.len() => self.trailing.as_deref(),
            None => None,
        }
    }

    /// The final argument, whether trailing or middle.
    pub fn last_arg(&self) -> Option<&str> {
        self.trailing
            .as_deref()
            .or_else(|| self.params.last().map(String::as_str))
    }

    /// Number of positional arguments including the trailing one.
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.trailing.is_some())
    }

    /// The sending user, if the prefix names one.
    pub fn source(&self) -> Option<&Identity> {
        self.prefix.as_ref().and_then(Prefix::identity)
    }

    /// Whether the command is a three digit numeric reply.
    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }

    // === Outgoing constructors ===

    /// `NICK <nick>`
    pub fn nick(nick: &str) -> Self {
        Self::new("NICK").with_param(nick)
    }

    /// `USER <user> 0 * :<realname>`
    pub fn user(username: &str, realname: &str) -> Self {
        Self::new("USER")
            .with_param(username)
            .with_param("0")
            .with_param("*")
            .with_trailing(realname)
    }

    /// `PASS <password>`
    pub fn pass(password: &str) -> Self {
        Self::new("PASS").with_param(password)
    }

    /// `PING :<token>`
    pub fn ping(token: &str) -> Self {
        Self::new("PING").with_trailing(token)
    }

    /// `PONG :<token>`
    pub fn pong(token: &str) -> Self {
        Self::new("PONG").with_trailing(token)
    }

    /// `JOIN <channel> [key]`
    pub fn join(channel: &str, key: Option<&str>) -> Self {
        let frame = Self::new("JOIN").with_param(channel);
        match key {
            Some(key) => frame.with_param(key),
            None => frame,
        }
    }

    /// `PART <channel> [:reason]`
    pub fn part(channel: &str, reason: Option<&str>) -> Self {
        let frame = Self::new("PART").with_param(channel);
        match reason {
            Some(reason) => frame.with_trailing(reason),
            None => frame,
        }
    }

    /// `QUIT [:reason]`
    pub fn quit(reason: Option<&str>) -> Self {
        let frame = Self::new("QUIT");
        match reason {
            Some(reason) => frame.with_trailing(reason),
            None => frame,
        }
    }

    /// `PRIVMSG <target> :<text>`
    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG").with_param(target).with_trailing(text)
    }

    /// `NOTICE <target> :<text>`
    pub fn notice(target: &str, text: &str) -> Self {
        Self::new("NOTICE").with_param(target).with_trailing(text)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        if let Some(trailing) = &self.trailing {
            write!(f, " :{trailing}")?;
        }
        Ok(())
    }
}

/// Remove characters that would terminate or corrupt a wire line.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if text.contains(['\r', '\n', '\0']) {
        Cow::Owned(text.replace(['\r', '\n', '\0'], ""))
    } else {
        Cow::Borrowed(text)
    }
}

fn sanitize_param(param: &str) -> Cow<'_, str> {
    if param.contains(['\r', '\n', '\0', ' ']) {
        Cow::Owned(param.replace(['\r', '\n', '\0', ' '], ""))
    } else {
        Cow::Borrowed(param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping_with_trailing() {
        let frame = Frame::parse("PING :abc123\r\n").unwrap();
        assert_eq!(frame.command, "PING");
        assert!(frame.params.is_empty());
        assert_eq!(frame.trailing.as_deref(), Some("abc123"));
        assert_eq!(frame.arg(0), Some("abc123"));
    }

    #[test]
    fn parses_prefix_params_and_trailing() {
        let frame = Frame::parse(":alice!a@host PRIVMSG #rust :hello there").unwrap();
        assert_eq!(frame.source().map(|s| s.nickname.as_str()), Some("alice"));
        assert_eq!(frame.params, vec!["#rust"]);
        assert_eq!(frame.trailing.as_deref(), Some("hello there"));
        assert_eq!(frame.last_arg(), Some("hello there"));
        assert_eq!(frame.arg_count(), 2);
    }

    #[test]
    fn skips_tags_and_collapses_spaces() {
        let frame = Frame::parse("@time=2024-01-01T00:00:00Z :srv.example  MODE  #c +o  bob").unwrap();
        assert_eq!(frame.prefix, Some(Prefix::Server("srv.example".into())));
        assert_eq!(frame.params, vec!["#c", "+o", "bob"]);
        assert_eq!(frame.trailing, None);
    }

    #[test]
    fn numeric_commands_are_recognised() {
        let frame = Frame::parse(":irc.example.net 001 bot :Welcome").unwrap();
        assert!(frame.is_numeric());
        assert_eq!(frame.arg(0), Some("bot"));
    }

    #[test]
    fn lowercase_commands_are_normalised() {
        assert_eq!(Frame::parse("privmsg #a :b").unwrap().command, "PRIVMSG");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Frame::parse(""), Err(ParseError::Empty));
        assert_eq!(Frame::parse("   \r\n"), Err(ParseError::Empty));
        assert_eq!(Frame::parse(": PING"), Err(ParseError::EmptyPrefix));
        assert!(matches!(Frame::parse("12 foo"), Err(ParseError::InvalidCommand(_))));
        assert!(matches!(Frame::parse("PRIV1 foo"), Err(ParseError::InvalidCommand(_))));
        assert!(matches!(Frame::parse("PRIVMSG#x"), Err(ParseError::TrailingInput(_))));
    }

    #[test]
    fn fifteenth_param_absorbs_the_rest() {
        let line = "CMD 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16";
        let frame = Frame::parse(line).unwrap();
        assert_eq!(frame.params.len(), 14);
        assert_eq!(frame.trailing.as_deref(), Some("15 16"));
    }

    #[test]
    fn serializes_outgoing_frames() {
        assert_eq!(Frame::privmsg("#c", "hi there").to_string(), "PRIVMSG #c :hi there");
        assert_eq!(Frame::user("bot", "The Bot").to_string(), "USER bot 0 * :The Bot");
        assert_eq!(Frame::join("#c", None).to_string(), "JOIN #c");
        assert_eq!(Frame::quit(None).to_string(), "QUIT");
        assert_eq!(Frame::pong("abc123").to_string(), "PONG :abc123");
    }

    #[test]
    fn outgoing_frames_cannot_smuggle_commands() {
        let frame = Frame::privmsg("#c x", "hi\r\nQUIT :bye");
        assert_eq!(frame.to_string(), "PRIVMSG #cx :hiQUIT :bye");
    }
}
