//! Sending through one connection or many.

use crate::network::connection::Connection;

/// Anything that can be told to speak on IRC.
///
/// Implemented by a single [`Connection`] and by a [`Group`] of them, so
/// callers holding a selection do not care how many matched. Commands
/// return the bytes written or queued, summed over members.
pub trait Target {
    fn name(&self) -> &str;
    fn nickname(&self) -> &str;
    fn network_name(&self) -> &str;

    fn privmsg(&mut self, target: &str, text: &str) -> usize;
    fn notice(&mut self, target: &str, text: &str) -> usize;
    fn action(&mut self, target: &str, text: &str) -> usize;
    fn join(&mut self, channel: &str, key: Option<&str>) -> usize;
    fn part(&mut self, channel: &str, reason: Option<&str>) -> usize;
    fn set_nick(&mut self, nickname: &str) -> usize;
    fn raw(&mut self, line: &str) -> usize;
    fn quit(&mut self, reason: Option<&str>);
}

impl Target for Connection {
    fn name(&self) -> &str {
        Connection::name(self)
    }

    fn nickname(&self) -> &str {
        Connection::nickname(self)
    }

    fn network_name(&self) -> &str {
        Connection::network_name(self)
    }

    fn privmsg(&mut self, target: &str, text: &str) -> usize {
        Connection::privmsg(self, target, text)
    }

    fn notice(&mut self, target: &str, text: &str) -> usize {
        Connection::notice(self, target, text)
    }

    fn action(&mut self, target: &str, text: &str) -> usize {
        Connection::action(self, target, text)
    }

    fn join(&mut self, channel: &str, key: Option<&str>) -> usize {
        Connection::join(self, channel, key)
    }

    fn part(&mut self, channel: &str, reason: Option<&str>) -> usize {
        Connection::part(self, channel, reason)
    }

    fn set_nick(&mut self, nickname: &str) -> usize {
        Connection::set_nick(self, nickname)
    }

    fn raw(&mut self, line: &str) -> usize {
        Connection::raw(self, line)
    }

    fn quit(&mut self, reason: Option<&str>) {
        Connection::quit(self, reason)
    }
}

/// Several connections addressed as one. Attribute reads answer for the
/// first member.
#[derive(Debug)]
pub struct Group<'a> {
    members: Vec<&'a mut Connection>,
}

impl<'a> Group<'a> {
    pub(crate) fn new(members: Vec<&'a mut Connection>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|c| c.name()).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.members.iter_mut().map(|c| &mut **c)
    }

    fn first(&self) -> Option<&Connection> {
        self.members.first().map(|c| &**c)
    }

    fn each(&mut self, mut f: impl FnMut(&mut Connection) -> usize) -> usize {
        self.members.iter_mut().map(|c| f(c)).sum()
    }
}

impl Target for Group<'_> {
    fn name(&self) -> &str {
        self.first().map_or("", |c| c.name())
    }

    fn nickname(&self) -> &str {
        self.first().map_or("", |c| c.nickname())
    }

    fn network_name(&self) -> &str {
        self.first().map_or("", |c| c.network_name())
    }

    fn privmsg(&mut self, target: &str, text: &str) -> usize {
        self.each(|c| c.privmsg(target, text))
    }

    fn notice(&mut self, target: &str, text: &str) -> usize {
        self.each(|c| c.notice(target, text))
    }

    fn action(&mut self, target: &str, text: &str) -> usize {
        self.each(|c| c.action(target, text))
    }

    fn join(&mut self, channel: &str, key: Option<&str>) -> usize {
        self.each(|c| c.join(channel, key))
    }

    fn part(&mut self, channel: &str, reason: Option<&str>) -> usize {
        self.each(|c| c.part(channel, reason))
    }

    fn set_nick(&mut self, nickname: &str) -> usize {
        self.each(|c| c.set_nick(nickname))
    }

    fn raw(&mut self, line: &str) -> usize {
        self.each(|c| c.raw(line))
    }

    fn quit(&mut self, reason: Option<&str>) {
        for member in &mut self.members {
            member.quit(reason);
        }
    }
}

/// Outcome of a selection query.
#[derive(Debug)]
pub enum Selection<'a> {
    One(&'a mut Connection),
    Group(Group<'a>),
    NotFound,
}

impl<'a> Selection<'a> {
    pub(crate) fn from_matches(mut matches: Vec<&'a mut Connection>) -> Self {
        match matches.len() {
            0 => Self::NotFound,
            1 => matches.pop().map_or(Self::NotFound, Self::One),
            _ => Self::Group(Group::new(matches)),
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    /// Number of connections selected.
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Group(group) => group.len(),
            Self::NotFound => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The selection as a send target, if anything matched.
    pub fn target(&mut self) -> Option<&mut dyn Target> {
        match self {
            Self::One(connection) => Some(&mut **connection),
            Self::Group(group) => Some(group),
            Self::NotFound => None,
        }
    }
}
