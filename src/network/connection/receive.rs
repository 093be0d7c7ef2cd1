//! Receive path: one wire line in, bookkeeping, then one event out.
//!
//! `PING` and `PONG` are keepalive traffic and never reach plugins. Every
//! other line is interpreted first: state the connection tracks
//! (registration, nickname, channels, names lists, the permission store)
//! is updated before anything is dispatched, so handlers always observe
//! the new state. The line is then offered raw, then as the interpreted
//! event. A raw handler returning `Finished` or failing suppresses the
//! interpreted event but never the bookkeeping.

use rand::Rng;
use slircbot_proto::casemap::{fold, irc_eq};
use slircbot_proto::chan::{is_channel, strip_member_prefix, strip_status_prefix};
use slircbot_proto::{Ctcp, CtcpKind, Frame, Identity, Numeric};
use tracing::{debug, info, trace, warn};

use super::{Connection, ConnectionState, Role};
use crate::error::PluginError;
use crate::plugins::{Event, Flow};
use crate::runtime::Env;

/// Commands answered by the built-in CTCP replies.
const CLIENTINFO: &str = "ACTION CLIENTINFO PING TIME VERSION";

impl Connection {
    /// Handle one received line.
    pub fn on_receive(&mut self, line: &str, env: &mut Env<'_>) -> Result<(), PluginError> {
        trace!(connection = %self.name, line, "recv");
        let frame = match Frame::parse(line) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection = %self.name, error = %e, error_code = e.error_code(), "unparseable line");
                let raw = self.emit(&Event::RawReceive { line: line.to_owned() }, env)?;
                if !raw.is_finished() {
                    self.emit(
                        &Event::Unhandled {
                            line: line.to_owned(),
                            frame: None,
                        },
                        env,
                    )?;
                }
                return Ok(());
            }
        };

        match frame.command.as_str() {
            "PING" => {
                let token = frame.last_arg().unwrap_or_default();
                self.send(&Frame::pong(token).to_string(), true);
                return Ok(());
            }
            "PONG" => {
                self.unacked = 0;
                return Ok(());
            }
            _ => {}
        }

        let event = self.interpret(frame, line);
        let listened = match &event {
            Some(event) => env.plugins.dispatch_listeners(event, self),
            None => Flow::Continue,
        };
        let raw = self.emit(&Event::RawReceive { line: line.to_owned() }, env)?;
        let Some(event) = event else {
            return Ok(());
        };
        if raw.is_finished() || listened.is_finished() {
            return Ok(());
        }
        let flow = self.emit_to_plugins(&event, env)?;
        if let Event::Ctcp { source, ctcp, .. } = &event {
            if !flow.is_finished() {
                self.answer_ctcp(source, ctcp);
            }
        }
        Ok(())
    }

    /// Dispatch `event` for this connection. Relay-only connections run
    /// the internal listeners but only pass raw lines on to plugins.
    pub(crate) fn emit(&mut self, event: &Event, env: &mut Env<'_>) -> Result<Flow, PluginError> {
        if self.settings.role == Role::Slave && !event.kind().is_raw() {
            env.plugins.dispatch_listeners(event, self);
            return Ok(Flow::Continue);
        }
        let flow = env.plugins.dispatch(event, self, env.timers, env.actions);
        let flushed = self.flush_raw(env);
        let flow = flow?;
        flushed?;
        Ok(flow)
    }

    /// Dispatch an interpreted event whose listeners already ran.
    fn emit_to_plugins(&mut self, event: &Event, env: &mut Env<'_>) -> Result<Flow, PluginError> {
        if self.settings.role == Role::Slave {
            return Ok(Flow::Continue);
        }
        let flow = env.plugins.dispatch_plugins(event, self, env.timers, env.actions);
        let flushed = self.flush_raw(env);
        let flow = flow?;
        flushed?;
        Ok(flow)
    }

    /// Fan the lines sent since the last flush out as raw-send events.
    /// Lines sent from inside a raw-send handler are not fanned out again.
    pub(crate) fn flush_raw(&mut self, env: &mut Env<'_>) -> Result<(), PluginError> {
        if self.in_raw_send || self.pending_raw.is_empty() {
            return Ok(());
        }
        let lines = std::mem::take(&mut self.pending_raw);
        self.in_raw_send = true;
        let mut result = Ok(());
        for line in lines {
            if let Err(e) = env
                .plugins
                .dispatch(&Event::RawSend { line }, self, env.timers, env.actions)
            {
                result = Err(e);
                break;
            }
        }
        self.in_raw_send = false;
        result
    }

    /// Bookkeeping for `frame`, returning the event to dispatch.
    fn interpret(&mut self, frame: Frame, line: &str) -> Option<Event> {
        let source = frame
            .source()
            .cloned()
            .map(|identity| identity.on_network(self.network.name.as_str()));

        if let Some(numeric) = Numeric::from_command(&frame.command) {
            return self.interpret_numeric(numeric, frame, line);
        }

        let command = frame.command.clone();
        let arg = |n: usize| frame.arg(n).map(str::to_owned);
        let event = match (command.as_str(), source) {
            ("JOIN", Some(source)) => {
                let channel = arg(0)?;
                if source.is(&self.nickname) {
                    debug!(connection = %self.name, %channel, "joined");
                    self.channels.insert(fold(&channel), channel.clone());
                }
                Event::Join { source, channel }
            }
            ("PART", Some(source)) => {
                let channel = arg(0)?;
                if source.is(&self.nickname) {
                    debug!(connection = %self.name, %channel, "parted");
                    self.channels.remove(&fold(&channel));
                }
                Event::Part {
                    source,
                    channel,
                    reason: arg(1),
                }
            }
            ("KICK", source) => {
                let (channel, target) = (arg(0)?, arg(1)?);
                if irc_eq(&target, &self.nickname) {
                    info!(connection = %self.name, %channel, "kicked");
                    self.channels.remove(&fold(&channel));
                }
                Event::Kick {
                    source,
                    channel,
                    target,
                    reason: arg(2),
                }
            }
            ("NICK", Some(source)) => {
                let new_nickname = arg(0)?;
                if source.is(&self.nickname) {
                    info!(connection = %self.name, from = %self.nickname, to = %new_nickname, "nickname changed");
                    self.nickname = new_nickname.clone();
                }
                Event::Nick {
                    source,
                    new_nickname,
                }
            }
            ("QUIT", Some(source)) => Event::Quit {
                source,
                reason: arg(0),
            },
            ("PRIVMSG", Some(source)) => {
                let (target, text) = (arg(0)?, arg(1)?);
                match Ctcp::parse(&text) {
                    Some(ctcp) if ctcp.kind() == CtcpKind::Action => {
                        let text = ctcp.params.unwrap_or_default();
                        message(source, target, text, true)
                    }
                    Some(ctcp) => Event::Ctcp {
                        source,
                        target,
                        ctcp,
                    },
                    None => message(source, target, text, false),
                }
            }
            ("NOTICE", source) => {
                let (target, text) = (arg(0)?, arg(1)?);
                match (Ctcp::parse(&text), source) {
                    (Some(ctcp), Some(source)) => Event::CtcpReply { source, ctcp },
                    (_, source) => Event::Notice {
                        source,
                        target,
                        text,
                    },
                }
            }
            ("INVITE", Some(source)) => Event::Invite {
                source,
                channel: arg(1)?,
            },
            ("TOPIC", source) => Event::Topic {
                channel: arg(0)?,
                topic: arg(1).unwrap_or_default(),
                setter: source,
            },
            ("MODE", source) => Event::Mode {
                source,
                target: arg(0)?,
                modes: (1..frame.arg_count()).filter_map(&arg).collect(),
            },
            ("ERROR", _) => {
                warn!(connection = %self.name, message = frame.last_arg().unwrap_or(""), "server error");
                unhandled(frame, line)
            }
            _ => unhandled(frame, line),
        };
        Some(event)
    }

    fn interpret_numeric(&mut self, numeric: Numeric, frame: Frame, line: &str) -> Option<Event> {
        let arg = |n: usize| frame.arg(n).map(str::to_owned);
        let event = match numeric {
            Numeric::RPL_WELCOME => {
                if let Some(nickname) = arg(0) {
                    self.nickname = nickname;
                }
                self.on_welcome();
                Event::Connected
            }
            Numeric::ERR_NICKNAMEINUSE | Numeric::ERR_ERRONEUSNICKNAME => {
                let attempted = (frame.arg_count() >= 3).then(|| arg(1)).flatten();
                self.on_nickname_rejected(attempted.as_deref());
                unhandled(frame, line)
            }
            Numeric::RPL_TOPIC => Event::Topic {
                channel: arg(1)?,
                topic: arg(2).unwrap_or_default(),
                setter: None,
            },
            Numeric::RPL_NOTOPIC => Event::Topic {
                channel: arg(1)?,
                topic: String::new(),
                setter: None,
            },
            Numeric::RPL_NAMREPLY => {
                let (channel, names) = (arg(2)?, arg(3).unwrap_or_default());
                let (_, members) = self
                    .pending_names
                    .entry(fold(&channel))
                    .or_insert_with(|| (channel, Vec::new()));
                members.extend(
                    names
                        .split_whitespace()
                        .map(strip_member_prefix)
                        .filter(|name| !name.is_empty())
                        .map(str::to_owned),
                );
                return None;
            }
            Numeric::RPL_ENDOFNAMES => {
                let requested = arg(1)?;
                let (channel, names) = self
                    .pending_names
                    .remove(&fold(&requested))
                    .unwrap_or((requested, Vec::new()));
                Event::Names { channel, names }
            }
            _ => unhandled(frame, line),
        };
        Some(event)
    }

    fn on_welcome(&mut self) {
        self.state = ConnectionState::Ready;
        self.attempts = 0;
        self.retry_delay = std::time::Duration::ZERO;
        self.unacked = 0;
        info!(connection = %self.name, nickname = %self.nickname, "registered");

        let mut wanted: Vec<String> = self.settings.channels.clone();
        wanted.append(&mut self.rejoin);
        let mut seen = std::collections::HashSet::new();
        for entry in wanted {
            let (channel, key) = match entry.split_once(' ') {
                Some((channel, key)) => (channel.to_owned(), Some(key.trim().to_owned())),
                None => (entry, None),
            };
            if seen.insert(fold(&channel)) {
                self.join(&channel, key.as_deref());
            }
        }
    }

    /// During registration: try the alternate nickname once, then the
    /// configured one with a random four digit suffix.
    fn on_nickname_rejected(&mut self, attempted: Option<&str>) {
        if self.state != ConnectionState::Registering {
            return;
        }
        if attempted.is_some_and(|nick| !irc_eq(nick, &self.nickname)) {
            return;
        }
        let next = match &self.settings.alt_nickname {
            Some(alt) if !self.alt_tried => {
                self.alt_tried = true;
                alt.clone()
            }
            _ => format!(
                "{}_{}",
                self.settings.nickname,
                rand::thread_rng().gen_range(1000..=9999)
            ),
        };
        info!(connection = %self.name, taken = %self.nickname, trying = %next, "nickname unavailable");
        self.nickname = next;
        let line = Frame::nick(&self.nickname).to_string();
        self.send(&line, false);
    }

    fn answer_ctcp(&mut self, source: &Identity, ctcp: &Ctcp) {
        let reply = match ctcp.kind() {
            CtcpKind::Version => self.settings.ctcp_version.clone(),
            CtcpKind::Ping => ctcp.params_or_empty().to_owned(),
            CtcpKind::Time => chrono::Local::now().to_rfc2822(),
            CtcpKind::ClientInfo => CLIENTINFO.to_owned(),
            CtcpKind::Action | CtcpKind::Other => return,
        };
        debug!(connection = %self.name, to = %source.nickname, command = %ctcp.command, "ctcp reply");
        self.ctcp_reply(&source.nickname, &ctcp.command, Some(&reply));
    }
}

fn message(source: Identity, target: String, text: String, action: bool) -> Event {
    let channel = strip_status_prefix(&target);
    if is_channel(channel) {
        Event::ChannelMessage {
            source,
            channel: channel.to_owned(),
            text,
            action,
        }
    } else {
        Event::PrivateMessage {
            source,
            text,
            action,
        }
    }
}

fn unhandled(frame: Frame, line: &str) -> Event {
    Event::Unhandled {
        line: line.to_owned(),
        frame: Some(frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::Settings;
    use crate::network::connection::test_support::*;
    use crate::network::socket::mock::MockDialer;
    use crate::plugins::EventKind;
    use crate::runtime::test_support::Harness;
    use crate::security::hash_secret;

    fn ready(h: &mut Harness, settings: Settings) -> (Connection, MockDialer) {
        let dialer = MockDialer::new();
        let mut conn = connection_with("main", settings, h.shared_clock(), dialer.clone());
        conn.update(&mut h.env()).unwrap();
        dialer.wire().lock().push_line(":srv 001 bot :Welcome");
        conn.update(&mut h.env()).unwrap();
        dialer.wire().lock().take_sent();
        h.clear();
        (conn, dialer)
    }

    fn feed(h: &mut Harness, conn: &mut Connection, dialer: &MockDialer, lines: &[&str]) {
        for line in lines {
            dialer.wire().lock().push_line(line);
        }
        conn.update(&mut h.env()).unwrap();
    }

    fn alice() -> Identity {
        Identity::new("alice", "a", "host").on_network("testnet")
    }

    #[test]
    fn ping_is_answered_without_any_dispatch() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(&mut h, &mut conn, &dialer, &["PING :abc123"]);

        assert_eq!(dialer.wire().lock().sent_lines(), vec!["PONG :abc123"]);
        assert!(h.events().is_empty());
        assert_eq!(h.registry.dispatch_count(EventKind::RawReceive), 1);
    }

    #[test]
    fn welcome_joins_configured_channels_once() {
        let mut h = Harness::new();
        let dialer = MockDialer::new();
        let mut settings = settings();
        settings.channels = vec!["#a".into(), "#b key".into(), "#A".into()];
        let mut conn = connection_with("main", settings, h.shared_clock(), dialer.clone());
        conn.update(&mut h.env()).unwrap();
        dialer.wire().lock().take_sent();
        feed(&mut h, &mut conn, &dialer, &[":srv 001 bot_ :Welcome"]);

        assert!(conn.is_ready());
        assert_eq!(conn.nickname(), "bot_");
        assert_eq!(dialer.wire().lock().sent_lines(), vec!["JOIN #a", "JOIN #b key"]);
        assert!(h.events().contains(&Event::Connected));
    }

    #[test]
    fn membership_follows_own_joins_parts_and_kicks() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[
                ":bot!botuser@me JOIN #Rust",
                ":bot!botuser@me JOIN :#irc",
                ":alice!a@host JOIN #rust",
                ":bot!botuser@me PART #irc :later",
            ],
        );
        assert!(conn.is_on("#rust"));
        assert!(!conn.is_on("#irc"));
        assert_eq!(conn.channels().collect::<Vec<_>>(), vec!["#Rust"]);

        feed(&mut h, &mut conn, &dialer, &[":op!o@h KICK #rust BOT :out"]);
        assert!(!conn.is_on("#rust"));
        let kick = h.events().into_iter().last().unwrap();
        assert_eq!(
            kick,
            Event::Kick {
                source: Some(Identity::new("op", "o", "h").on_network("testnet")),
                channel: "#rust".into(),
                target: "BOT".into(),
                reason: Some("out".into()),
            }
        );
    }

    #[test]
    fn own_nick_change_is_tracked() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(&mut h, &mut conn, &dialer, &[":alice!a@host NICK :alicia", ":BOT!botuser@me NICK bot2"]);
        assert_eq!(conn.nickname(), "bot2");
        assert_eq!(
            h.events(),
            vec![
                Event::Nick {
                    source: alice(),
                    new_nickname: "alicia".into()
                },
                Event::Nick {
                    source: Identity::new("BOT", "botuser", "me").on_network("testnet"),
                    new_nickname: "bot2".into()
                },
            ]
        );
    }

    #[test]
    fn nickname_in_use_tries_alternate_then_suffix() {
        let mut h = Harness::new();
        let dialer = MockDialer::new();
        let mut settings = settings();
        settings.alt_nickname = Some("bot_alt".into());
        let mut conn = connection_with("main", settings, h.shared_clock(), dialer.clone());
        conn.update(&mut h.env()).unwrap();
        dialer.wire().lock().take_sent();

        feed(&mut h, &mut conn, &dialer, &[":srv 433 * bot :Nickname is already in use"]);
        assert_eq!(dialer.wire().lock().take_sent(), vec!["NICK bot_alt"]);

        feed(&mut h, &mut conn, &dialer, &[":srv 433 * bot_alt :Nickname is already in use"]);
        let sent = dialer.wire().lock().take_sent();
        assert_eq!(sent.len(), 1);
        let suffix = sent[0].strip_prefix("NICK bot_").unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(conn.nickname(), &sent[0][5..]);

        // Stale collisions for a nickname no longer tried are ignored.
        feed(&mut h, &mut conn, &dialer, &[":srv 433 * bot_alt :Nickname is already in use"]);
        assert!(dialer.wire().lock().take_sent().is_empty());
    }

    #[test]
    fn nickname_in_use_without_alternate_goes_straight_to_suffix() {
        let mut h = Harness::new();
        let dialer = MockDialer::new();
        let mut conn = connection_with("main", settings(), h.shared_clock(), dialer.clone());
        conn.update(&mut h.env()).unwrap();
        dialer.wire().lock().take_sent();

        feed(&mut h, &mut conn, &dialer, &[":srv 433 * bot :Nickname is already in use"]);
        let sent = dialer.wire().lock().take_sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("NICK bot_"));
        assert_eq!(sent[0].len(), "NICK bot_1234".len());
    }

    #[test]
    fn nickname_in_use_after_registration_is_left_to_plugins() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(&mut h, &mut conn, &dialer, &[":srv 433 bot taken :Nickname is already in use"]);
        assert!(dialer.wire().lock().sent_lines().is_empty());
        assert!(matches!(h.events()[..], [Event::Unhandled { .. }]));
    }

    #[test]
    fn messages_are_classified_by_target() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[
                ":alice!a@host PRIVMSG #rust :hello",
                ":alice!a@host PRIVMSG @#rust :ops only",
                ":alice!a@host PRIVMSG bot :psst",
                ":alice!a@host PRIVMSG #rust :\x01ACTION waves\x01",
                ":alice!a@host NOTICE bot :fyi",
                ":irc.server NOTICE * :*** Looking up your hostname",
            ],
        );
        assert_eq!(
            h.events(),
            vec![
                Event::ChannelMessage {
                    source: alice(),
                    channel: "#rust".into(),
                    text: "hello".into(),
                    action: false
                },
                Event::ChannelMessage {
                    source: alice(),
                    channel: "#rust".into(),
                    text: "ops only".into(),
                    action: false
                },
                Event::PrivateMessage {
                    source: alice(),
                    text: "psst".into(),
                    action: false
                },
                Event::ChannelMessage {
                    source: alice(),
                    channel: "#rust".into(),
                    text: "waves".into(),
                    action: true
                },
                Event::Notice {
                    source: Some(alice()),
                    target: "bot".into(),
                    text: "fyi".into()
                },
                Event::Notice {
                    source: None,
                    target: "*".into(),
                    text: "*** Looking up your hostname".into()
                },
            ]
        );
    }

    #[test]
    fn ctcp_requests_get_default_replies_unless_finished() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[
                ":alice!a@host PRIVMSG bot :\x01VERSION\x01",
                ":alice!a@host PRIVMSG bot :\x01PING 12345\x01",
                ":alice!a@host PRIVMSG bot :\x01FINGER\x01",
            ],
        );
        assert_eq!(
            dialer.wire().lock().take_sent(),
            vec![
                "NOTICE alice :\x01VERSION slircbot test\x01",
                "NOTICE alice :\x01PING 12345\x01",
            ]
        );

        h.finish_on(EventKind::Ctcp);
        feed(&mut h, &mut conn, &dialer, &[":alice!a@host PRIVMSG bot :\x01VERSION\x01"]);
        assert!(dialer.wire().lock().take_sent().is_empty());
    }

    #[test]
    fn ctcp_time_and_clientinfo_replies() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[
                ":alice!a@host PRIVMSG bot :\x01TIME\x01",
                ":alice!a@host PRIVMSG bot :\x01CLIENTINFO\x01",
                ":alice!a@host NOTICE bot :\x01PING 1\x01",
            ],
        );
        let sent = dialer.wire().lock().take_sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("NOTICE alice :\x01TIME "));
        assert_eq!(sent[1], format!("NOTICE alice :\x01CLIENTINFO {CLIENTINFO}\x01"));
        assert!(h.events().contains(&Event::CtcpReply {
            source: alice(),
            ctcp: Ctcp::new("PING", Some("1")),
        }));
    }

    #[test]
    fn names_accumulate_until_the_end_marker() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[
                ":srv 353 bot = #Rust :@alice +bob ~&carol",
                ":srv 353 bot = #rust :dave",
                ":srv 366 bot #rust :End of /NAMES list.",
                ":srv 366 bot #empty :End of /NAMES list.",
            ],
        );
        assert_eq!(
            h.events(),
            vec![
                Event::Names {
                    channel: "#Rust".into(),
                    names: vec!["alice".into(), "bob".into(), "carol".into(), "dave".into()],
                },
                Event::Names {
                    channel: "#empty".into(),
                    names: vec![],
                },
            ]
        );
    }

    #[test]
    fn topics_from_numerics_and_changes() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[
                ":srv 332 bot #rust :Rust talk",
                ":srv 331 bot #quiet :No topic is set",
                ":alice!a@host TOPIC #rust :new topic",
            ],
        );
        assert_eq!(
            h.events(),
            vec![
                Event::Topic {
                    channel: "#rust".into(),
                    topic: "Rust talk".into(),
                    setter: None
                },
                Event::Topic {
                    channel: "#quiet".into(),
                    topic: String::new(),
                    setter: None
                },
                Event::Topic {
                    channel: "#rust".into(),
                    topic: "new topic".into(),
                    setter: Some(alice())
                },
            ]
        );
    }

    #[test]
    fn malformed_and_unknown_lines_are_unhandled() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        feed(&mut h, &mut conn, &dialer, &[": broken", ":srv 372 bot :- motd", ":alice!a@host MODE #rust +o bob"]);
        let events = h.events();
        assert_eq!(
            events[0],
            Event::Unhandled {
                line: ": broken".into(),
                frame: None
            }
        );
        assert!(matches!(&events[1], Event::Unhandled { frame: Some(f), .. } if f.command == "372"));
        assert_eq!(
            events[2],
            Event::Mode {
                source: Some(alice()),
                target: "#rust".into(),
                modes: vec!["+o".into(), "bob".into()],
            }
        );
    }

    #[test]
    fn relay_only_connections_keep_books_but_only_pass_raw_lines() {
        let mut h = Harness::new();
        let mut settings = settings();
        settings.role = Role::Slave;
        let (mut conn, dialer) = ready(&mut h, settings);
        assert!(conn.is_ready());
        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[":bot!botuser@me JOIN #rust", ":alice!a@host PRIVMSG #rust :hi"],
        );
        assert!(conn.is_on("#rust"));
        assert!(h.events().is_empty());
        assert_eq!(h.raw_received().len(), 2);
    }

    fn identified_alice(conn: &mut Connection) -> Identity {
        let digest = hash_secret("hunter2");
        let pattern = conn.auth_mut().add_user("alice!*@*", Some(&digest));
        assert!(conn.auth_mut().grant_permission(&pattern, "admin"));
        assert!(conn.auth_mut().identify_user(&alice(), &digest));
        assert!(conn.auth().has_permission(&alice(), "admin"));
        pattern
    }

    #[test]
    fn quit_on_the_wire_clears_identification() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        identified_alice(&mut conn);

        feed(&mut h, &mut conn, &dialer, &[":alice!a@host QUIT :bye"]);
        assert!(!conn.auth().has_permission(&alice(), "admin"));
    }

    #[test]
    fn nick_on_the_wire_moves_identification() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        identified_alice(&mut conn);

        feed(&mut h, &mut conn, &dialer, &[":alice!a@host NICK alicia"]);
        assert!(conn.auth().has_permission(&alice().renamed("alicia"), "admin"));

        // The vacated nickname, claimed by someone else, is not trusted.
        let usurper = Identity::new("alice", "evil", "elsewhere").on_network("testnet");
        assert!(!conn.auth().has_permission(&usurper, "admin"));
    }

    #[test]
    fn finished_raw_handler_keeps_auth_hooks_and_bookkeeping() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        identified_alice(&mut conn);
        h.finish_on(EventKind::RawReceive);

        feed(
            &mut h,
            &mut conn,
            &dialer,
            &[":alice!a@host QUIT :bye", ":bot!botuser@me NICK bot2"],
        );
        assert!(!conn.auth().has_permission(&alice(), "admin"));
        assert_eq!(conn.nickname(), "bot2");
        assert!(h.events().is_empty());
        assert_eq!(h.raw_received().len(), 2);
    }

    #[test]
    fn failing_raw_handler_keeps_bookkeeping() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        identified_alice(&mut conn);
        h.fail_on(EventKind::RawReceive);

        dialer.wire().lock().push_line(":bot!botuser@me NICK bot2");
        dialer.wire().lock().push_line(":alice!a@host QUIT :bye");
        assert!(conn.update(&mut h.env()).is_err());
        assert_eq!(conn.nickname(), "bot2");
        assert!(h.events().is_empty());

        // The line left waiting is handled on the next update.
        assert!(conn.auth().has_permission(&alice(), "admin"));
        assert!(conn.update(&mut h.env()).is_err());
        assert!(!conn.auth().has_permission(&alice(), "admin"));
    }

    #[test]
    fn raw_send_fanout_is_not_reentrant() {
        let mut h = Harness::new();
        let (mut conn, dialer) = ready(&mut h, settings());
        h.echo_raw_sends();
        conn.privmsg("#rust", "one");
        conn.update(&mut h.env()).unwrap();
        assert_eq!(h.raw_sent(), vec!["PRIVMSG #rust :one"]);
        assert_eq!(
            dialer.wire().lock().sent_lines(),
            vec!["PRIVMSG #rust :one", "PRIVMSG #echo :PRIVMSG #rust :one"]
        );
    }
}
