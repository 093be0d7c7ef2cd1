//! Integration tests for a bot session over real sockets.
//!
//! Registration, auto-join, keepalive answers, plugin replies, CTCP,
//! reconnecting after the server drops us, and orderly shutdown.

mod common;

use common::{TestServer, config, tick_until};
use slircbot::plugins::{Catalog, Context, Event, EventKind, Flow, HandlerResult, Plugin};
use slircbot::runtime::{Action, Bot};

/// Answers `!ping` in channels with `pong`.
struct Pinger;

impl Plugin for Pinger {
    fn name(&self) -> &str {
        "pinger"
    }

    fn events(&self) -> &[EventKind] {
        &[EventKind::ChannelMessage]
    }

    fn on_event(&mut self, cx: &mut Context<'_>, event: &Event) -> HandlerResult {
        if let Event::ChannelMessage { channel, text, .. } = event {
            if text == "!ping" {
                cx.connection.privmsg(channel, "pong");
                return Ok(Flow::Finished);
            }
        }
        Ok(Flow::Continue)
    }
}

fn ready_bot(server: &TestServer) -> Bot {
    let mut catalog = Catalog::new();
    catalog.register("pinger", || Ok(Box::new(Pinger) as Box<dyn Plugin>));
    let config = config(server.port(), "[plugins]\nload = [\"pinger\"]");
    let mut bot = Bot::new(config, catalog).expect("bot builds");

    tick_until(&mut bot, "registration", |bot| {
        bot.supervisor().get("main").is_some_and(|c| c.is_ready())
    });
    tick_until(&mut bot, "auto-join", |bot| {
        bot.supervisor().get("main").is_some_and(|c| c.is_on("#it"))
    });
    bot
}

#[test]
fn registers_and_joins_configured_channels() {
    let server = TestServer::spawn().expect("server starts");
    let bot = ready_bot(&server);

    let received = server.received();
    assert_eq!(received[0], "NICK itbot");
    assert!(received[1].starts_with("USER "));
    assert!(server.has_received("JOIN #it"));
    assert!(bot.plugins().is_loaded("pinger"));
}

#[test]
fn server_ping_is_answered() {
    let server = TestServer::spawn().expect("server starts");
    let mut bot = ready_bot(&server);

    server.send("PING :zzz");
    tick_until(&mut bot, "PONG", |_| server.has_received("PONG :zzz"));
}

#[test]
fn plugins_answer_over_the_wire() {
    let server = TestServer::spawn().expect("server starts");
    let mut bot = ready_bot(&server);

    server.send(":alice!a@example.org PRIVMSG #it :!ping");
    tick_until(&mut bot, "plugin reply", |_| {
        server.has_received("PRIVMSG #it :pong")
    });
}

#[test]
fn ctcp_version_gets_the_configured_answer() {
    let server = TestServer::spawn().expect("server starts");
    let mut bot = ready_bot(&server);

    server.send(":alice!a@example.org PRIVMSG itbot :\x01VERSION\x01");
    tick_until(&mut bot, "VERSION reply", |_| {
        server.has_received("NOTICE alice :\x01VERSION slircbot integration\x01")
    });
}

#[test]
fn dropped_session_redials_and_rejoins() {
    let server = TestServer::spawn().expect("server starts");
    let mut bot = ready_bot(&server);

    server.hang_up();
    tick_until(&mut bot, "second connection", |_| server.accepted() == 2);
    tick_until(&mut bot, "rejoin", |bot| {
        bot.supervisor().get("main").is_some_and(|c| c.is_on("#it"))
    });
    let joins = server
        .received()
        .iter()
        .filter(|l| l.as_str() == "JOIN #it")
        .count();
    assert_eq!(joins, 2);
}

#[test]
fn shutdown_quits_and_finishes() {
    let server = TestServer::spawn().expect("server starts");
    let mut bot = ready_bot(&server);

    bot.request(Action::Shutdown {
        reason: "done testing".into(),
    });
    tick_until(&mut bot, "QUIT", |_| server.has_received("QUIT :done testing"));
    tick_until(&mut bot, "all connections closed", |bot| {
        bot.supervisor().is_finished()
    });
}
