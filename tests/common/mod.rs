//! Integration test common infrastructure.
//!
//! Provides a scripted IRC server and helpers for driving the bot tick
//! by tick against it.

pub mod server;

#[allow(unused_imports)]
pub use server::TestServer;

use std::thread;
use std::time::{Duration, Instant};

use slircbot::config::Config;
use slircbot::runtime::Bot;

/// Config with one network on `port` and one connection, `main`.
#[allow(dead_code)]
pub fn config(port: u16, extra: &str) -> Config {
    Config::parse(&format!(
        r##"
        [bot]
        ctcp_version = "slircbot integration"

        [flood]
        threshold = 100000.0

        [[network]]
        name = "loopback"
        servers = [{{ address = "127.0.0.1", port = {port} }}]

        [[connection]]
        name = "main"
        network = "loopback"
        nickname = "itbot"
        channels = ["#it"]

        {extra}
        "##
    ))
    .expect("test config parses")
}

/// Tick until `done` holds, failing the test after five seconds.
#[allow(dead_code)]
pub fn tick_until(bot: &mut Bot, what: &str, mut done: impl FnMut(&Bot) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(bot) {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        bot.tick();
        thread::sleep(Duration::from_millis(5));
    }
}
