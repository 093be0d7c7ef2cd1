//! Dialing, reconnect backoff, keepalive and teardown.
//!
//! Each attempt computes `base * 2^attempt` as the delay to wait should it
//! fail, then dials the next server in rotation. Once `max_attempts` dials
//! in a row have failed the connection is marked destroyed and the
//! supervisor drops it. A welcome from the server resets the count.

use std::time::Duration;

use slircbot_proto::Frame;
use tracing::{error, info, warn};

use super::{Connection, ConnectionState};
use crate::error::{DisconnectReason, PluginError};
use crate::network::socket::Endpoint;
use crate::runtime::{Core, Env, Timers};
use crate::scheduler::TimerKind;

/// `base * 2^attempt`, saturating at `Duration::MAX`.
pub(super) fn backoff(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

impl Connection {
    /// Dial the next server and start registration.
    pub fn connect(&mut self, env: &mut Env<'_>) {
        self.start_pending = false;
        if self.destroyed || self.quitting.is_some() {
            return;
        }
        if let Some(id) = self.retry_timer.take() {
            env.timers.destroy(id);
        }

        self.retry_delay = backoff(self.settings.base_delay, self.attempts);
        self.attempts += 1;
        let Some(endpoint) = self.next_endpoint() else {
            error!(connection = %self.name, network = %self.network.name, "network has no servers");
            self.destroyed = true;
            return;
        };

        self.state = ConnectionState::Connecting;
        info!(
            connection = %self.name,
            server = %endpoint,
            attempt = self.attempts,
            "connecting"
        );
        self.socket.set_server_info(endpoint);
        match self.socket.connect() {
            Ok(()) => self.register(env),
            Err(e) => {
                warn!(
                    connection = %self.name,
                    error = %e,
                    error_code = e.error_code(),
                    attempt = self.attempts,
                    "dial failed"
                );
                self.state = ConnectionState::Disconnected;
                self.schedule_retry(env);
            }
        }
    }

    fn next_endpoint(&mut self) -> Option<Endpoint> {
        let servers = &self.network.servers;
        if servers.is_empty() {
            return None;
        }
        let endpoint = servers[self.next_server % servers.len()].clone();
        self.next_server = (self.next_server + 1) % servers.len();
        Some(endpoint)
    }

    /// PASS (never shown to plugins), NICK, USER.
    fn register(&mut self, env: &mut Env<'_>) {
        self.state = ConnectionState::Registering;
        self.alt_tried = false;
        self.unacked = 0;
        self.nickname = self.settings.nickname.clone();
        self.inbox.clear();
        self.failure = None;

        if let Some(password) = self.settings.password.clone() {
            self.send(&Frame::pass(&password).to_string(), true);
        }
        let nick = Frame::nick(&self.nickname).to_string();
        self.send(&nick, false);
        let user = Frame::user(&self.settings.username, &self.settings.realname).to_string();
        self.send(&user, false);
        self.start_keepalive(env.timers);
    }

    fn start_keepalive(&mut self, timers: &mut Timers) {
        if let Some(id) = self.keepalive_timer.take() {
            timers.destroy(id);
        }
        if self.settings.keepalive_interval.is_zero() {
            return;
        }
        let name = self.name.clone();
        let id = timers.create_labeled(
            format!("keepalive:{name}"),
            self.settings.keepalive_interval,
            TimerKind::Interval,
            move |timers, core: &mut Core| {
                core.with_connection(&name, timers, |connection, env| connection.keepalive(env))
                    .ok_or_else(|| anyhow::anyhow!("connection {name} is gone"))
            },
        );
        self.keepalive_timer = Some(id);
    }

    /// Send a liveness probe, or give up on the peer after
    /// `max_unacked` unanswered ones.
    pub fn keepalive(&mut self, env: &mut Env<'_>) {
        if !matches!(
            self.state,
            ConnectionState::Registering | ConnectionState::Ready
        ) {
            return;
        }
        if self.unacked >= self.settings.max_unacked {
            self.handle_failure(DisconnectReason::PingTimeout(self.unacked), env);
            return;
        }
        self.unacked += 1;
        let token = format!("slircbot-{}", chrono::Utc::now().timestamp());
        self.send(&Frame::ping(&token).to_string(), true);
    }

    fn schedule_retry(&mut self, env: &mut Env<'_>) {
        if self.attempts >= self.settings.max_attempts {
            error!(
                connection = %self.name,
                attempts = self.attempts,
                "giving up after repeated connection failures"
            );
            self.destroyed = true;
            return;
        }
        let name = self.name.clone();
        let id = env.timers.create_labeled(
            format!("reconnect:{name}"),
            self.retry_delay,
            TimerKind::Timeout,
            move |timers, core: &mut Core| {
                core.with_connection(&name, timers, |connection, env| {
                    connection.retry_timer = None;
                    connection.connect(env);
                });
                Ok(())
            },
        );
        info!(
            connection = %self.name,
            delay_secs = self.retry_delay.as_secs(),
            "reconnect scheduled"
        );
        self.retry_timer = Some(id);
    }

    /// The session is gone. Reconnect if the reason allows it.
    pub(crate) fn handle_failure(&mut self, reason: DisconnectReason, env: &mut Env<'_>) {
        let was_ready = self.state == ConnectionState::Ready;
        self.end_session(env.timers);

        if self.quitting.is_some() || !reason.is_recoverable() {
            info!(connection = %self.name, reason = %reason, "connection closed");
            self.last_disconnect = Some(match self.quitting {
                Some(_) => DisconnectReason::Quit,
                None => reason,
            });
            self.destroyed = true;
            return;
        }
        warn!(
            connection = %self.name,
            reason = %reason,
            error_code = reason.error_code(),
            "connection lost"
        );
        self.last_disconnect = Some(reason);
        if was_ready {
            self.attempts = 0;
            self.connect(env);
        } else {
            self.schedule_retry(env);
        }
    }

    /// Drop everything tied to the current session.
    fn end_session(&mut self, timers: &mut Timers) {
        if let Some(id) = self.keepalive_timer.take() {
            timers.destroy(id);
        }
        if !self.channels.is_empty() {
            self.rejoin = self.channels.values().cloned().collect();
        }
        self.channels.clear();
        self.pending_names.clear();
        self.inbox.clear();
        self.failure = None;
        self.unacked = 0;
        self.auth.on_disconnect();
        self.socket.disconnect();
        self.state = ConnectionState::Disconnected;
    }

    /// Send QUIT and wait for the server to close the link, up to the
    /// quit grace period.
    pub fn quit(&mut self, reason: Option<&str>) {
        if self.quitting.is_some() || self.destroyed {
            return;
        }
        self.quitting = Some(self.clock.now() + self.settings.quit_grace);
        if self.socket.is_connected() {
            info!(connection = %self.name, "quitting");
            self.send(&Frame::quit(reason).to_string(), false);
        } else {
            self.destroyed = true;
        }
    }

    /// Close at once, without waiting for the server.
    pub(crate) fn force_close(&mut self, reason: DisconnectReason, timers: &mut Timers) {
        if self.socket.is_connected() {
            warn!(
                connection = %self.name,
                reason = %reason,
                error_code = reason.error_code(),
                "closing without waiting for the server"
            );
        }
        self.end_session(timers);
        self.last_disconnect = Some(reason);
        self.destroyed = true;
    }

    /// Cancel every timer this connection owns.
    pub(crate) fn release_timers(&mut self, timers: &mut Timers) {
        for id in [self.keepalive_timer.take(), self.retry_timer.take()]
            .into_iter()
            .flatten()
        {
            timers.destroy(id);
        }
    }

    /// One tick: connect if due, pump the socket, dispatch what arrived.
    ///
    /// A plugin fault stops processing for this tick; lines not yet
    /// dispatched stay queued, in order, for the next one.
    pub fn update(&mut self, env: &mut Env<'_>) -> Result<(), PluginError> {
        if self.destroyed {
            return Ok(());
        }
        if self.start_pending {
            self.connect(env);
        }
        if self.socket.is_connected() {
            let inbound = self.socket.update();
            self.inbox.extend(inbound.lines);
            if let Some(e) = inbound.error {
                self.failure = Some(e);
            }
        }

        while let Some(line) = self.inbox.pop_front() {
            self.on_receive(&line, env)?;
        }
        self.flush_raw(env)?;

        if let Some(e) = self.failure.take() {
            self.handle_failure(e.into(), env);
        }
        if let Some(deadline) = self.quitting {
            if !self.destroyed && self.clock.now() >= deadline {
                self.force_close(DisconnectReason::Quit, env.timers);
            }
        }
        Ok(())
    }
}
