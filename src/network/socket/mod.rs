//! Transport socket: non-blocking stream I/O with flood control.
//!
//! One [`Socket`] per connection. The owning connection calls
//! [`Socket::update`] once per tick; it flushes pending output, releases at
//! most one queued line if the outgoing rate allows, reads whatever the
//! peer has sent and returns complete lines. Failures never escape as
//! panics or `Err` from `update`: they come back inside [`Inbound`] and the
//! socket is closed.

mod flood;
mod stats;
mod stream;

#[cfg(test)]
pub(crate) use stream::mock;

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, ErrorKind};
use std::time::Duration;

use slircbot_proto::LineBuffer;
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::config::FloodConfig;
use crate::error::TransportError;

pub use flood::RateWindow;
pub use stats::{Counter, Direction, Statistics};
pub use stream::{Dialer, Endpoint, Stream, TcpDialer};

/// Upper bound on bytes read in one `update`, so a chatty peer cannot
/// starve the other connections.
const MAX_READ_PER_UPDATE: usize = 64 * 1024;

/// Flood control and framing limits.
#[derive(Debug, Clone, PartialEq)]
pub struct FloodSettings {
    /// Average outgoing bytes per second above which sends queue.
    pub threshold: f64,
    /// Rolling window width in one-second buckets.
    pub samples: usize,
    /// Incoming lines longer than this are dropped.
    pub recv_max_line_len: usize,
}

impl Default for FloodSettings {
    fn default() -> Self {
        Self::from(&FloodConfig::default())
    }
}

impl From<&FloodConfig> for FloodSettings {
    fn from(config: &FloodConfig) -> Self {
        Self {
            threshold: config.threshold,
            samples: config.samples,
            recv_max_line_len: config.recv_max_line_len,
        }
    }
}

/// What one `update` produced.
#[derive(Debug, Default)]
pub struct Inbound {
    /// Complete lines in arrival order, terminators removed.
    pub lines: Vec<String>,
    /// Set when the socket failed and has been closed.
    pub error: Option<TransportError>,
}

/// Non-blocking line socket.
pub struct Socket {
    endpoint: Option<Endpoint>,
    dialer: Box<dyn Dialer>,
    dial_timeout: Duration,
    stream: Option<Box<dyn Stream>>,
    clock: SharedClock,
    settings: FloodSettings,
    out_rate: RateWindow,
    in_rate: RateWindow,
    /// Complete lines (with CRLF) waiting for flood control.
    queue: VecDeque<String>,
    /// Bytes of an accepted line the stream could not take yet.
    backlog: Vec<u8>,
    lines: LineBuffer,
    incoming: Counter,
    outgoing: Counter,
    /// Write failure seen by `send`, reported on the next `update`.
    failure: Option<TransportError>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.stream.is_some())
            .field("queued", &self.queue.len())
            .field("backlog", &self.backlog.len())
            .finish()
    }
}

impl Socket {
    pub fn new(
        dialer: Box<dyn Dialer>,
        clock: SharedClock,
        settings: FloodSettings,
        dial_timeout: Duration,
    ) -> Self {
        let now = clock.now();
        Self {
            endpoint: None,
            dialer,
            dial_timeout,
            stream: None,
            out_rate: RateWindow::new(now, settings.samples),
            in_rate: RateWindow::new(now, settings.samples),
            lines: LineBuffer::new(settings.recv_max_line_len),
            clock,
            settings,
            queue: VecDeque::new(),
            backlog: Vec::new(),
            incoming: Counter::default(),
            outgoing: Counter::default(),
            failure: None,
        }
    }

    /// Set the endpoint used by the next [`connect`](Self::connect).
    pub fn set_server_info(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Dial synchronously. Any previous stream is closed first.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect();
        let endpoint = self.endpoint.as_ref().ok_or(TransportError::NoServer)?;
        let stream = self.dialer.dial(endpoint, self.dial_timeout)?;
        debug!(%endpoint, "socket connected");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the stream and drop pending output. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush();
            debug!(queued = self.queue.len(), "socket closed");
        }
        self.queue.clear();
        self.backlog.clear();
        self.lines.clear();
        self.failure = None;
        self.out_rate.clear();
        self.in_rate.clear();
    }

    /// Send one line; CRLF is appended. Returns the bytes written or queued,
    /// or 0 when not connected.
    pub fn send(&mut self, line: &str) -> usize {
        if self.stream.is_none() {
            return 0;
        }
        let mut data = String::with_capacity(line.len() + 2);
        data.push_str(line.trim_end_matches(['\r', '\n']));
        data.push_str("\r\n");
        let len = data.len();

        if self.queue.is_empty() && self.backlog.is_empty() && !self.saturated() {
            self.write_line(data.into_bytes());
        } else {
            self.queue.push_back(data);
            trace!(queued = self.queue.len(), "outgoing line queued by flood control");
        }
        len
    }

    /// One tick of I/O. See the module docs.
    pub fn update(&mut self) -> Inbound {
        let mut inbound = Inbound::default();
        if self.stream.is_none() {
            return inbound;
        }

        if let Err(error) = self.flush() {
            return self.fail(inbound, error);
        }
        if self.backlog.is_empty() && !self.saturated() {
            if let Some(line) = self.queue.pop_front() {
                self.write_line(line.into_bytes());
            }
        }
        if let Some(error) = self.failure.take() {
            return self.fail(inbound, error);
        }

        let error = self.read_available();
        while let Some(line) = self.lines.next_line() {
            self.incoming.lines += 1;
            inbound.lines.push(line);
        }
        match error {
            Some(error) => self.fail(inbound, error),
            None => inbound,
        }
    }

    /// Traffic counters and current load.
    pub fn statistics(&self) -> Statistics {
        Statistics {
            incoming: self.incoming,
            outgoing: self.outgoing,
            queued: self.queue.len(),
            dropped: self.lines.dropped(),
            load_in: self.load(Direction::Incoming),
            load_out: self.load(Direction::Outgoing),
        }
    }

    /// Rolling average in bytes per second.
    pub fn load(&self, direction: Direction) -> f64 {
        let now = self.clock.now();
        match direction {
            Direction::Incoming => self.in_rate.load(now),
            Direction::Outgoing => self.out_rate.load(now),
        }
    }

    /// Whether output is still waiting in the queue or backlog.
    pub fn has_pending_output(&self) -> bool {
        !self.queue.is_empty() || !self.backlog.is_empty()
    }

    fn saturated(&self) -> bool {
        self.load(Direction::Outgoing) >= self.settings.threshold
    }

    fn fail(&mut self, mut inbound: Inbound, error: TransportError) -> Inbound {
        debug!(error = %error, code = error.error_code(), "socket failed");
        self.disconnect();
        inbound.error = Some(error);
        inbound
    }

    /// Account a line and push it toward the wire; leftovers go to the backlog.
    fn write_line(&mut self, data: Vec<u8>) {
        self.out_rate.record(self.clock.now(), data.len());
        self.outgoing.add(data.len());

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match write_some(stream.as_mut(), &data) {
            Ok(written) if written < data.len() => self.backlog.extend_from_slice(&data[written..]),
            Ok(_) => {}
            Err(e) => {
                self.failure.get_or_insert(TransportError::Write(e));
            }
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        if !self.backlog.is_empty() {
            let written = write_some(stream.as_mut(), &self.backlog).map_err(TransportError::Write)?;
            self.backlog.drain(..written);
        }
        match stream.flush() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(TransportError::Write(e)),
        }
    }

    fn read_available(&mut self) -> Option<TransportError> {
        let mut buf = [0u8; 4096];
        let mut total = 0;
        while total < MAX_READ_PER_UPDATE {
            let stream = self.stream.as_mut()?;
            match stream.read(&mut buf) {
                Ok(0) => return Some(TransportError::Eof),
                Ok(n) => {
                    total += n;
                    self.lines.extend(&buf[..n]);
                    self.incoming.bytes += n as u64;
                    self.in_rate.record(self.clock.now(), n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Some(TransportError::Read(e)),
            }
        }
        None
    }
}

/// Write as much of `data` as the stream accepts without blocking.
fn write_some(stream: &mut dyn Stream, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
