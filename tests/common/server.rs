//! Scripted IRC server on a loopback port.
//!
//! Accepts one client at a time, records every line it receives and
//! answers just enough of the protocol for the bot to register: 001 after
//! USER, PONG to PING, JOIN echoes, and a hang-up on QUIT. Anything else
//! the test wants said is pushed with [`TestServer::send`].

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

const SERVER_NAME: &str = "test.server";

#[derive(Default)]
struct Shared {
    received: Vec<String>,
    outbox: VecDeque<String>,
    accepted: usize,
    hang_up: bool,
}

/// A running test server. Stops when dropped.
pub struct TestServer {
    port: u16,
    shared: Arc<Mutex<Shared>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();

        let shared = Arc::new(Mutex::new(Shared::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = shared.clone();
            let stop = stop.clone();
            thread::spawn(move || serve(listener, shared, stop))
        };
        Ok(Self {
            port,
            shared,
            stop,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue a line for the connected client.
    pub fn send(&self, line: &str) {
        self.shared.lock().outbox.push_back(line.to_owned());
    }

    /// Every line received so far, across clients.
    pub fn received(&self) -> Vec<String> {
        self.shared.lock().received.clone()
    }

    pub fn has_received(&self, line: &str) -> bool {
        self.shared.lock().received.iter().any(|l| l == line)
    }

    /// Number of clients accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.lock().accepted
    }

    /// Drop the current client without a word.
    pub fn hang_up(&self) {
        self.shared.lock().hang_up = true;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
    nickname: String,
}

fn serve(listener: TcpListener, shared: Arc<Mutex<Shared>>, stop: Arc<AtomicBool>) {
    let mut client: Option<Client> = None;
    while !stop.load(Ordering::Relaxed) {
        if let Ok((stream, _)) = listener.accept() {
            let _ = stream.set_nonblocking(false);
            let _ = stream.set_read_timeout(Some(Duration::from_millis(5)));
            shared.lock().accepted += 1;
            client = Some(Client {
                stream,
                buffer: Vec::new(),
                nickname: "*".into(),
            });
        }

        let keep = match client.as_mut() {
            Some(c) => pump(c, &shared),
            None => true,
        };
        if !keep {
            client = None;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// One round of reading, answering and flushing. `false` drops the client.
fn pump(client: &mut Client, shared: &Mutex<Shared>) -> bool {
    if std::mem::take(&mut shared.lock().hang_up) {
        return false;
    }

    let mut chunk = [0u8; 4096];
    match client.stream.read(&mut chunk) {
        Ok(0) => return false,
        Ok(n) => client.buffer.extend_from_slice(&chunk[..n]),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
        Err(_) => return false,
    }

    let mut keep = true;
    while let Some(end) = client.buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = client.buffer.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        keep &= answer(client, &line, shared);
        shared.lock().received.push(line);
    }

    let outgoing: Vec<String> = shared.lock().outbox.drain(..).collect();
    for line in outgoing {
        if client
            .stream
            .write_all(format!("{line}\r\n").as_bytes())
            .is_err()
        {
            return false;
        }
    }
    keep
}

fn answer(client: &mut Client, line: &str, shared: &Mutex<Shared>) -> bool {
    let mut words = line.splitn(2, ' ');
    let command = words.next().unwrap_or_default();
    let rest = words.next().unwrap_or_default();
    let reply = match command {
        "NICK" => {
            client.nickname = rest.to_owned();
            None
        }
        "USER" => Some(format!(
            ":{SERVER_NAME} 001 {} :Welcome to the test network",
            client.nickname
        )),
        "PING" => Some(format!(":{SERVER_NAME} PONG {SERVER_NAME} {rest}")),
        "JOIN" => {
            let channel = rest.split(' ').next().unwrap_or_default();
            Some(format!(":{}!bot@127.0.0.1 JOIN {channel}", client.nickname))
        }
        "QUIT" => return false,
        _ => None,
    };
    if let Some(reply) = reply {
        shared.lock().outbox.push_back(reply);
    }
    true
}
