//! Receive-side line framing.
//!
//! Bytes arrive in arbitrary chunks from a non-blocking read. [`LineBuffer`]
//! accumulates them, hands out complete `\n`-terminated lines (with any
//! `\r` removed) and keeps the trailing partial line for the next read.

use bytes::BytesMut;

/// Conventional maximum wire line length, terminator included.
pub const DEFAULT_MAX_LINE: usize = 512;

/// Accumulator that splits a byte stream into text lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Index of the next byte to scan for a terminator.
    next_index: usize,
    max_len: usize,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
    dropped: u64,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE)
    }
}

impl LineBuffer {
    /// Create a buffer that discards lines longer than `max_len` bytes.
    ///
    /// Servers routinely exceed 512 bytes with tags, so the receive limit
    /// is normally set well above the send limit.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(64 * 1024)),
            next_index: 0,
            max_len,
            discarding: false,
            dropped: 0,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non-empty line, decoded lossily as UTF-8.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(offset) = self.buf[self.next_index..].iter().position(|b| *b == b'\n') else {
                self.next_index = self.buf.len();
                if self.buf.len() > self.max_len {
                    // Oversized partial line: drop what we have, skip to the next terminator.
                    if !self.discarding {
                        self.dropped += 1;
                    }
                    self.discarding = true;
                    self.buf.clear();
                    self.next_index = 0;
                }
                return None;
            };

            let line = self.buf.split_to(self.next_index + offset + 1);
            self.next_index = 0;

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if line.len() > self.max_len {
                self.dropped += 1;
                continue;
            }

            let mut bytes = &line[..line.len() - 1];
            if let Some(stripped) = bytes.strip_suffix(b"\r") {
                bytes = stripped;
            }
            if bytes.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(bytes).into_owned());
        }
    }

    /// Bytes held for an incomplete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of oversized lines discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget everything, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.next_index = 0;
        self.discarding = false;
    }
}
