//! # Line framer for the command channel.
//!
//! [`LineFramer`] turns the raw byte stream read from the TCP socket into
//! discrete newline-terminated frames.
//!
//! ## Rules
//! - Partial frames are buffered across reads until the terminating `\n` arrives.
//! - A trailing `\r` is stripped, blank lines are skipped.
//! - A frame longer than `max_len` is **discarded** up to its terminating newline;
//!   the framer reports it once and resumes at the next frame boundary.
//! - The framer never inspects frame contents: JSON errors are handled one layer
//!   up, so a malformed frame can never shift later frame boundaries.
//!
//! ```text
//!  read #1: {"id":1,"res   read #2: ult":2}\n{"id":2,...}\n
//!           └──── buffered ────────────┘ ▲ frame #1      ▲ frame #2
//! ```

use bytes::{Buf, Bytes, BytesMut};

/// Output of one [`LineFramer::next_frame`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete frame without its line terminator.
    Line(Bytes),
    /// An oversized frame was dropped; carries the number of bytes discarded.
    Discarded(usize),
}

/// Incremental newline framer with a frame-length guard.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_len: usize,
    /// Bytes of an oversized frame dropped so far (`Some` while discarding).
    discarding: Option<usize>,
}

impl LineFramer {
    /// Creates a framer that rejects frames longer than `max_len` bytes (min 1).
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_len: max_len.max(1),
            discarding: None,
        }
    }

    /// Mutable access to the receive buffer, for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Appends raw bytes received from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet framed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let newline = self.buf.iter().position(|b| *b == b'\n');

            if let Some(dropped) = self.discarding {
                match newline {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                        self.discarding = None;
                        return Some(Frame::Discarded(dropped + pos));
                    }
                    None => {
                        self.discarding = Some(dropped + self.buf.len());
                        self.buf.clear();
                        return None;
                    }
                }
            }

            match newline {
                Some(pos) if pos > self.max_len => {
                    self.buf.advance(pos + 1);
                    return Some(Frame::Discarded(pos));
                }
                Some(pos) => {
                    let mut line = self.buf.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    if line.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                    return Some(Frame::Line(line.freeze()));
                }
                None if self.buf.len() > self.max_len => {
                    self.discarding = Some(self.buf.len());
                    self.buf.clear();
                    return None;
                }
                None => return None,
            }
        }
    }
}
