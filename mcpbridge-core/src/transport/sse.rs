//! Server-Sent Events framing for upstream response bodies.
//!
//! The parser is byte-oriented and incremental: network chunks are fed in as
//! they arrive, complete lines are classified, and `data: ` payloads are
//! buffered until a blank line ends the event. Frames are only decoded as
//! text after they are complete, so a UTF-8 sequence split across two chunks
//! is reassembled for free.
//!
//! Recognised line shapes (after stripping `\n` / `\r\n`):
//!
//! | Line            | Effect                                   |
//! |-----------------|------------------------------------------|
//! | `data: <text>`  | `<text>` appended to the pending frame   |
//! | `:<anything>`   | comment, logged only                     |
//! | `event: <type>` | event annotation, logged only            |
//! | empty           | pending frame (if any) is emitted        |
//! | anything else   | ignored (`id:`, `retry:`, `data:` with no space, ...) |
//!
//! Multiple `data: ` lines in one event are joined with `\n`. A frame still
//! pending at end of stream is emitted by [`SseParser::finish`].
//!
//! Size limits never abort the stream. A line longer than the limit is
//! discarded without being buffered, and the event it belongs to (or an event
//! whose joined data grows past the limit) is dropped at its closing blank
//! line. Parsing continues with the next event.

use bytes::BytesMut;
use thiserror::Error;
use tracing::{debug, trace, warn};

const DATA_PREFIX: &[u8] = b"data: ";
const EVENT_PREFIX: &[u8] = b"event: ";
const COMMENT_PREFIX: &[u8] = b":";

/// Reason an event was dropped for size.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SseError {
    #[error("SSE line exceeds {max_bytes} bytes")]
    LineTooLong { max_bytes: usize },

    #[error("SSE event data exceeds {max_bytes} bytes")]
    FrameTooLarge { max_bytes: usize },
}

/// One classified SSE line, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a [u8]),
    Comment(&'a [u8]),
    Event(&'a [u8]),
    Blank,
    Other(&'a [u8]),
}

impl<'a> SseLine<'a> {
    /// Classify a line with its terminator already removed.
    #[must_use]
    pub fn classify(line: &'a [u8]) -> Self {
        if line.is_empty() {
            Self::Blank
        } else if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            Self::Data(payload)
        } else if let Some(text) = line.strip_prefix(COMMENT_PREFIX) {
            Self::Comment(text)
        } else if let Some(kind) = line.strip_prefix(EVENT_PREFIX) {
            Self::Event(kind)
        } else {
            Self::Other(line)
        }
    }
}

// ============================================================================
// Line splitting
// ============================================================================

/// Output of [`LineSplitter::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitLine {
    /// A complete line, terminator removed.
    Line(Vec<u8>),
    /// A line over the limit was skipped. Reported once per line.
    Overflow,
}

/// Splits a chunked byte stream into lines.
///
/// Accepts `\n` and `\r\n` terminators. Bytes after the last terminator are
/// held until the next chunk (or [`LineSplitter::finish`]). Only newly
/// appended bytes are searched for a terminator, so a long line fed in many
/// chunks costs linear time.
#[derive(Debug)]
pub struct LineSplitter {
    pending: BytesMut,
    /// Prefix of `pending` already known to contain no `\n`.
    scanned: usize,
    /// Skipping the rest of an oversized line.
    discarding: bool,
    max_line_bytes: usize,
}

impl LineSplitter {
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            scanned: 0,
            discarding: false,
            max_line_bytes,
        }
    }

    /// Append `chunk` and return every line it completed, in order.
    ///
    /// A line whose content exceeds the limit yields a single
    /// [`SplitLine::Overflow`]; its bytes are dropped as they arrive.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<SplitLine> {
        let mut lines = Vec::new();

        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return lines,
            }
        }

        self.pending.extend_from_slice(chunk);
        while let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        {
            let pos = self.scanned + offset;
            let mut line = self.pending.split_to(pos + 1);
            self.scanned = 0;
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if line.len() > self.max_line_bytes {
                lines.push(SplitLine::Overflow);
            } else {
                lines.push(SplitLine::Line(line.to_vec()));
            }
        }
        self.scanned = self.pending.len();

        if self.pending_content_len() > self.max_line_bytes {
            self.pending.clear();
            self.scanned = 0;
            self.discarding = true;
            lines.push(SplitLine::Overflow);
        }
        lines
    }

    /// Return the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || self.pending.is_empty() {
            return None;
        }
        let mut line = self.pending.split().to_vec();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Pending length, not counting a `\r` that may start a `\r\n`.
    fn pending_content_len(&self) -> usize {
        match self.pending.last() {
            Some(b'\r') => self.pending.len() - 1,
            _ => self.pending.len(),
        }
    }
}

// ============================================================================
// Event assembly
// ============================================================================

/// Accumulates `data: ` payloads for the event currently being read.
#[derive(Debug, Default)]
pub struct SseFrameBuffer {
    data_lines: Vec<Vec<u8>>,
    buffered_bytes: usize,
    /// Set when the current event broke a size limit.
    poisoned: Option<SseError>,
    dropped: usize,
}

impl SseFrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_lines.is_empty()
    }

    /// Bytes the joined frame would occupy if flushed now.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Events dropped for size so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Discard the current event; it is reported when it ends.
    pub fn poison(&mut self, reason: SseError) {
        self.data_lines.clear();
        self.buffered_bytes = 0;
        if self.poisoned.is_none() {
            self.poisoned = Some(reason);
        }
    }

    /// Feed one line; returns the completed frame when `line` is blank.
    pub fn push_line(&mut self, line: &[u8]) -> Option<Vec<u8>> {
        match SseLine::classify(line) {
            SseLine::Data(_) if self.poisoned.is_some() => None,
            SseLine::Data(payload) => {
                if !self.data_lines.is_empty() {
                    self.buffered_bytes += 1;
                }
                self.buffered_bytes += payload.len();
                self.data_lines.push(payload.to_vec());
                None
            }
            SseLine::Blank => self.take(),
            SseLine::Comment(text) => {
                debug!(comment = %String::from_utf8_lossy(text), "SSE comment");
                None
            }
            SseLine::Event(kind) => {
                debug!(event = %String::from_utf8_lossy(kind), "SSE event type");
                None
            }
            SseLine::Other(raw) => {
                trace!(line = %String::from_utf8_lossy(raw), "Ignoring SSE field");
                None
            }
        }
    }

    /// Take the pending frame, joined with `\n`, leaving the buffer empty.
    ///
    /// A poisoned event is counted and logged instead.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if let Some(reason) = self.poisoned.take() {
            self.dropped += 1;
            warn!(error = %reason, "Dropping oversized SSE event");
            return None;
        }
        if self.data_lines.is_empty() {
            return None;
        }
        self.buffered_bytes = 0;
        Some(std::mem::take(&mut self.data_lines).join(&b'\n'))
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Incremental SSE parser producing raw event payloads.
///
/// Payloads are returned undecoded; validating them as protocol messages is
/// the caller's job.
#[derive(Debug)]
pub struct SseParser {
    lines: LineSplitter,
    frame: SseFrameBuffer,
    max_frame_bytes: usize,
}

impl SseParser {
    /// `max_bytes` bounds both a single line and a single event's data.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            lines: LineSplitter::new(max_bytes),
            frame: SseFrameBuffer::new(),
            max_frame_bytes: max_bytes,
        }
    }

    /// Feed one network chunk; returns the events it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let lines = self.lines.push(chunk);
        self.absorb(lines)
    }

    /// Signal end of stream; returns the trailing event, if any.
    pub fn finish(&mut self) -> Vec<Vec<u8>> {
        let tail = self.lines.finish().map(SplitLine::Line);
        let mut frames = self.absorb(tail.into_iter().collect());
        frames.extend(self.frame.take());
        frames
    }

    /// Events dropped for exceeding the size limit.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.frame.dropped()
    }

    fn absorb(&mut self, lines: Vec<SplitLine>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for line in lines {
            match line {
                SplitLine::Overflow => self.frame.poison(SseError::LineTooLong {
                    max_bytes: self.max_frame_bytes,
                }),
                SplitLine::Line(line) => {
                    if let Some(frame) = self.frame.push_line(&line) {
                        frames.push(frame);
                    }
                    if self.frame.buffered_bytes() > self.max_frame_bytes {
                        self.frame.poison(SseError::FrameTooLarge {
                            max_bytes: self.max_frame_bytes,
                        });
                    }
                }
            }
        }
        frames
    }
}
