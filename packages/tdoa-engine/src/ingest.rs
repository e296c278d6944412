//! # ingest
//!
//! Byte-stream ingestion: reassemble newline-delimited frames from the radio,
//! timestamp them, decode them.
//!
//! The clock is read immediately before every byte is taken from the radio,
//! ahead of any other work, because timestamp jitter turns directly into
//! position error. The timestamp of the delimiter byte becomes the frame's
//! arrival time.
//!
//! `poll` drains whatever is available right now and returns; it never waits
//! for more bytes, so beacon sends and heartbeats on the same loop are not
//! starved.

use tdoa_types::{decode, Frame, InvalidFrame, MicrosClock, Packet, RxStats};
use tracing::{debug, warn};

use crate::transport::RadioTransport;

/// Longest undelimited frame kept before the buffer is discarded.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete line, delimiter stripped.
    Line(String),
    /// The pending line grew past the limit and was thrown away.
    Overflow { discarded: usize },
}

/// Splits a byte stream on `\n` / `\r`, bounded to `max_len` bytes per line.
#[derive(Debug, Clone)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_len: usize,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self { buf: Vec::with_capacity(max_len + 1), max_len }
    }

    pub fn push(&mut self, byte: u8) -> Option<FramerEvent> {
        if byte == b'\n' || byte == b'\r' {
            if self.buf.is_empty() {
                return None;
            }
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            return Some(FramerEvent::Line(line));
        }

        self.buf.push(byte);
        if self.buf.len() > self.max_len {
            let discarded = self.buf.len();
            self.buf.clear();
            return Some(FramerEvent::Overflow { discarded });
        }
        None
    }

    /// Bytes of the line currently being assembled.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

/// One thing that came out of the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Packet { packet: Packet, stats: RxStats },
    /// Line that is not a packet; kept for diagnostics, never a measurement.
    Raw { raw: String, reason: InvalidFrame, rx_timestamp_us: u64 },
    Overflow { discarded: usize },
}

#[derive(Debug, Clone)]
pub struct IngestPipeline {
    framer: LineFramer,
}

impl IngestPipeline {
    pub fn new(max_message_len: usize) -> Self {
        Self { framer: LineFramer::new(max_message_len) }
    }

    /// Drain every byte the radio has right now.
    pub fn poll(&mut self, radio: &mut dyn RadioTransport, clock: &dyn MicrosClock) -> Vec<IngestEvent> {
        let mut events = Vec::new();
        while radio.is_data_available() {
            let rx_us = clock.now_us();
            let Some(byte) = radio.read_byte() else {
                break;
            };
            if let Some(event) = self.framer.push(byte) {
                events.push(Self::classify(event, rx_us));
            }
        }
        events
    }

    fn classify(event: FramerEvent, rx_us: u64) -> IngestEvent {
        match event {
            FramerEvent::Line(line) => match decode(&line) {
                Frame::Valid(packet) => {
                    let stats = RxStats::for_packet(&packet, rx_us);
                    IngestEvent::Packet { packet, stats }
                }
                Frame::Invalid { raw, reason } => {
                    debug!("[{rx_us}µs] RAW< {raw} ({reason})");
                    IngestEvent::Raw { raw, reason, rx_timestamp_us: rx_us }
                }
            },
            FramerEvent::Overflow { discarded } => {
                warn!("RX buffer overflow, discarded {discarded} bytes");
                IngestEvent::Overflow { discarded }
            }
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.framer.pending()
    }
}

impl Default for IngestPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LEN)
    }
}
