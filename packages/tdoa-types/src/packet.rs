//! # packet
//!
//! Line-oriented wire codec for beacon packets.
//!
//! ```text
//! EUID:<identity>,MSG:<payload>,TIME:<tx_us>,SEQ:<sequence>\n
//! ```
//!
//! Parsing is positional, not a key-value split: every marker is searched for
//! after the end of the previous one, and a field value is the substring
//! strictly between two adjacent markers. `SEQ` runs to the end of the frame.
//! The delimiter itself is stripped by the framer before `decode` sees the line.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::MicrosClock;

pub const EUID_MARKER: &str = "EUID:";
pub const MSG_MARKER: &str = ",MSG:";
pub const TIME_MARKER: &str = ",TIME:";
pub const SEQ_MARKER: &str = ",SEQ:";

/// Frame terminator appended by the transmitter.
pub const FRAME_DELIMITER: u8 = b'\n';

// ── Packet ────────────────────────────────────────────────────────────────────

/// One transmitted beacon packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Per-transmission correlation token (`<counter>_<micros>`)
    pub identity: String,
    pub payload: String,
    /// Sender clock at encode time. Display only (latency); never used for solving.
    pub tx_timestamp_us: u64,
    /// Per-sender sequence number (ordering / loss detection)
    pub sequence: u32,
}

impl Packet {
    /// Serialize without the trailing delimiter.
    pub fn to_wire(&self) -> String {
        format!(
            "{EUID_MARKER}{}{MSG_MARKER}{}{TIME_MARKER}{}{SEQ_MARKER}{}",
            self.identity, self.payload, self.tx_timestamp_us, self.sequence
        )
    }
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Why a frame did not parse as a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidFrame {
    #[error("missing {0:?} marker")]
    MissingMarker(&'static str),
    #[error("empty identity")]
    EmptyIdentity,
    #[error("TIME value {0:?} is not an unsigned integer")]
    BadTimestamp(String),
    #[error("SEQ value {0:?} is not an unsigned integer")]
    BadSequence(String),
}

/// Result of decoding one delimited line.
///
/// An invalid frame keeps the raw text so it can be shown as diagnostics; it is
/// never treated as a measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Valid(Packet),
    Invalid { raw: String, reason: InvalidFrame },
}

impl Frame {
    pub fn is_valid(&self) -> bool {
        matches!(self, Frame::Valid(_))
    }

    pub fn packet(&self) -> Option<&Packet> {
        match self {
            Frame::Valid(p) => Some(p),
            Frame::Invalid { .. } => None,
        }
    }
}

/// Decode one frame (without its delimiter).
pub fn decode(raw: &str) -> Frame {
    match parse_fields(raw) {
        Ok(packet) => Frame::Valid(packet),
        Err(reason) => Frame::Invalid { raw: raw.to_string(), reason },
    }
}

fn parse_fields(raw: &str) -> Result<Packet, InvalidFrame> {
    let euid = find_marker(raw, EUID_MARKER, 0)?;
    let msg = find_marker(raw, MSG_MARKER, euid + EUID_MARKER.len())?;
    let time = find_marker(raw, TIME_MARKER, msg + MSG_MARKER.len())?;
    let seq = find_marker(raw, SEQ_MARKER, time + TIME_MARKER.len())?;

    let identity = &raw[euid + EUID_MARKER.len()..msg];
    let payload = &raw[msg + MSG_MARKER.len()..time];
    let time_str = &raw[time + TIME_MARKER.len()..seq];
    let seq_str = &raw[seq + SEQ_MARKER.len()..];

    if identity.is_empty() {
        return Err(InvalidFrame::EmptyIdentity);
    }
    let tx_timestamp_us = parse_unsigned::<u64>(time_str)
        .ok_or_else(|| InvalidFrame::BadTimestamp(time_str.to_string()))?;
    let sequence = parse_unsigned::<u32>(seq_str)
        .ok_or_else(|| InvalidFrame::BadSequence(seq_str.to_string()))?;

    Ok(Packet {
        identity: identity.to_string(),
        payload: payload.to_string(),
        tx_timestamp_us,
        sequence,
    })
}

/// Byte offset of `marker` at or after `from`.
fn find_marker(raw: &str, marker: &'static str, from: usize) -> Result<usize, InvalidFrame> {
    raw.get(from..)
        .and_then(|rest| rest.find(marker))
        .map(|i| from + i)
        .ok_or(InvalidFrame::MissingMarker(marker))
}

/// Digits only: `str::parse` alone would also accept a leading `+`.
fn parse_unsigned<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Issues `<counter>_<micros>` identities. One instance per transmitting node.
#[derive(Debug, Default)]
pub struct IdentityGenerator {
    counter: u32,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_identity(&mut self, clock: &dyn MicrosClock) -> String {
        let identity = format!("{}_{}", self.counter, clock.now_us());
        self.counter = self.counter.wrapping_add(1);
        identity
    }

    /// Number of identities handed out so far (wraps at `u32::MAX`).
    pub fn issued(&self) -> u32 {
        self.counter
    }
}

/// Builds wire packets with a fresh identity and transmit timestamp.
///
/// Payload bounds are the caller's responsibility.
#[derive(Debug, Default)]
pub struct PacketEncoder {
    identities: IdentityGenerator,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode_packet(&mut self, payload: &str, sequence: u32, clock: &dyn MicrosClock) -> Packet {
        let identity = self.identities.next_identity(clock);
        Packet {
            identity,
            payload: payload.to_string(),
            tx_timestamp_us: clock.now_us(),
            sequence,
        }
    }

    /// Encode straight to the wire string (no delimiter).
    pub fn encode(&mut self, payload: &str, sequence: u32, clock: &dyn MicrosClock) -> String {
        self.encode_packet(payload, sequence, clock).to_wire()
    }

    pub fn identities_issued(&self) -> u32 {
        self.identities.issued()
    }
}
