//! # beacon
//!
//! Transmit side: encode a packet, check the radio, send one delimited frame.
//!
//! Backpressure policy: if the module is not ready the send is skipped, not
//! queued and not retried. A fresh beacon next interval is worth more than a
//! stale one delivered late.

use tdoa_types::packet::{MSG_MARKER, SEQ_MARKER, TIME_MARKER};
use tdoa_types::{MicrosClock, PacketEncoder, FRAME_DELIMITER};
use tracing::{debug, warn};

use crate::error::BeaconError;
use crate::status::StatusSink;
use crate::transport::RadioTransport;

pub const DEFAULT_BEACON_PAYLOAD: &str = "BEACON";
/// Longest payload accepted (also the console input bound).
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { sequence: u32, identity: String },
    /// Encoded and handed to the radio, which refused it.
    Failed { sequence: u32 },
    /// Radio busy; nothing encoded, sequence not consumed.
    SkippedNotReady,
}

pub struct BeaconTransmitter {
    encoder: PacketEncoder,
    next_sequence: u32,
    beacon_payload: String,
    max_payload_len: usize,
}

impl BeaconTransmitter {
    pub fn new(beacon_payload: &str, max_payload_len: usize) -> Result<Self, BeaconError> {
        validate_payload(beacon_payload, max_payload_len)?;
        Ok(Self {
            encoder: PacketEncoder::new(),
            next_sequence: 0,
            beacon_payload: beacon_payload.to_string(),
            max_payload_len,
        })
    }

    /// Periodic beacon with the configured payload.
    pub fn send_beacon(
        &mut self,
        radio: &mut dyn RadioTransport,
        clock: &dyn MicrosClock,
        sink: &mut dyn StatusSink,
    ) -> SendOutcome {
        let payload = self.beacon_payload.clone();
        self.transmit(&payload, radio, clock, sink)
    }

    /// Send an arbitrary payload (e.g. a console line).
    pub fn send(
        &mut self,
        payload: &str,
        radio: &mut dyn RadioTransport,
        clock: &dyn MicrosClock,
        sink: &mut dyn StatusSink,
    ) -> Result<SendOutcome, BeaconError> {
        validate_payload(payload, self.max_payload_len)?;
        Ok(self.transmit(payload, radio, clock, sink))
    }

    fn transmit(
        &mut self,
        payload: &str,
        radio: &mut dyn RadioTransport,
        clock: &dyn MicrosClock,
        sink: &mut dyn StatusSink,
    ) -> SendOutcome {
        if !radio.is_ready() {
            debug!("TX> module not ready, skipping SEQ:{}", self.next_sequence);
            sink.error("radio not ready, send skipped");
            return SendOutcome::SkippedNotReady;
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let packet = self.encoder.encode_packet(payload, sequence, clock);
        let mut frame = packet.to_wire().into_bytes();
        frame.push(FRAME_DELIMITER);

        let started = clock.now_us();
        let outcome = match radio.send(&frame) {
            Ok(()) => {
                debug!(
                    "TX> [{}µs] EUID:{} ({}µs)",
                    started,
                    packet.identity,
                    clock.now_us().saturating_sub(started)
                );
                SendOutcome::Sent { sequence, identity: packet.identity }
            }
            Err(e) => {
                warn!("TX> SEQ:{sequence} failed: {e}");
                SendOutcome::Failed { sequence }
            }
        };
        sink.packet_sent(sequence, payload, matches!(outcome, SendOutcome::Sent { .. }));
        outcome
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }
}

/// Reject payloads a receiver could not decode back.
fn validate_payload(payload: &str, max_len: usize) -> Result<(), BeaconError> {
    if payload.len() > max_len {
        return Err(BeaconError::PayloadTooLong { len: payload.len(), max: max_len });
    }
    if payload.contains(['\n', '\r']) {
        return Err(BeaconError::ContainsDelimiter);
    }
    for marker in [MSG_MARKER, TIME_MARKER, SEQ_MARKER] {
        if payload.contains(marker) {
            return Err(BeaconError::ContainsMarker(marker));
        }
    }
    Ok(())
}

/// Cut a console line down to `max_bytes`, on a char boundary.
pub fn bound_console_input(line: &str, max_bytes: usize) -> &str {
    if line.len() <= max_bytes {
        return line;
    }
    let mut end = max_bytes;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{RecordingSink, StatusEvent};
    use crate::transport::LoopbackRadio;
    use tdoa_types::{decode, Frame, ManualClock};

    fn transmitter() -> BeaconTransmitter {
        BeaconTransmitter::new(DEFAULT_BEACON_PAYLOAD, DEFAULT_MAX_PAYLOAD_LEN).unwrap()
    }

    #[test]
    fn test_beacon_frame_is_delimited_and_decodable() {
        let mut radio = LoopbackRadio::new();
        let clock = ManualClock::new(777);
        let mut sink = RecordingSink::new();
        let mut tx = transmitter();

        let outcome = tx.send_beacon(&mut radio, &clock, &mut sink);
        assert!(matches!(outcome, SendOutcome::Sent { sequence: 0, .. }));

        let frame = &radio.sent()[0];
        assert_eq!(frame.last(), Some(&b'\n'));
        let line = std::str::from_utf8(&frame[..frame.len() - 1]).unwrap();
        match decode(line) {
            Frame::Valid(p) => {
                assert_eq!(p.payload, "BEACON");
                assert_eq!(p.tx_timestamp_us, 777);
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(
            sink.events,
            vec![StatusEvent::Sent { sequence: 0, payload: "BEACON".into(), success: true }]
        );
    }

    #[test]
    fn test_sequence_advances_per_send() {
        let mut radio = LoopbackRadio::new();
        let clock = ManualClock::new(0);
        let mut sink = RecordingSink::new();
        let mut tx = transmitter();

        tx.send_beacon(&mut radio, &clock, &mut sink);
        tx.send("hello", &mut radio, &clock, &mut sink).unwrap();
        assert_eq!(tx.next_sequence(), 2);
        assert_eq!(radio.sent().len(), 2);
    }

    #[test]
    fn test_not_ready_skips_without_consuming_sequence() {
        let mut radio = LoopbackRadio::new();
        radio.set_busy(true);
        let clock = ManualClock::new(0);
        let mut sink = RecordingSink::new();
        let mut tx = transmitter();

        assert_eq!(tx.send_beacon(&mut radio, &clock, &mut sink), SendOutcome::SkippedNotReady);
        assert_eq!(tx.next_sequence(), 0);
        assert!(radio.sent().is_empty());
        assert!(matches!(sink.events[0], StatusEvent::Error { .. }));
    }

    #[test]
    fn test_failed_send_is_reported() {
        let mut radio = LoopbackRadio::new();
        radio.set_reject_sends(true);
        let clock = ManualClock::new(0);
        let mut sink = RecordingSink::new();
        let mut tx = transmitter();

        assert_eq!(tx.send_beacon(&mut radio, &clock, &mut sink), SendOutcome::Failed { sequence: 0 });
        assert_eq!(
            sink.events,
            vec![StatusEvent::Sent { sequence: 0, payload: "BEACON".into(), success: false }]
        );
    }

    #[test]
    fn test_undecodable_payloads_are_rejected() {
        let mut radio = LoopbackRadio::new();
        let clock = ManualClock::new(0);
        let mut sink = RecordingSink::new();
        let mut tx = transmitter();

        assert_eq!(
            tx.send("a\nb", &mut radio, &clock, &mut sink),
            Err(BeaconError::ContainsDelimiter)
        );
        assert_eq!(
            tx.send("x,SEQ:1", &mut radio, &clock, &mut sink),
            Err(BeaconError::ContainsMarker(SEQ_MARKER))
        );
        let long = "z".repeat(DEFAULT_MAX_PAYLOAD_LEN + 1);
        assert!(matches!(
            tx.send(&long, &mut radio, &clock, &mut sink),
            Err(BeaconError::PayloadTooLong { .. })
        ));
        assert!(radio.sent().is_empty());
        assert_eq!(tx.next_sequence(), 0);
    }

    #[test]
    fn test_console_input_bound() {
        assert_eq!(bound_console_input("hello", 200), "hello");
        assert_eq!(bound_console_input("hello", 3), "hel");
        // 'é' is two bytes; never split it.
        assert_eq!(bound_console_input("aé", 2), "a");
    }
}
