//! Status output (console / display collaborator).
//!
//! Write-only: nothing the engine does depends on what a sink does with these.

use tdoa_types::{InvalidFrame, Packet, PositionEstimate, RxStats};
use tracing::{info, warn};

pub trait StatusSink {
    fn packet_sent(&mut self, sequence: u32, payload: &str, success: bool);
    fn packet_received(&mut self, packet: &Packet, stats: &RxStats);
    fn raw_frame(&mut self, raw: &str, reason: &InvalidFrame);
    fn position(&mut self, identity: &str, estimate: &PositionEstimate);
    fn error(&mut self, message: &str);
}

/// Renders status snapshots as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl StatusSink for TracingConsole {
    fn packet_sent(&mut self, sequence: u32, payload: &str, success: bool) {
        if success {
            info!("TX> SEQ:{sequence} MSG:{payload} [OK]");
        } else {
            warn!("TX> SEQ:{sequence} MSG:{payload} [FAIL]");
        }
    }

    fn packet_received(&mut self, packet: &Packet, stats: &RxStats) {
        info!(
            "[{}µs] EUID:{} | SEQ:{} | MSG:{} | LAT:{}µs | RSSI:{}dBm | SNR:{}dB",
            stats.rx_timestamp_us,
            packet.identity,
            packet.sequence,
            packet.payload,
            stats.latency_us,
            stats.rssi_dbm,
            stats.snr_db
        );
    }

    fn raw_frame(&mut self, raw: &str, reason: &InvalidFrame) {
        info!("RAW< {raw} ({reason})");
    }

    fn position(&mut self, identity: &str, estimate: &PositionEstimate) {
        match estimate.coordinates() {
            Some((x, y)) => info!(
                "📍 EUID:{identity} → ({x:.2}, {y:.2}) m | anchors={} | rms={:.3} m",
                estimate.anchors_used, estimate.rms_residual_m
            ),
            None => info!("EUID:{identity} → no fix"),
        }
    }

    fn error(&mut self, message: &str) {
        warn!("{message}");
    }
}

/// A status snapshot, as captured by `RecordingSink`.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Sent { sequence: u32, payload: String, success: bool },
    Received { identity: String, sequence: u32, latency_us: i64 },
    Raw { raw: String },
    Position { identity: String, estimate: PositionEstimate },
    Error { message: String },
}

/// Keeps every snapshot in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<StatusEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> impl Iterator<Item = (&str, &PositionEstimate)> {
        self.events.iter().filter_map(|e| match e {
            StatusEvent::Position { identity, estimate } => Some((identity.as_str(), estimate)),
            _ => None,
        })
    }
}

impl StatusSink for RecordingSink {
    fn packet_sent(&mut self, sequence: u32, payload: &str, success: bool) {
        self.events.push(StatusEvent::Sent { sequence, payload: payload.to_string(), success });
    }

    fn packet_received(&mut self, packet: &Packet, stats: &RxStats) {
        self.events.push(StatusEvent::Received {
            identity: packet.identity.clone(),
            sequence: packet.sequence,
            latency_us: stats.latency_us,
        });
    }

    fn raw_frame(&mut self, raw: &str, _reason: &InvalidFrame) {
        self.events.push(StatusEvent::Raw { raw: raw.to_string() });
    }

    fn position(&mut self, identity: &str, estimate: &PositionEstimate) {
        self.events.push(StatusEvent::Position { identity: identity.to_string(), estimate: *estimate });
    }

    fn error(&mut self, message: &str) {
        self.events.push(StatusEvent::Error { message: message.to_string() });
    }
}
