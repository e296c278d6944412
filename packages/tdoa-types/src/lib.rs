//! # tdoa-types
//!
//! Shared packet and measurement types for the LoRa TDOA positioning system.
//!
//! These types are used by:
//! - `tdoa-engine`: ingestion, correlation and solving on an anchor or hub
//! - `anchor-node`: beacon transmitter, anchor receiver and hub relay
//! - `tdoa-simulator`: synthetic arrivals for accuracy runs
//!
//! ## Units
//!
//! - Coordinates: planar meters, as established by anchor registration
//! - Time: microseconds. `tx_timestamp_us` is the sender's clock (display only);
//!   arrival timestamps are the receiving anchor's clock and are the only times
//!   the solver looks at. Anchors relaying to a hub stamp with `SystemClock`
//!   and must share a disciplined time base.

pub mod clock;
pub mod packet;

use serde::{Deserialize, Serialize};

pub use clock::{ManualClock, MicrosClock, MonotonicClock, SystemClock};
pub use packet::{decode, Frame, IdentityGenerator, InvalidFrame, Packet, PacketEncoder, FRAME_DELIMITER};

// ── Physical constants ────────────────────────────────────────────────────────

/// Radio propagation speed in meters per microsecond (speed of light).
pub const SPEED_OF_LIGHT_M_PER_US: f64 = 299.792_458;

/// Convert an arrival-time difference to a range difference.
pub fn range_difference_m(delta_us: f64) -> f64 {
    delta_us * SPEED_OF_LIGHT_M_PER_US
}

// ── Anchors ───────────────────────────────────────────────────────────────────

/// A fixed receiver with known planar coordinates (meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: u8,
    pub x: f64,
    pub y: f64,
}

// ── Receive statistics ────────────────────────────────────────────────────────

/// Per-packet receive statistics shown on the console.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RxStats {
    pub rx_timestamp_us: u64,
    /// `rx - tx` across two unsynchronised clocks. Display only.
    pub latency_us: i64,
    /// Placeholder until the radio exposes link quality
    pub rssi_dbm: i16,
    /// Placeholder until the radio exposes link quality
    pub snr_db: i8,
}

impl RxStats {
    pub const RSSI_UNKNOWN_DBM: i16 = -100;

    pub fn for_packet(packet: &Packet, rx_timestamp_us: u64) -> Self {
        Self {
            rx_timestamp_us,
            latency_us: rx_timestamp_us as i64 - packet.tx_timestamp_us as i64,
            rssi_dbm: Self::RSSI_UNKNOWN_DBM,
            snr_db: 0,
        }
    }
}

// ── Position estimate ─────────────────────────────────────────────────────────

/// Solver output.
///
/// `valid == false` means "no fix" (too few anchors, degenerate geometry or no
/// convergence); `x`/`y` are then meaningless and must not be read as the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub x: f64,
    pub y: f64,
    pub valid: bool,
    /// Anchors that contributed to the fix
    pub anchors_used: usize,
    /// RMS of the hyperbolic residuals at the solution (meters)
    pub rms_residual_m: f64,
}

impl PositionEstimate {
    pub fn invalid() -> Self {
        Self { x: 0.0, y: 0.0, valid: false, anchors_used: 0, rms_residual_m: 0.0 }
    }

    pub fn fix(x: f64, y: f64, anchors_used: usize, rms_residual_m: f64) -> Self {
        Self { x, y, valid: true, anchors_used, rms_residual_m }
    }

    /// `Some((x, y))` only for a valid fix.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.valid.then_some((self.x, self.y))
    }
}

// ── Hub relay envelope ────────────────────────────────────────────────────────

/// One anchor's arrival for one packet, forwarded to a hub as a JSON datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalReport {
    pub anchor_id: u8,
    pub identity: String,
    pub sequence: u32,
    /// Arrival time on the reporting anchor's clock (microseconds)
    pub rx_timestamp_us: f64,
}

impl ArrivalReport {
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}
