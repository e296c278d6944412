//! Error types for the positioning engine.
//!
//! None of these are fatal to a running node: callers log them and keep
//! accepting traffic.

use thiserror::Error;

/// Anchor registration failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// The registry already holds `capacity` anchors.
    #[error("anchor registry full ({capacity} anchors)")]
    CapacityExceeded { capacity: usize },

    /// An anchor with this id is already registered; the first one stays.
    #[error("anchor #{0} is already registered")]
    DuplicateId(u8),

    #[error("anchor #{id} has non-finite coordinates ({x}, {y})")]
    InvalidCoordinates { id: u8, x: f64, y: f64 },
}

/// Reasons the solver produced no fix.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SolveError {
    #[error("no measurement record for this identity")]
    UnknownIdentity,

    /// Fewer than three arrivals, or fewer than three that resolve to a registered anchor.
    #[error("insufficient anchors: {available} usable, need 3")]
    InsufficientAnchors { available: usize },

    /// Collinear or coincident anchors, or non-finite intermediate values.
    #[error("degenerate anchor geometry")]
    Degenerate,

    /// The time differences are inconsistent with any point in the plane.
    #[error("no position satisfies the measured time differences")]
    NoSolution,

    #[error("solver did not converge")]
    NotConverged,
}

/// Radio transport failures.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("radio not ready after {waited_ms} ms")]
    NotReady { waited_ms: u64 },

    #[error("radio I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("radio rejected the frame")]
    Rejected,
}

/// Payloads the beacon refuses to encode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BeaconError {
    #[error("payload is {len} bytes, limit is {max}")]
    PayloadTooLong { len: usize, max: usize },

    #[error("payload contains a line delimiter")]
    ContainsDelimiter,

    #[error("payload contains the wire marker {0:?}")]
    ContainsMarker(&'static str),
}
