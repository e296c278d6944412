//! LoRa TDOA positioning engine.
//!
//! Every anchor timestamps the same broadcast packet on arrival. Packets are
//! correlated by their identity string, and once three or more anchors have
//! reported one, the time differences of arrival are solved for the
//! emitter's planar position.
//!
//! ```text
//!   radio bytes ──► ingest (frame + stamp + decode) ──► store (per identity)
//!                                                           │ ≥3 anchors
//!   registry (anchor coords) ─────────────────────────► solver ──► status
//! ```
//!
//! The engine is single-threaded and performs no blocking I/O of its own;
//! the caller drives it from one loop.

pub mod beacon;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod solver;
pub mod status;
pub mod store;
pub mod transport;

pub use beacon::{BeaconTransmitter, SendOutcome};
pub use engine::{EngineConfig, EngineCounters, PositioningEngine};
pub use error::{BeaconError, RegistryError, SolveError, TransportError};
pub use ingest::{IngestEvent, IngestPipeline, LineFramer};
pub use registry::AnchorRegistry;
pub use solver::{solve, try_solve, MIN_ANCHORS};
pub use status::{RecordingSink, StatusEvent, StatusSink, TracingConsole};
pub use store::{Arrival, ArrivalOutcome, MeasurementRecord, MeasurementStore};
pub use transport::{wait_until_ready, LoopbackRadio, RadioTransport, UdpRadio};
