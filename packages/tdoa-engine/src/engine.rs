//! # engine
//!
//! Ties the anchor registry, measurement store, ingest pipeline and solver
//! together. Owns all positioning state; a node holds exactly one of these.

use serde::{Deserialize, Serialize};
use tdoa_types::{ArrivalReport, MicrosClock, PositionEstimate};
use tracing::{debug, info};

use crate::error::{RegistryError, SolveError};
use crate::ingest::{IngestEvent, IngestPipeline, DEFAULT_MAX_MESSAGE_LEN};
use crate::registry::{AnchorRegistry, DEFAULT_ANCHOR_CAPACITY};
use crate::solver::{self, MIN_ANCHORS};
use crate::status::StatusSink;
use crate::store::{ArrivalOutcome, MeasurementStore, DEFAULT_MEASUREMENT_CAPACITY};
use crate::transport::RadioTransport;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub anchor_capacity: usize,
    pub measurement_capacity: usize,
    pub max_message_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anchor_capacity: DEFAULT_ANCHOR_CAPACITY,
            measurement_capacity: DEFAULT_MEASUREMENT_CAPACITY,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

/// Running totals, logged with the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    /// Complete lines off the radio, valid or not
    pub frames: u64,
    pub packets: u64,
    pub raw_frames: u64,
    pub overflows: u64,
    pub arrivals_accepted: u64,
    pub duplicates: u64,
    /// Dropped because the record already held every anchor slot
    pub arrivals_ignored: u64,
    pub evictions: u64,
    /// Evicted with fewer than three arrivals
    pub lost_records: u64,
    pub fixes: u64,
    pub failed_solves: u64,
}

pub struct PositioningEngine {
    registry: AnchorRegistry,
    store: MeasurementStore,
    pipeline: IngestPipeline,
    counters: EngineCounters,
}

impl PositioningEngine {
    pub fn new(config: &EngineConfig) -> Self {
        info!(
            "🛰️ TDOA engine: {} anchor slots, {} measurement slots",
            config.anchor_capacity, config.measurement_capacity
        );
        Self {
            registry: AnchorRegistry::with_capacity(config.anchor_capacity),
            store: MeasurementStore::with_capacity(config.measurement_capacity, config.anchor_capacity),
            pipeline: IngestPipeline::new(config.max_message_len),
            counters: EngineCounters::default(),
        }
    }

    pub fn register_anchor(&mut self, id: u8, x: f64, y: f64) -> Result<(), RegistryError> {
        self.registry.register(id, x, y)
    }

    /// Store one arrival. Once the record has three or more anchors it is
    /// solved straight away; a fix is returned and reported to `sink`.
    pub fn record_arrival(
        &mut self,
        identity: &str,
        anchor_id: u8,
        rx_timestamp_us: f64,
        sink: &mut dyn StatusSink,
    ) -> Option<PositionEstimate> {
        self.store_arrival(identity, anchor_id, rx_timestamp_us, sink).1
    }

    fn store_arrival(
        &mut self,
        identity: &str,
        anchor_id: u8,
        rx_timestamp_us: f64,
        sink: &mut dyn StatusSink,
    ) -> (ArrivalOutcome, Option<PositionEstimate>) {
        let update = self.store.record_arrival(identity, anchor_id, rx_timestamp_us);
        if let Some(evicted) = &update.evicted {
            self.counters.evictions += 1;
            if evicted.was_unsolvable() {
                self.counters.lost_records += 1;
            }
        }

        let arrivals = match update.outcome {
            ArrivalOutcome::Accepted { arrivals } => {
                self.counters.arrivals_accepted += 1;
                arrivals
            }
            ArrivalOutcome::Duplicate => {
                self.counters.duplicates += 1;
                return (update.outcome, None);
            }
            ArrivalOutcome::RecordFull => {
                self.counters.arrivals_ignored += 1;
                debug!("TDOA: EUID:{identity} already full, anchor #{anchor_id} ignored");
                return (update.outcome, None);
            }
        };
        if arrivals < MIN_ANCHORS {
            return (update.outcome, None);
        }

        let fix = match self.try_position(identity) {
            Ok(estimate) => {
                self.counters.fixes += 1;
                sink.position(identity, &estimate);
                Some(estimate)
            }
            Err(e) => {
                self.counters.failed_solves += 1;
                debug!("TDOA: EUID:{identity} with {arrivals} anchors, no fix: {e}");
                None
            }
        };
        (update.outcome, fix)
    }

    /// Apply an arrival relayed by another anchor.
    pub fn apply_report(&mut self, report: &ArrivalReport, sink: &mut dyn StatusSink) -> Option<PositionEstimate> {
        self.record_arrival(&report.identity, report.anchor_id, report.rx_timestamp_us, sink)
    }

    /// Current estimate for `identity`; `valid == false` when none is possible.
    pub fn position(&self, identity: &str) -> PositionEstimate {
        match self.store.get(identity) {
            Some(record) => solver::solve(record, &self.registry),
            None => PositionEstimate::invalid(),
        }
    }

    pub fn try_position(&self, identity: &str) -> Result<PositionEstimate, SolveError> {
        let record = self.store.get(identity).ok_or(SolveError::UnknownIdentity)?;
        solver::try_solve(record.arrivals(), &self.registry)
    }

    /// Drain the radio as `anchor_id`, recording every valid packet locally.
    ///
    /// Returns one report per accepted arrival for relaying to a hub.
    /// Retransmissions this anchor already stamped are not reported again.
    pub fn poll_radio(
        &mut self,
        anchor_id: u8,
        radio: &mut dyn RadioTransport,
        clock: &dyn MicrosClock,
        sink: &mut dyn StatusSink,
    ) -> Vec<ArrivalReport> {
        let mut reports = Vec::new();
        for event in self.pipeline.poll(radio, clock) {
            match event {
                IngestEvent::Packet { packet, stats } => {
                    self.counters.frames += 1;
                    self.counters.packets += 1;
                    sink.packet_received(&packet, &stats);
                    let rx_us = stats.rx_timestamp_us as f64;
                    let (outcome, _) = self.store_arrival(&packet.identity, anchor_id, rx_us, sink);
                    if !matches!(outcome, ArrivalOutcome::Accepted { .. }) {
                        continue;
                    }
                    reports.push(ArrivalReport {
                        anchor_id,
                        identity: packet.identity,
                        sequence: packet.sequence,
                        rx_timestamp_us: rx_us,
                    });
                }
                IngestEvent::Raw { raw, reason, .. } => {
                    self.counters.frames += 1;
                    self.counters.raw_frames += 1;
                    sink.raw_frame(&raw, &reason);
                }
                IngestEvent::Overflow { discarded } => {
                    self.counters.overflows += 1;
                    sink.error(&format!("RX buffer overflow, {discarded} bytes discarded"));
                }
            }
        }
        reports
    }

    pub fn registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    pub fn pending_bytes(&self) -> usize {
        self.pipeline.pending_bytes()
    }
}

impl Default for PositioningEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{RecordingSink, StatusEvent};
    use crate::transport::LoopbackRadio;
    use tdoa_types::{ManualClock, SPEED_OF_LIGHT_M_PER_US};

    fn triangle() -> PositioningEngine {
        let mut engine = PositioningEngine::default();
        engine.register_anchor(0, 0.0, 0.0).unwrap();
        engine.register_anchor(1, 100.0, 0.0).unwrap();
        engine.register_anchor(2, 0.0, 100.0).unwrap();
        engine
    }

    fn tof_us(from: (f64, f64), to: (f64, f64)) -> f64 {
        ((from.0 - to.0).powi(2) + (from.1 - to.1).powi(2)).sqrt() / SPEED_OF_LIGHT_M_PER_US
    }

    #[test]
    fn test_third_arrival_triggers_a_fix() {
        let mut engine = triangle();
        let mut sink = RecordingSink::new();
        let target = (30.0, 40.0);
        let t0 = 5_000.0;

        assert!(engine.record_arrival("1_100", 0, t0 + tof_us(target, (0.0, 0.0)), &mut sink).is_none());
        assert!(engine.record_arrival("1_100", 1, t0 + tof_us(target, (100.0, 0.0)), &mut sink).is_none());
        let fix = engine
            .record_arrival("1_100", 2, t0 + tof_us(target, (0.0, 100.0)), &mut sink)
            .expect("fix after third anchor");

        assert!(fix.valid);
        assert!((fix.x - 30.0).abs() < 1e-3 && (fix.y - 40.0).abs() < 1e-3, "{fix:?}");
        assert_eq!(sink.positions().count(), 1);
        assert_eq!(engine.counters().fixes, 1);
    }

    #[test]
    fn test_duplicate_is_counted_and_does_not_resolve() {
        let mut engine = triangle();
        let mut sink = RecordingSink::new();
        engine.record_arrival("a", 0, 1.0, &mut sink);
        assert!(engine.record_arrival("a", 0, 9.0, &mut sink).is_none());
        assert_eq!(engine.counters().duplicates, 1);
        assert_eq!(engine.store().get("a").unwrap().arrival_from(0), Some(1.0));
    }

    #[test]
    fn test_position_of_unknown_identity_is_invalid() {
        let engine = triangle();
        assert!(!engine.position("nobody").valid);
        assert_eq!(engine.try_position("nobody"), Err(SolveError::UnknownIdentity));
    }

    #[test]
    fn test_position_with_two_arrivals_is_invalid() {
        let mut engine = triangle();
        let mut sink = RecordingSink::new();
        engine.record_arrival("p", 0, 10.0, &mut sink);
        engine.record_arrival("p", 1, 10.1, &mut sink);
        assert!(!engine.position("p").valid);
        assert_eq!(
            engine.try_position("p"),
            Err(SolveError::InsufficientAnchors { available: 2 })
        );
    }

    #[test]
    fn test_eviction_of_partial_record_is_counted_as_lost() {
        let mut engine = PositioningEngine::new(&EngineConfig { measurement_capacity: 2, ..EngineConfig::default() });
        let mut sink = RecordingSink::new();
        engine.record_arrival("a", 0, 1.0, &mut sink);
        engine.record_arrival("b", 0, 2.0, &mut sink);
        engine.record_arrival("c", 0, 3.0, &mut sink);

        let counters = engine.counters();
        assert_eq!(counters.evictions, 1);
        assert_eq!(counters.lost_records, 1);
        assert!(engine.store().get("a").is_none());
    }

    #[test]
    fn test_poll_radio_records_and_reports_packets() {
        let mut engine = triangle();
        let mut radio = LoopbackRadio::new();
        let clock = ManualClock::new(2_000);
        let mut sink = RecordingSink::new();

        radio.inject(b"noise\nEUID:3_17,MSG:BEACON,TIME:17,SEQ:3\n");
        let reports = engine.poll_radio(1, &mut radio, &clock, &mut sink);

        assert_eq!(
            reports,
            vec![ArrivalReport { anchor_id: 1, identity: "3_17".into(), sequence: 3, rx_timestamp_us: 2_000.0 }]
        );
        assert_eq!(engine.store().get("3_17").unwrap().arrival_from(1), Some(2_000.0));
        assert!(matches!(sink.events[0], StatusEvent::Raw { .. }));
        assert!(matches!(sink.events[1], StatusEvent::Received { sequence: 3, .. }));
        assert_eq!(engine.counters().raw_frames, 1);
        assert_eq!(engine.counters().packets, 1);
        assert_eq!(engine.counters().frames, 2);
    }

    #[test]
    fn test_retransmission_is_not_relayed_twice() {
        let mut engine = triangle();
        let mut radio = LoopbackRadio::new();
        let clock = ManualClock::new(2_000);
        let mut sink = RecordingSink::new();

        radio.inject(b"EUID:3_17,MSG:BEACON,TIME:17,SEQ:3\n");
        assert_eq!(engine.poll_radio(1, &mut radio, &clock, &mut sink).len(), 1);

        clock.advance(500);
        radio.inject(b"EUID:3_17,MSG:BEACON,TIME:17,SEQ:3\n");
        assert!(engine.poll_radio(1, &mut radio, &clock, &mut sink).is_empty());
        assert_eq!(engine.counters().duplicates, 1);
        assert_eq!(engine.counters().packets, 2);
    }

    #[test]
    fn test_arrivals_beyond_anchor_capacity_are_counted() {
        let mut engine = PositioningEngine::new(&EngineConfig { anchor_capacity: 3, ..EngineConfig::default() });
        let mut sink = RecordingSink::new();
        for id in 0..4u8 {
            engine.record_arrival("full", id, 10.0 + id as f64, &mut sink);
        }
        let counters = engine.counters();
        assert_eq!(counters.arrivals_accepted, 3);
        assert_eq!(counters.arrivals_ignored, 1);
        assert_eq!(counters.duplicates, 0);
        assert_eq!(engine.store().get("full").unwrap().arrival_count(), 3);
    }

    #[test]
    fn test_relayed_reports_complete_a_record() {
        let mut engine = triangle();
        let mut sink = RecordingSink::new();
        let target = (70.0, 20.0);
        let anchors = [(0u8, (0.0, 0.0)), (1, (100.0, 0.0)), (2, (0.0, 100.0))];

        let mut last = None;
        for (id, pos) in anchors {
            let report = ArrivalReport {
                anchor_id: id,
                identity: "5_5".into(),
                sequence: 0,
                rx_timestamp_us: 100.0 + tof_us(target, pos),
            };
            last = engine.apply_report(&report, &mut sink);
        }
        let fix = last.expect("fix");
        assert!((fix.x - 70.0).abs() < 1e-3 && (fix.y - 20.0).abs() < 1e-3, "{fix:?}");
    }
}
