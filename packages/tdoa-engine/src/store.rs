//! # store
//!
//! Bounded table of in-flight measurement records, keyed by packet identity.
//!
//! Each record collects at most one arrival timestamp per anchor. The table has
//! a fixed number of slots; when a new identity arrives and every slot is
//! taken, the least-recently-updated record is replaced. A record evicted
//! before it reached three arrivals can never be solved. That loss is the
//! price of bounded memory under continuous traffic.
//!
//! `last_updated` is a per-store update counter rather than wall time, so the
//! eviction order is exact and reproducible.

use tracing::{debug, warn};

use crate::registry::DEFAULT_ANCHOR_CAPACITY;
use crate::solver::MIN_ANCHORS;

pub const DEFAULT_MEASUREMENT_CAPACITY: usize = 10;

/// One anchor's receipt of one packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrival {
    pub anchor_id: u8,
    /// Arrival time on the anchor clock (microseconds)
    pub rx_timestamp_us: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    identity: String,
    arrivals: Vec<Arrival>,
    last_updated: u64,
}

impl MeasurementRecord {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn arrivals(&self) -> &[Arrival] {
        &self.arrivals
    }

    pub fn arrival_count(&self) -> usize {
        self.arrivals.len()
    }

    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    pub fn arrival_from(&self, anchor_id: u8) -> Option<f64> {
        self.arrivals
            .iter()
            .find(|a| a.anchor_id == anchor_id)
            .map(|a| a.rx_timestamp_us)
    }
}

/// What happened to a single `record_arrival` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Timestamp stored; `arrivals` is the record's new arrival count.
    Accepted { arrivals: usize },
    /// This anchor already reported this identity; first arrival wins.
    Duplicate,
    /// Record already holds the maximum number of anchors.
    RecordFull,
}

/// A record pushed out to make room for a new identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedRecord {
    pub identity: String,
    pub arrivals: usize,
}

impl EvictedRecord {
    /// Evicted before a position could ever be computed.
    pub fn was_unsolvable(&self) -> bool {
        self.arrivals < MIN_ANCHORS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub outcome: ArrivalOutcome,
    /// A new record was opened for this identity.
    pub created: bool,
    pub evicted: Option<EvictedRecord>,
}

/// Fixed-slot measurement table with least-recently-updated eviction.
#[derive(Debug, Clone)]
pub struct MeasurementStore {
    slots: Vec<Option<MeasurementRecord>>,
    max_arrivals: usize,
    update_counter: u64,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEASUREMENT_CAPACITY, DEFAULT_ANCHOR_CAPACITY)
    }

    /// `capacity` slots (at least one), each holding up to `max_arrivals` anchors.
    pub fn with_capacity(capacity: usize, max_arrivals: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            max_arrivals,
            update_counter: 0,
        }
    }

    /// Record that `anchor_id` received the packet `identity` at `rx_timestamp_us`.
    ///
    /// Finds or creates the record (evicting if the table is full). A second
    /// arrival from the same anchor is ignored and does not refresh the record.
    pub fn record_arrival(&mut self, identity: &str, anchor_id: u8, rx_timestamp_us: f64) -> RecordUpdate {
        let (slot, created, evicted) = match self.find_slot(identity) {
            Some(slot) => (slot, false, None),
            None => {
                let slot = self.victim_slot();
                let stamp = self.next_stamp();
                let evicted = self.slots[slot]
                    .replace(MeasurementRecord {
                        identity: identity.to_string(),
                        arrivals: Vec::with_capacity(self.max_arrivals),
                        last_updated: stamp,
                    })
                    .map(|old| EvictedRecord { identity: old.identity, arrivals: old.arrivals.len() });

                if let Some(ev) = &evicted {
                    if ev.was_unsolvable() {
                        warn!(
                            "TDOA: evicted EUID:{} with {} arrival(s), its position is lost",
                            ev.identity, ev.arrivals
                        );
                    } else {
                        debug!("TDOA: evicted EUID:{} ({} arrivals)", ev.identity, ev.arrivals);
                    }
                }
                (slot, true, evicted)
            }
        };

        let stamp = self.next_stamp();
        let max_arrivals = self.max_arrivals;
        let Some(record) = self.slots[slot].as_mut() else {
            unreachable!("slot {slot} was just located or filled");
        };

        let outcome = if record.arrival_from(anchor_id).is_some() {
            debug!("TDOA: duplicate arrival for EUID:{identity} from anchor #{anchor_id} ignored");
            ArrivalOutcome::Duplicate
        } else if record.arrivals.len() >= max_arrivals {
            ArrivalOutcome::RecordFull
        } else {
            record.arrivals.push(Arrival { anchor_id, rx_timestamp_us });
            record.last_updated = stamp;
            debug!(
                "TDOA: recorded RX time for EUID:{identity} ({} anchors)",
                record.arrivals.len()
            );
            ArrivalOutcome::Accepted { arrivals: record.arrivals.len() }
        };

        RecordUpdate { outcome, created, evicted }
    }

    /// Read-only lookup; never evicts or touches `last_updated`.
    pub fn get(&self, identity: &str) -> Option<&MeasurementRecord> {
        self.slots
            .iter()
            .flatten()
            .find(|r| r.identity == identity)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.slots.iter().flatten()
    }

    fn find_slot(&self, identity: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|r| r.identity == identity))
    }

    /// First empty slot, otherwise the smallest `last_updated` (lowest index on ties).
    fn victim_slot(&self) -> usize {
        if let Some(empty) = self.slots.iter().position(Option::is_none) {
            return empty;
        }
        let mut victim = 0;
        let mut oldest = u64::MAX;
        for (i, record) in self.slots.iter().enumerate() {
            if let Some(r) = record {
                if r.last_updated < oldest {
                    oldest = r.last_updated;
                    victim = i;
                }
            }
        }
        victim
    }

    fn next_stamp(&mut self) -> u64 {
        self.update_counter += 1;
        self.update_counter
    }
}

impl Default for MeasurementStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_arrival_creates_record() {
        let mut store = MeasurementStore::new();
        let update = store.record_arrival("0_100", 1, 5_000.0);

        assert!(update.created);
        assert_eq!(update.outcome, ArrivalOutcome::Accepted { arrivals: 1 });
        assert_eq!(update.evicted, None);
        let record = store.get("0_100").unwrap();
        assert_eq!(record.arrival_from(1), Some(5_000.0));
    }

    #[test]
    fn test_arrivals_merge_by_identity() {
        let mut store = MeasurementStore::new();
        store.record_arrival("7_1", 0, 10.0);
        store.record_arrival("8_2", 0, 11.0);
        let update = store.record_arrival("7_1", 1, 10.5);

        assert!(!update.created);
        assert_eq!(update.outcome, ArrivalOutcome::Accepted { arrivals: 2 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("7_1").unwrap().arrival_count(), 2);
    }

    #[test]
    fn test_same_anchor_twice_is_a_no_op() {
        let mut store = MeasurementStore::new();
        store.record_arrival("1_1", 2, 100.0);
        let before = store.get("1_1").unwrap().clone();

        let update = store.record_arrival("1_1", 2, 100.0);
        assert_eq!(update.outcome, ArrivalOutcome::Duplicate);
        assert_eq!(store.get("1_1").unwrap(), &before);

        // A later, different timestamp from the same anchor does not overwrite the first.
        store.record_arrival("1_1", 2, 250.0);
        assert_eq!(store.get("1_1").unwrap().arrival_from(2), Some(100.0));
        assert_eq!(store.get("1_1").unwrap().arrival_count(), 1);
    }

    #[test]
    fn test_eviction_removes_least_recently_updated() {
        let capacity = 4;
        let mut store = MeasurementStore::with_capacity(capacity, 8);
        for i in 0..capacity {
            store.record_arrival(&format!("id{i}"), 0, i as f64);
        }
        let update = store.record_arrival("new", 0, 99.0);

        assert_eq!(update.evicted, Some(EvictedRecord { identity: "id0".into(), arrivals: 1 }));
        assert!(store.get("id0").is_none());
        for i in 1..capacity {
            assert!(store.get(&format!("id{i}")).is_some());
        }
        assert!(store.get("new").is_some());
        assert_eq!(store.len(), capacity);
    }

    #[test]
    fn test_touching_a_record_protects_it_from_eviction() {
        let mut store = MeasurementStore::with_capacity(3, 8);
        store.record_arrival("a", 0, 1.0);
        store.record_arrival("b", 0, 2.0);
        store.record_arrival("c", 0, 3.0);
        // "a" gets a second anchor, so "b" is now the stalest.
        store.record_arrival("a", 1, 1.1);

        let update = store.record_arrival("d", 0, 4.0);
        assert_eq!(update.evicted.map(|e| e.identity), Some("b".to_string()));
        assert!(store.get("a").is_some());
    }

    #[test]
    fn test_duplicate_does_not_refresh_record() {
        let mut store = MeasurementStore::with_capacity(2, 8);
        store.record_arrival("a", 0, 1.0);
        store.record_arrival("b", 0, 2.0);
        // Retransmission of "a" from the same anchor: ignored, not a touch.
        store.record_arrival("a", 0, 1.0);

        let update = store.record_arrival("c", 0, 3.0);
        assert_eq!(update.evicted.map(|e| e.identity), Some("a".to_string()));
    }

    #[test]
    fn test_get_does_not_mutate() {
        let mut store = MeasurementStore::with_capacity(2, 8);
        store.record_arrival("a", 0, 1.0);
        store.record_arrival("b", 0, 2.0);
        let stamp = store.get("a").unwrap().last_updated();
        for _ in 0..5 {
            assert!(store.get("a").is_some());
        }
        assert_eq!(store.get("a").unwrap().last_updated(), stamp);
        let update = store.record_arrival("c", 0, 3.0);
        assert_eq!(update.evicted.map(|e| e.identity), Some("a".to_string()));
    }

    #[test]
    fn test_record_is_capped_at_max_arrivals() {
        let mut store = MeasurementStore::with_capacity(2, 3);
        for anchor in 0..3 {
            store.record_arrival("x", anchor, anchor as f64);
        }
        let update = store.record_arrival("x", 9, 9.0);
        assert_eq!(update.outcome, ArrivalOutcome::RecordFull);
        assert_eq!(store.get("x").unwrap().arrival_count(), 3);
    }

    #[test]
    fn test_unsolvable_eviction_is_flagged() {
        let mut store = MeasurementStore::with_capacity(1, 8);
        store.record_arrival("a", 0, 1.0);
        store.record_arrival("a", 1, 1.0);
        let update = store.record_arrival("b", 0, 2.0);
        assert!(update.evicted.unwrap().was_unsolvable());
    }
}
