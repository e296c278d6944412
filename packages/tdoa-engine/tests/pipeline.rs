//! End to end: one beacon frame heard by four anchors, relayed to a hub, solved.

use tdoa_engine::beacon::{DEFAULT_BEACON_PAYLOAD, DEFAULT_MAX_PAYLOAD_LEN};
use tdoa_engine::{BeaconTransmitter, LoopbackRadio, PositioningEngine, RecordingSink, SendOutcome};
use tdoa_types::{ArrivalReport, ManualClock, SPEED_OF_LIGHT_M_PER_US};

const EMITTER: (f64, f64) = (250.0, -120.0);
const EMIT_US: u64 = 50_000;

/// Anchors placed a whole number of microseconds of flight away from the
/// emitter, so integer receive clocks carry no quantisation error.
fn anchors() -> Vec<(u8, (f64, f64), u64)> {
    [(0u8, 0.0f64, 10u64), (1, 90.0, 12), (2, 200.0, 15), (3, 300.0, 11)]
        .into_iter()
        .map(|(id, deg, flight_us)| {
            let r = flight_us as f64 * SPEED_OF_LIGHT_M_PER_US;
            let (s, c) = deg.to_radians().sin_cos();
            (id, (EMITTER.0 + r * c, EMITTER.1 + r * s), flight_us)
        })
        .collect()
}

fn beacon_frame() -> Vec<u8> {
    let mut radio = LoopbackRadio::new();
    let clock = ManualClock::new(EMIT_US);
    let mut sink = RecordingSink::new();
    let mut tx = BeaconTransmitter::new(DEFAULT_BEACON_PAYLOAD, DEFAULT_MAX_PAYLOAD_LEN).unwrap();
    assert!(matches!(tx.send_beacon(&mut radio, &clock, &mut sink), SendOutcome::Sent { .. }));
    radio.take_sent().remove(0)
}

#[test]
fn test_relayed_arrivals_locate_the_emitter() {
    let frame = beacon_frame();
    let layout = anchors();

    let mut hub = PositioningEngine::default();
    for (id, (x, y), _) in &layout {
        hub.register_anchor(*id, *x, *y).unwrap();
    }
    let mut hub_sink = RecordingSink::new();

    let mut identity = None;
    for (id, _, flight_us) in &layout {
        let mut node = PositioningEngine::default();
        let mut radio = LoopbackRadio::new();
        // Line noise ahead of the frame must not disturb anything.
        radio.inject(b"\r\n~~garbage~~\n");
        radio.inject(&frame);
        let clock = ManualClock::new(EMIT_US + flight_us);
        let mut sink = RecordingSink::new();

        let reports = node.poll_radio(*id, &mut radio, &clock, &mut sink);
        assert_eq!(reports.len(), 1);
        assert_eq!(node.counters().raw_frames, 1);

        // Over the wire as the relay would send it.
        let bytes = reports[0].to_json_bytes().unwrap();
        let report = ArrivalReport::from_json_bytes(&bytes).unwrap();
        identity.get_or_insert_with(|| report.identity.clone());
        hub.apply_report(&report, &mut hub_sink);
    }

    let identity = identity.unwrap();
    let record = hub.store().get(&identity).unwrap();
    assert_eq!(record.arrival_count(), 4);

    let fix = hub.position(&identity);
    assert!(fix.valid, "{fix:?}");
    assert_eq!(fix.anchors_used, 4);
    assert!((fix.x - EMITTER.0).abs() < 0.01, "{fix:?}");
    assert!((fix.y - EMITTER.1).abs() < 0.01, "{fix:?}");

    // Automatic solves fired at the third and fourth arrival.
    assert_eq!(hub_sink.positions().count(), 2);
    assert_eq!(hub.counters().fixes, 2);
}

#[test]
fn test_same_frame_twice_from_one_anchor_is_a_duplicate() {
    let frame = beacon_frame();
    let mut node = PositioningEngine::default();
    let mut radio = LoopbackRadio::new();
    radio.inject(&frame);
    radio.inject(&frame);
    let clock = ManualClock::new(EMIT_US + 10);
    let mut sink = RecordingSink::new();

    let reports = node.poll_radio(0, &mut radio, &clock, &mut sink);
    assert_eq!(reports.len(), 1);
    assert_eq!(node.counters().packets, 2);
    assert_eq!(node.counters().duplicates, 1);
    assert_eq!(node.store().len(), 1);
}
