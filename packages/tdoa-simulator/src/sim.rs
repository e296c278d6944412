//! sim.rs: one beacon per epoch through the engine, scored against ground truth.

use rand::rngs::StdRng;
use tdoa_engine::{PositioningEngine, StatusSink};
use tdoa_types::{IdentityGenerator, ManualClock, PositionEstimate};
use tracing::warn;

use crate::physics::{ArrivalModel, SimArrival, TimingError};
use crate::scenario::ScenarioConfig;

/// Emission times start here so no identity carries a zero timestamp.
const EMIT_ORIGIN_US: f64 = 1_000_000.0;

#[derive(Debug, Clone)]
pub struct EpochResult {
    pub identity: String,
    pub sequence: u32,
    pub truth: (f64, f64),
    pub arrivals: Vec<SimArrival>,
    pub estimate: PositionEstimate,
}

impl EpochResult {
    pub fn error_m(&self) -> Option<f64> {
        self.estimate
            .coordinates()
            .map(|(x, y)| ((x - self.truth.0).powi(2) + (y - self.truth.1).powi(2)).sqrt())
    }
}

pub struct Simulation {
    cfg: ScenarioConfig,
    model: ArrivalModel,
    engine: PositioningEngine,
    identities: IdentityGenerator,
    clock: ManualClock,
    rng: StdRng,
    epoch: u32,
}

impl Simulation {
    pub fn new(cfg: ScenarioConfig, rng: StdRng) -> Result<Self, TimingError> {
        let model = ArrivalModel::new(&cfg.timing)?;
        let mut engine = PositioningEngine::new(&cfg.engine);
        for site in &cfg.anchors {
            if let Err(e) = engine.register_anchor(site.id, site.x, site.y) {
                warn!("Anchor #{} left out: {e}", site.id);
            }
        }
        Ok(Self {
            cfg,
            model,
            engine,
            identities: IdentityGenerator::new(),
            clock: ManualClock::new(0),
            rng,
            epoch: 0,
        })
    }

    /// Emit one beacon, deliver its arrivals to the engine, read back the fix.
    pub fn step(&mut self, sink: &mut dyn StatusSink) -> EpochResult {
        let sequence = self.epoch;
        self.epoch += 1;

        let t_s = sequence as f64 * self.cfg.simulation.beacon_interval_ms as f64 / 1_000.0;
        let emit_us = EMIT_ORIGIN_US + t_s * 1e6;
        self.clock.set(emit_us as u64);
        let identity = self.identities.next_identity(&self.clock);

        let truth = self.cfg.emitter.position_at(t_s);
        let arrivals = self.model.synthesize(truth, emit_us, &self.cfg.anchors, &mut self.rng);
        for a in &arrivals {
            self.engine.record_arrival(&identity, a.anchor_id, a.rx_timestamp_us, sink);
        }
        let estimate = self.engine.position(&identity);

        EpochResult { identity, sequence, truth, arrivals, estimate }
    }

    pub fn engine(&self) -> &PositioningEngine {
        &self.engine
    }
}

// ── Accuracy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Accuracy {
    epochs: u32,
    errors_m: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracySummary {
    pub epochs: u32,
    pub fixes: usize,
    pub fix_rate: f64,
    pub mean_m: f64,
    pub p95_m: f64,
    pub max_m: f64,
}

impl Accuracy {
    pub fn record(&mut self, result: &EpochResult) {
        self.epochs += 1;
        if let Some(err) = result.error_m() {
            self.errors_m.push(err);
        }
    }

    pub fn summary(&self) -> AccuracySummary {
        let fixes = self.errors_m.len();
        let mut sorted = self.errors_m.clone();
        sorted.sort_by(f64::total_cmp);
        let mean_m = if fixes == 0 { 0.0 } else { sorted.iter().sum::<f64>() / fixes as f64 };
        let p95_m = if fixes == 0 { 0.0 } else { sorted[((fixes - 1) as f64 * 0.95).round() as usize] };
        AccuracySummary {
            epochs: self.epochs,
            fixes,
            fix_rate: if self.epochs == 0 { 0.0 } else { fixes as f64 / self.epochs as f64 },
            mean_m,
            p95_m,
            max_m: sorted.last().copied().unwrap_or(0.0),
        }
    }
}
