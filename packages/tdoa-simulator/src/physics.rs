//! physics.rs: radio arrival synthesis.
//!
//! For every anchor: time of flight at the speed of light, plus Gaussian
//! receive jitter, minus the packets the anchor never hears. A duplicate is
//! a second delivery of the same stamped arrival, as a relay retry would
//! produce. Arrivals come back in random order.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tdoa_types::SPEED_OF_LIGHT_M_PER_US;
use thiserror::Error;

use crate::scenario::{AnchorSite, TimingConfig};

#[derive(Error, Debug, PartialEq)]
pub enum TimingError {
    #[error("timing.sigma_ns must be finite and non-negative, got {0}")]
    BadSigma(f64),

    #[error("timing.{name} must be within [0, 1], got {value}")]
    BadRate { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimArrival {
    pub anchor_id: u8,
    pub rx_timestamp_us: f64,
}

pub struct ArrivalModel {
    jitter_us: Normal<f64>,
    dropout_rate: f64,
    duplicate_rate: f64,
}

impl ArrivalModel {
    pub fn new(timing: &TimingConfig) -> Result<Self, TimingError> {
        let sigma_us = timing.sigma_ns / 1_000.0;
        let jitter_us = Normal::new(0.0, sigma_us).map_err(|_| TimingError::BadSigma(timing.sigma_ns))?;
        for (name, value) in [("dropout_rate", timing.dropout_rate), ("duplicate_rate", timing.duplicate_rate)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TimingError::BadRate { name, value });
            }
        }
        Ok(Self { jitter_us, dropout_rate: timing.dropout_rate, duplicate_rate: timing.duplicate_rate })
    }

    /// Arrivals of one packet emitted at `emit_us` from `emitter`.
    pub fn synthesize(
        &self,
        emitter: (f64, f64),
        emit_us: f64,
        anchors: &[AnchorSite],
        rng: &mut impl Rng,
    ) -> Vec<SimArrival> {
        let mut arrivals = Vec::with_capacity(anchors.len() + 2);
        for anchor in anchors {
            if rng.gen_bool(self.dropout_rate) {
                continue;
            }
            let dist_m = ((anchor.x - emitter.0).powi(2) + (anchor.y - emitter.1).powi(2)).sqrt();
            let rx = emit_us + dist_m / SPEED_OF_LIGHT_M_PER_US + self.jitter_us.sample(rng);
            let arrival = SimArrival { anchor_id: anchor.id, rx_timestamp_us: rx };
            arrivals.push(arrival);
            if rng.gen_bool(self.duplicate_rate) {
                arrivals.push(arrival);
            }
        }
        arrivals.shuffle(rng);
        arrivals
    }
}
