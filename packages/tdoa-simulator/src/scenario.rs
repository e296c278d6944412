//! scenario.rs: emitter motion, anchor layout and radio timing model.
//!
//! Loaded from config.toml; `preset` builds the named variants used for
//! quick runs without a config file.

use serde::Deserialize;
use tdoa_engine::EngineConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub simulation: SimulationConfig,
    pub timing: TimingConfig,
    pub emitter: Motion,
    #[serde(default)]
    pub engine: EngineConfig,
    pub anchors: Vec<AnchorSite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub epochs: u32,
    pub beacon_interval_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimingConfig {
    /// Gaussian receive-timestamp jitter, nanoseconds
    pub sigma_ns: f64,
    pub dropout_rate: f64,
    pub duplicate_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnchorSite {
    pub id: u8,
    pub x: f64,
    pub y: f64,
}

/// Emitter trajectory, planar, meters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Motion {
    Static { x: f64, y: f64 },
    Circle { cx: f64, cy: f64, radius_m: f64, period_s: f64 },
    /// Back and forth between two points.
    Line { from: [f64; 2], to: [f64; 2], speed_mps: f64 },
}

impl Motion {
    pub fn position_at(&self, t_s: f64) -> (f64, f64) {
        match *self {
            Motion::Static { x, y } => (x, y),
            Motion::Circle { cx, cy, radius_m, period_s } => {
                let phase = if period_s > 0.0 { std::f64::consts::TAU * t_s / period_s } else { 0.0 };
                (cx + radius_m * phase.cos(), cy + radius_m * phase.sin())
            }
            Motion::Line { from, to, speed_mps } => {
                let len = ((to[0] - from[0]).powi(2) + (to[1] - from[1]).powi(2)).sqrt();
                if len == 0.0 || speed_mps <= 0.0 {
                    return (from[0], from[1]);
                }
                // Triangle wave over [0, len].
                let travelled = (speed_mps * t_s).rem_euclid(2.0 * len);
                let along = if travelled <= len { travelled } else { 2.0 * len - travelled };
                let s = along / len;
                (from[0] + s * (to[0] - from[0]), from[1] + s * (to[1] - from[1]))
            }
        }
    }
}

impl ScenarioConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Square 120 × 90 m site with one anchor per corner.
fn corner_anchors() -> Vec<AnchorSite> {
    vec![
        AnchorSite { id: 1, x: 0.0, y: 0.0 },
        AnchorSite { id: 2, x: 120.0, y: 0.0 },
        AnchorSite { id: 3, x: 120.0, y: 90.0 },
        AnchorSite { id: 4, x: 0.0, y: 90.0 },
    ]
}

fn base(timing: TimingConfig, emitter: Motion) -> ScenarioConfig {
    ScenarioConfig {
        simulation: SimulationConfig { epochs: 200, beacon_interval_ms: 1000, seed: Some(7) },
        timing,
        emitter,
        engine: EngineConfig::default(),
        anchors: corner_anchors(),
    }
}

/// Built-in scenarios: `ideal`, `noisy`, `lossy`, `collinear`.
pub fn preset(name: &str) -> Option<ScenarioConfig> {
    let circle = Motion::Circle { cx: 60.0, cy: 45.0, radius_m: 25.0, period_s: 120.0 };
    let cfg = match name {
        "ideal" => base(TimingConfig { sigma_ns: 0.0, dropout_rate: 0.0, duplicate_rate: 0.0 }, circle),
        "noisy" => base(TimingConfig { sigma_ns: 5.0, dropout_rate: 0.0, duplicate_rate: 0.0 }, circle),
        "lossy" => base(
            TimingConfig { sigma_ns: 2.0, dropout_rate: 0.25, duplicate_rate: 0.10 },
            Motion::Line { from: [10.0, 10.0], to: [110.0, 80.0], speed_mps: 1.5 },
        ),
        // Every fix must come back invalid.
        "collinear" => {
            let mut cfg = base(
                TimingConfig { sigma_ns: 0.0, dropout_rate: 0.0, duplicate_rate: 0.0 },
                Motion::Static { x: 40.0, y: 30.0 },
            );
            cfg.anchors = (0..4).map(|i| AnchorSite { id: i + 1, x: 40.0 * i as f64, y: 0.0 }).collect();
            cfg
        }
        _ => return None,
    };
    Some(cfg)
}
