//! # config
//!
//! Node configuration: `config.toml` (or the embedded default) plus `TDOA_*`
//! environment overrides.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use tdoa_engine::EngineConfig;
use thiserror::Error;

pub const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{var}={value:?} is not valid")]
    InvalidEnv { var: &'static str, value: String },

    #[error("{field}: {value:?} is not a socket address")]
    InvalidAddr { field: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub radio: RadioSection,
    pub beacon: BeaconSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub anchors: Vec<AnchorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    pub anchor_id: u8,
    #[serde(default = "default_heartbeat_s")]
    pub heartbeat_interval_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadioSection {
    pub listen_addr: String,
    #[serde(default)]
    pub peers: Vec<String>,
    pub ready_timeout_ms: u64,
    pub ready_poll_ms: u64,
    pub poll_interval_ms: u64,
    pub serial_baud: u32,
    pub radio_baud: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconSection {
    pub payload: String,
    pub send_interval_ms: u64,
    pub max_console_input: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubSection {
    pub addr: Option<String>,
    #[serde(default = "default_hub_listen")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnchorEntry {
    pub id: u8,
    pub x: f64,
    pub y: f64,
}

fn default_heartbeat_s() -> u64 {
    5
}

fn default_hub_listen() -> String {
    "0.0.0.0:5555".to_string()
}

impl NodeConfig {
    /// Read `path`, falling back to the embedded default, then apply env overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
        let mut cfg: NodeConfig = toml::from_str(&raw)?;
        cfg.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("TDOA_ANCHOR_ID") {
            self.node.anchor_id = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: "TDOA_ANCHOR_ID", value: v })?;
        }
        if let Some(v) = lookup("TDOA_LISTEN_ADDR") {
            self.radio.listen_addr = v;
        }
        if let Some(v) = lookup("TDOA_HUB_ADDR") {
            // Empty disables relaying.
            self.hub.addr = (!v.trim().is_empty()).then_some(v);
        }
        if let Some(v) = lookup("TDOA_SEND_INTERVAL_MS") {
            self.beacon.send_interval_ms = v
                .trim()
                .parse()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidEnv { var: "TDOA_SEND_INTERVAL_MS", value: v })?;
        }
        Ok(())
    }

    pub fn peer_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.radio
            .peers
            .iter()
            .map(|p| {
                p.parse()
                    .map_err(|_| ConfigError::InvalidAddr { field: "radio.peers", value: p.clone() })
            })
            .collect()
    }

    pub fn hub_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.hub
            .addr
            .as_deref()
            .map(|a| {
                a.parse()
                    .map_err(|_| ConfigError::InvalidAddr { field: "hub.addr", value: a.to_string() })
            })
            .transpose()
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.radio.ready_timeout_ms)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.radio.ready_poll_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.radio.poll_interval_ms.max(1))
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.beacon.send_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.node.heartbeat_interval_s.max(1))
    }
}
