//! udp_tx.rs: forwards simulated arrivals to a running hub.
//!
//! Same JSON `ArrivalReport` datagrams an anchor relay sends, so a hub
//! cannot tell simulated anchors from real ones. Send errors are logged and
//! never stop the simulation.

use std::net::UdpSocket;

use tdoa_types::ArrivalReport;
use tracing::{debug, warn};

use crate::sim::EpochResult;

pub struct HubForwarder {
    socket: UdpSocket,
    hub_addr: String,
}

impl HubForwarder {
    pub fn new(hub_addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { socket, hub_addr: hub_addr.to_string() })
    }

    /// Send every arrival of one epoch (duplicates included).
    pub fn send_epoch(&self, result: &EpochResult) {
        for a in &result.arrivals {
            let report = ArrivalReport {
                anchor_id: a.anchor_id,
                identity: result.identity.clone(),
                sequence: result.sequence,
                rx_timestamp_us: a.rx_timestamp_us,
            };
            let bytes = match report.to_json_bytes() {
                Ok(b) => b,
                Err(e) => {
                    warn!("UDP: serialize failed: {e}");
                    continue;
                }
            };
            if let Err(e) = self.socket.send_to(&bytes, &self.hub_addr) {
                warn!("UDP: send to {} failed: {e}", self.hub_addr);
            } else {
                debug!("UDP → {} EUID:{} anchor #{}", self.hub_addr, report.identity, a.anchor_id);
            }
        }
    }
}
