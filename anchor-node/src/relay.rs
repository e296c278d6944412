//! # relay
//!
//! Anchor → hub arrival forwarding. One `ArrivalReport` per JSON datagram.
//! Send and parse failures are logged and dropped; the node keeps running.

use std::net::{SocketAddr, UdpSocket};

use tdoa_types::ArrivalReport;
use tracing::{debug, warn};

pub struct HubRelay {
    socket: UdpSocket,
    hub_addr: SocketAddr,
    sent: u64,
}

impl HubRelay {
    pub fn new(hub_addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, hub_addr, sent: 0 })
    }

    pub fn forward(&mut self, reports: &[ArrivalReport]) {
        for report in reports {
            let bytes = match report.to_json_bytes() {
                Ok(b) => b,
                Err(e) => {
                    warn!("Relay: serialize failed: {e}");
                    continue;
                }
            };
            match self.socket.send_to(&bytes, self.hub_addr) {
                Ok(_) => {
                    self.sent += 1;
                    debug!("Relay → {} EUID:{} anchor #{}", self.hub_addr, report.identity, report.anchor_id);
                }
                Err(e) => warn!("Relay: send to {} failed: {e}", self.hub_addr),
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

/// Decode one hub datagram; malformed input is logged at debug and dropped.
pub fn parse_report(data: &[u8], src: SocketAddr) -> Option<ArrivalReport> {
    match ArrivalReport::from_json_bytes(data) {
        Ok(report) if report.rx_timestamp_us.is_finite() => Some(report),
        Ok(report) => {
            debug!("Hub: non-finite timestamp from {src} for EUID:{}", report.identity);
            None
        }
        Err(e) => {
            debug!("Hub: malformed report from {src}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn src() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    #[test]
    fn test_parse_report_accepts_relay_output() {
        let report = ArrivalReport { anchor_id: 2, identity: "4_88".into(), sequence: 9, rx_timestamp_us: 12.5 };
        let bytes = report.to_json_bytes().unwrap();
        assert_eq!(parse_report(&bytes, src()), Some(report));
    }

    #[test]
    fn test_parse_report_drops_garbage() {
        assert_eq!(parse_report(b"EUID:1_1,MSG:x", src()), None);
        assert_eq!(parse_report(br#"{"anchor_id":300,"identity":"a","sequence":0,"rx_timestamp_us":1.0}"#, src()), None);
    }

    #[test]
    fn test_forward_reaches_the_hub_socket() {
        let hub = UdpSocket::bind("127.0.0.1:0").unwrap();
        hub.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut relay = HubRelay::new(hub.local_addr().unwrap()).unwrap();

        let report = ArrivalReport { anchor_id: 1, identity: "1_1".into(), sequence: 0, rx_timestamp_us: 100.0 };
        relay.forward(std::slice::from_ref(&report));
        assert_eq!(relay.sent(), 1);

        let mut buf = [0u8; 512];
        let (len, from) = hub.recv_from(&mut buf).unwrap();
        assert_eq!(parse_report(&buf[..len], from), Some(report));
    }
}
