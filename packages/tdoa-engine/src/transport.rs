//! # transport
//!
//! Radio transport seam. The transceiver driver itself lives outside this
//! crate; the engine only needs readiness, byte-at-a-time receive and send.
//!
//! Implementations here:
//! - `LoopbackRadio`: in-memory, for tests and the simulator
//! - `UdpRadio`: non-blocking UDP stand-in for a serial LoRa module. Each
//!   datagram carries raw bytes as they would come off the module UART.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Largest datagram accepted by `UdpRadio` (mirrors the module's UART RX buffer).
pub const RX_BUFFER_SIZE: usize = 2048;

/// What the engine needs from a radio module.
pub trait RadioTransport {
    /// Module idle and able to accept a frame (AUX high on an E32).
    fn is_ready(&self) -> bool;

    /// At least one received byte can be read without waiting.
    fn is_data_available(&mut self) -> bool;

    /// Next received byte, `None` if nothing is buffered.
    fn read_byte(&mut self) -> Option<u8>;

    /// Hand a complete frame to the module for transmission.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Poll `is_ready` every `poll` until it reports true or `timeout` passes.
///
/// Returns how long the wait took. Sleeps on the tokio timer, so the rest of
/// the runtime keeps running while the module powers up.
pub async fn wait_until_ready(
    radio: &dyn RadioTransport,
    timeout: Duration,
    poll: Duration,
) -> Result<Duration, TransportError> {
    info!("Waiting for radio ready (timeout {} ms)...", timeout.as_millis());
    let started = Instant::now();
    loop {
        if radio.is_ready() {
            let waited = started.elapsed();
            info!("Radio ready after {} ms", waited.as_millis());
            return Ok(waited);
        }
        let waited = started.elapsed();
        if waited >= timeout {
            warn!("Radio not ready after {} ms, check power and wiring", waited.as_millis());
            return Err(TransportError::NotReady { waited_ms: waited.as_millis() as u64 });
        }
        tokio::time::sleep(poll.min(timeout - waited)).await;
    }
}

// ── In-memory radio ───────────────────────────────────────────────────────────

/// Scriptable radio: inject receive bytes, inspect sent frames.
#[derive(Debug, Default)]
pub struct LoopbackRadio {
    rx: VecDeque<u8>,
    sent: Vec<Vec<u8>>,
    busy: bool,
    reject_sends: bool,
}

impl LoopbackRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if they had just come off the air.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn set_reject_sends(&mut self, reject: bool) {
        self.reject_sends = reject;
    }

    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }
}

impl RadioTransport for LoopbackRadio {
    fn is_ready(&self) -> bool {
        !self.busy
    }

    fn is_data_available(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.reject_sends {
            return Err(TransportError::Rejected);
        }
        self.sent.push(bytes.to_vec());
        Ok(())
    }
}

// ── UDP stand-in ──────────────────────────────────────────────────────────────

/// Non-blocking UDP socket posing as a LoRa module.
///
/// Received datagrams are appended to a byte queue; `send` fans one frame out
/// to every configured peer (single-hop broadcast).
pub struct UdpRadio {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    rx: BytesMut,
    scratch: Vec<u8>,
}

impl UdpRadio {
    pub fn bind(listen_addr: &str, peers: Vec<SocketAddr>) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(listen_addr)?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        info!("📡 UDP radio on {} → {} peer(s)", socket.local_addr()?, peers.len());
        Ok(Self {
            socket,
            peers,
            rx: BytesMut::with_capacity(RX_BUFFER_SIZE),
            scratch: vec![0u8; RX_BUFFER_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Pull at most one pending datagram into the byte queue.
    fn fill(&mut self) {
        match self.socket.recv_from(&mut self.scratch) {
            Ok((len, src)) => {
                debug!("UDP radio: {len} bytes from {src}");
                self.rx.extend_from_slice(&self.scratch[..len]);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("UDP radio: recv error: {e}"),
        }
    }
}

impl RadioTransport for UdpRadio {
    fn is_ready(&self) -> bool {
        self.socket.local_addr().is_ok()
    }

    fn is_data_available(&mut self) -> bool {
        if self.rx.is_empty() {
            self.fill();
        }
        !self.rx.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.rx.is_empty() {
            return None;
        }
        Some(self.rx.get_u8())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        for peer in &self.peers {
            let written = self.socket.send_to(bytes, peer)?;
            if written != bytes.len() {
                return Err(TransportError::ShortWrite { written, expected: bytes.len() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_loopback_reads_in_order() {
        let mut radio = LoopbackRadio::new();
        radio.inject(b"ab");
        assert!(radio.is_data_available());
        assert_eq!(radio.read_byte(), Some(b'a'));
        assert_eq!(radio.read_byte(), Some(b'b'));
        assert!(!radio.is_data_available());
        assert_eq!(radio.read_byte(), None);
    }

    #[test]
    fn test_loopback_send_rejection() {
        let mut radio = LoopbackRadio::new();
        radio.set_reject_sends(true);
        assert!(matches!(radio.send(b"x"), Err(TransportError::Rejected)));
        assert!(radio.sent().is_empty());
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let mut radio = LoopbackRadio::new();
        radio.set_busy(true);
        let err = wait_until_ready(&radio, Duration::from_millis(30), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotReady { waited_ms } if waited_ms >= 30));
    }

    #[tokio::test]
    async fn test_wait_until_ready_returns_immediately_when_ready() {
        let radio = LoopbackRadio::new();
        let waited = wait_until_ready(&radio, Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn test_udp_radio_round_trip() {
        let mut rx = UdpRadio::bind("127.0.0.1:0", Vec::new()).unwrap();
        let rx_addr = rx.local_addr().unwrap();
        let mut tx = UdpRadio::bind("127.0.0.1:0", vec![rx_addr]).unwrap();

        tx.send(b"hi\n").unwrap();

        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while got.len() < 3 && Instant::now() < deadline {
            while rx.is_data_available() {
                got.extend(rx.read_byte());
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(got, b"hi\n");
    }
}
