//! In-memory device and a scripted peer for driving a [`Connection`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use teacp::net::headers::{Flag, Ipv4Header, Protocol, TcpHeader};
use teacp::net::protocol::TcpSegment;
use teacp::{Config, Connection, Device};

pub const LOCAL: [u8; 4] = [10, 12, 0, 1];
pub const REMOTE: [u8; 4] = [10, 12, 0, 2];
pub const LOCAL_PORT: u16 = 40000;
pub const REMOTE_PORT: u16 = 8080;

/// Our initial sequence number.
pub const ISS: u32 = 500;
/// The peer's initial sequence number.
pub const IRS: u32 = 1000;

#[derive(Debug, Default)]
pub struct MockDevice {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    readable: Condvar,
    outbound: Mutex<VecDeque<Vec<u8>>>,
    sent: Condvar,
    link_down: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivers a datagram to the connection.
    pub fn inject(&self, datagram: Vec<u8>) {
        self.inbound.lock().unwrap().push_back(datagram);
        self.readable.notify_all();
    }

    /// Makes every send fail until called again with `false`.
    pub fn set_link_down(&self, down: bool) {
        self.link_down.store(down, Ordering::SeqCst);
    }

    /// Waits for the next segment the connection sent.
    pub fn next_sent(&self, timeout: Duration) -> Option<TcpSegment> {
        let deadline = Instant::now() + timeout;
        let mut outbound = self.outbound.lock().unwrap();

        loop {
            if let Some(datagram) = outbound.pop_front() {
                let (header, payload) = Ipv4Header::parse_datagram(&datagram).unwrap();

                assert_eq!(header.protocol(), Protocol::TCP);
                assert_eq!(header.src(), LOCAL);
                assert_eq!(header.dst(), REMOTE);

                let seg = TcpSegment::decode(payload).unwrap();
                assert!(seg.is_valid_checksum(LOCAL, REMOTE));

                return Some(seg);
            }

            let now = Instant::now();

            if now >= deadline {
                return None;
            }

            outbound = self.sent.wait_timeout(outbound, deadline - now).unwrap().0;
        }
    }

    /// Returns `true` if nothing was sent within `timeout`.
    pub fn is_quiet(&self, timeout: Duration) -> bool {
        self.next_sent(timeout).is_none()
    }
}

impl Device for MockDevice {
    fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(io::Error::other("link down"));
        }

        self.outbound.lock().unwrap().push_back(datagram.to_vec());
        self.sent.notify_all();

        Ok(datagram.len())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(datagram) = self.inbound.lock().unwrap().pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };

        buf[..datagram.len()].copy_from_slice(&datagram);

        Ok(datagram.len())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let inbound = self.inbound.lock().unwrap();
        let (inbound, _) = self
            .readable
            .wait_timeout_while(inbound, timeout, |queue| queue.is_empty())
            .unwrap();

        Ok(!inbound.is_empty())
    }
}

/// Configuration with fixed randomness and short timeouts.
pub fn config() -> Config {
    Config::default()
        .with_seed(7)
        .with_local_port(LOCAL_PORT)
        .with_initial_sequence(ISS)
        .with_read_timeout(Duration::from_millis(20))
        .with_connect_timeout(Duration::from_secs(2))
        .with_write_timeout(Duration::from_millis(200))
        .with_close_timeout(Duration::from_millis(300))
}

/// Builds a datagram from the peer to us.
pub fn datagram(seq: u32, ack: u32, flags: &[Flag], payload: &[u8]) -> Vec<u8> {
    datagram_from(REMOTE_PORT, seq, ack, flags, payload)
}

/// Builds a datagram from the given peer port to us.
pub fn datagram_from(src_port: u16, seq: u32, ack: u32, flags: &[Flag], payload: &[u8]) -> Vec<u8> {
    let mut tcp = TcpHeader::new(src_port, LOCAL_PORT, seq, 65535);
    tcp.set_ack_number(ack);

    for &flag in flags {
        tcp.set_flag(flag);
    }

    let segment = tcp.encode(REMOTE, LOCAL, payload).unwrap();

    Ipv4Header::new(REMOTE, LOCAL, segment.len(), 64, Protocol::TCP)
        .unwrap()
        .encode(&segment)
        .unwrap()
}

/// Dials through a peer that answers the SYN, consuming the SYN and the
/// handshake ACK.
pub fn establish(config: Config) -> (Connection<Arc<MockDevice>>, Arc<MockDevice>) {
    let device = MockDevice::new();
    device.inject(datagram(IRS, ISS + 1, &[Flag::SYN, Flag::ACK], &[]));

    let conn = Connection::dial_with(Arc::clone(&device), LOCAL, REMOTE, REMOTE_PORT, config).unwrap();

    let syn = device.next_sent(Duration::from_secs(1)).unwrap();
    assert!(syn.tcp.syn());

    let ack = device.next_sent(Duration::from_secs(1)).unwrap();
    assert!(ack.tcp.ack());

    (conn, device)
}

/// Waits for an acknowledgment-only segment carrying `ack`, skipping older
/// acknowledgments.
pub fn expect_ack(device: &MockDevice, ack: u32) {
    let deadline = Instant::now() + Duration::from_secs(1);

    while let Some(seg) = device.next_sent(deadline.saturating_duration_since(Instant::now())) {
        assert!(seg.payload.is_empty(), "unexpected data: {seg}");

        if seg.tcp.ack_number() == ack {
            return;
        }
    }

    panic!("no ACK {ack} sent");
}
