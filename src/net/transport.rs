//! IPv4 framing on top of a [`Device`].
//!
//! The transport owns the device handle for one connection. Outbound TCP
//! bytes are wrapped in a fresh IPv4 datagram; inbound datagrams are waited
//! for with a bounded timeout, filtered by destination address, and unwrapped
//! back to TCP bytes.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, trace};

use super::addr::Ipv4;
use super::device::Device;
use super::headers::{Ipv4Header, Protocol};
use crate::{Config, Error, Result};

/// Largest datagram the IPv4 total length can describe.
pub const MAX_DATAGRAM_LEN: usize = u16::MAX as usize;

/// Exchanges TCP bytes with a single remote host over a [`Device`].
#[derive(Debug)]
pub struct Transport<D> {
    device: D,
    local: [u8; 4],
    remote: [u8; 4],
    ttl: u8,
    read_timeout: Duration,
    rng: Mutex<StdRng>,
    /// Receives whole datagrams before their payload is copied out.
    scratch: Mutex<Vec<u8>>,
}

impl<D: Device> Transport<D> {
    /// Creates a transport from `local` to `remote`, drawing IPv4
    /// identifications from `rng`.
    pub fn new(device: D, local: [u8; 4], remote: [u8; 4], config: &Config, rng: StdRng) -> Self {
        Self {
            device,
            local,
            remote,
            ttl: config.ttl,
            read_timeout: config.read_timeout,
            rng: Mutex::new(rng),
            scratch: Mutex::new(vec![0u8; MAX_DATAGRAM_LEN]),
        }
    }

    /// Wraps `payload` in an IPv4 datagram and writes it to the device.
    ///
    /// Returns the number of payload bytes accepted by the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit in a datagram or the device
    /// write fails.
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        let mut header = Ipv4Header::new(
            self.local,
            self.remote,
            payload.len(),
            self.ttl,
            Protocol::TCP,
        )?;

        header.set_id(
            self.rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .random(),
        );

        let datagram = header.encode(payload)?;
        let nbytes = self.device.send(&datagram)?;

        trace!(
            "sent ipv4 datagram | id: {}, ttl: {}, total_len: {}, src: {}, dst: {}",
            header.id(),
            header.ttl(),
            datagram.len(),
            Ipv4(self.local),
            Ipv4(self.remote),
        );

        Ok(nbytes.saturating_sub(header.header_len()))
    }

    /// Waits for the next TCP datagram addressed to the local address and
    /// copies its payload into `buf`, truncating it if `buf` is too small.
    ///
    /// Datagrams for other destinations or carrying other protocols are
    /// discarded and the wait continues.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimedOut`] if no matching datagram arrives within the
    /// read timeout, a parse error for a malformed datagram, or the device
    /// error.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        let mut datagram = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            if remaining.is_zero() || !self.device.wait_readable(remaining)? {
                return Err(Error::TimedOut);
            }

            let nbytes = self.device.recv(&mut datagram[..])?;
            let (header, payload) = Ipv4Header::parse_datagram(&datagram[..nbytes])?;

            if header.dst() != self.local {
                debug!(
                    "discarding datagram for {} (local address is {})",
                    Ipv4(header.dst()),
                    Ipv4(self.local),
                );
                continue;
            }

            if header.protocol() != Protocol::TCP {
                debug!(
                    "discarding datagram from {} carrying {:?}",
                    Ipv4(header.src()),
                    header.protocol(),
                );
                continue;
            }

            trace!(
                "received ipv4 datagram | version: {}, ihl: {}, dscp: {}, ecn: {}, total_len: {}, id: {}, DF: {}, MF: {}, frag_offset: {}, ttl: {}, chksum: 0x{:04x} (valid: {}), src: {}, dst: {}",
                header.version(),
                header.ihl(),
                header.dscp(),
                header.ecn(),
                header.total_len(),
                header.id(),
                header.dont_fragment(),
                header.more_fragments(),
                header.fragment_offset(),
                header.ttl(),
                header.header_checksum(),
                header.is_valid_checksum(),
                Ipv4(header.src()),
                Ipv4(header.dst()),
            );

            let len = payload.len().min(buf.len());
            buf[..len].copy_from_slice(&payload[..len]);

            return Ok(len);
        }
    }
}
