//! Tunables carried into a connection when it is dialed.

use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

/// Connection configuration.
///
/// ```
/// use std::time::Duration;
///
/// let config = teacp::Config::default()
///     .with_device("tun1")
///     .with_seed(7)
///     .with_read_timeout(Duration::from_millis(250));
///
/// assert_eq!(config.device, "tun1");
/// assert_eq!(config.ttl, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the TUN interface to attach to.
    pub device: String,
    /// Time to live of every outbound IPv4 datagram.
    pub ttl: u8,
    /// Receive window advertised to the peer.
    pub window: u16,
    /// Largest payload carried by one outbound segment.
    pub mss: usize,
    /// Bound on a single wait for the device to become readable.
    pub read_timeout: Duration,
    /// Bound on the whole handshake.
    pub connect_timeout: Duration,
    /// Bound on a write waiting for room in the outbound queue.
    pub write_timeout: Duration,
    /// Bound on a close waiting for the FIN exchange to complete.
    pub close_timeout: Duration,
    /// Outbound queue capacity in bytes.
    pub send_queue_capacity: usize,
    /// Out-of-order holding area capacity in bytes.
    pub reassembly_capacity: usize,
    /// Consecutive device failures tolerated before the connection fails.
    pub max_io_errors: usize,
    /// Seed for ports, initial sequence numbers and IPv4 identification.
    /// Entropy from the OS is used when unset.
    pub seed: Option<u64>,
    /// Fixed local port. Picked from the ephemeral range when unset.
    pub local_port: Option<u16>,
    /// Fixed initial sequence number. Random when unset.
    pub initial_sequence: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: String::from("tun0"),
            ttl: 64,
            window: 4096 * 8,
            // 1500 (MTU) - 20 (IPv4) - 20 (TCP)
            mss: 1460,
            read_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(5),
            send_queue_capacity: 64 * 1024,
            reassembly_capacity: 64 * 1024,
            max_io_errors: 8,
            seed: None,
            local_port: None,
            initial_sequence: None,
        }
    }
}

impl Config {
    /// Sets the TUN interface name.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Sets the IPv4 time to live.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the advertised receive window.
    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    /// Sets the maximum segment payload. Zero is treated as one byte.
    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss.max(1);
        self
    }

    /// Sets the bounded wait of each device read.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the handshake bound.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long a write may wait for queue space.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets how long a close may wait for the FIN exchange.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the outbound queue capacity in bytes.
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Sets the out-of-order holding area capacity in bytes.
    pub fn with_reassembly_capacity(mut self, capacity: usize) -> Self {
        self.reassembly_capacity = capacity;
        self
    }

    /// Sets the number of consecutive device failures tolerated.
    pub fn with_max_io_errors(mut self, max: usize) -> Self {
        self.max_io_errors = max.max(1);
        self
    }

    /// Seeds the connection's random source.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fixes the local port.
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Fixes the initial sequence number.
    pub fn with_initial_sequence(mut self, iss: u32) -> Self {
        self.initial_sequence = Some(iss);
        self
    }

    /// Builds the random source described by [`Config::seed`].
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.device, "tun0");
        assert_eq!(config.ttl, 64);
        assert_eq!(config.window, 32768);
        assert_eq!(config.mss, 1460);
        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert_eq!(config.send_queue_capacity, 65536);
        assert!(config.seed.is_none());
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let config = Config::default().with_seed(42);

        let a: [u32; 4] = config.rng().random();
        let b: [u32; 4] = config.rng().random();

        assert_eq!(a, b);
    }

    #[test]
    fn builders_clamp_degenerate_values() {
        let config = Config::default().with_mss(0).with_max_io_errors(0);

        assert_eq!(config.mss, 1);
        assert_eq!(config.max_io_errors, 1);
    }
}
