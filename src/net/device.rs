//! The virtual network device the transport exchanges raw IPv4 datagrams
//! with.

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// A layer 3 device delivering and accepting whole IP datagrams.
///
/// Implemented by [`crate::tun_tap::Tun`] on Linux; tests drive the stack
/// through an in-memory implementation.
pub trait Device: Send + Sync {
    /// Writes one datagram to the device, returning the number of bytes
    /// accepted.
    fn send(&self, datagram: &[u8]) -> io::Result<usize>;

    /// Reads one datagram from the device into `buf`, returning its length.
    ///
    /// Only called after [`Device::wait_readable`] reported readiness.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Waits until a datagram can be read or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on expiry.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;
}

impl<D: Device + ?Sized> Device for Arc<D> {
    fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        (**self).send(datagram)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }
}
