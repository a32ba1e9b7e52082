//! Identifying a connection by its pair of socket addresses.

use std::fmt;

use crate::net::addr::Ipv4;

/// An IPv4 address and a port number.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct SocketAddr {
    /// IPv4 address.
    pub addr: [u8; 4],
    /// Port number.
    pub port: u16,
}

impl SocketAddr {
    /// Creates a socket address.
    pub fn new(addr: [u8; 4], port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4(self.addr), self.port)
    }
}

/// A TCP connection, identified by both the local and remote socket
/// addresses.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Socket {
    /// The local socket address.
    pub src: SocketAddr,
    /// The remote socket address.
    pub dst: SocketAddr,
}

impl Socket {
    /// Returns `true` if a segment with the given ports belongs to this
    /// connection.
    pub fn matches(&self, src_port: u16, dst_port: u16) -> bool {
        src_port == self.dst.port && dst_port == self.src.port
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}
