//! Parsing and construction of the IPv4 and TCP headers.

mod ipv4;
mod tcp;

pub use ipv4::{Ipv4Header, Protocol};
pub use tcp::{Flag, TcpHeader};
