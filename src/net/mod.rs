//! Minimal networking primitives for TCP communication over IPv4.
//!
//! Headers are parsed and built in [`headers`], framed onto a [`device`] by
//! the [`transport`], and driven by the state machine in [`protocol`].

pub mod addr;
pub mod checksum;
pub mod device;
pub mod headers;
pub mod protocol;
pub mod transport;

pub use device::Device;
pub use protocol::{Connection, ConnectionState, SocketAddr};
