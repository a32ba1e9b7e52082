//! TCP client over IPv4 in user-space, built for learning purposes, using the
//! TUN interface.
//!
//! A [`Connection`] performs the three-way handshake with a remote host, then
//! exposes a blocking byte-stream API: in-order delivery of received data,
//! FIFO transmission of written data, and an orderly FIN exchange on close.
//!
//! Not suitable for production use: there is no retransmission, congestion
//! control, or passive open.
//!
//! ```no_run
//! use std::io::Write;
//!
//! # #[cfg(target_os = "linux")]
//! # fn main() -> teacp::Result<()> {
//! let mut conn = teacp::Connection::dial("10.12.0.1", "10.12.0.2", 8080, teacp::Config::default())?;
//!
//! conn.write_all(b"hello")?;
//!
//! let mut buf = [0u8; 1024];
//! let nbytes = conn.read(&mut buf)?;
//! println!("{}", String::from_utf8_lossy(&buf[..nbytes]));
//!
//! conn.close()
//! # }
//! # #[cfg(not(target_os = "linux"))]
//! # fn main() {}
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod net;
#[cfg(target_os = "linux")]
pub mod tun_tap;

pub use config::Config;
pub use error::{AddrParseError, Error, HeaderError, ParseError, Result};
pub use net::{Connection, ConnectionState, Device, SocketAddr};
