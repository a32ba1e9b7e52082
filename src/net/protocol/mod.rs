//! Minimal implementation of the Transmission Control Protocol (TCP).
//!
//! This module defines the connection state machine and the blocking
//! connection API for the active-open side of the protocol as described in
//! [RFC 793].
//!
//! [RFC 793]: https://www.rfc-editor.org/rfc/rfc793

mod connection;
mod fsm;
mod segment;
mod socket;

pub use connection::Connection;
pub use fsm::{ConnectionState, Delivery, Tcb};
pub use segment::TcpSegment;
pub use socket::{Socket, SocketAddr};
