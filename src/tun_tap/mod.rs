//! Linux TUN interface used as the [`Device`](crate::net::Device) of a
//! connection.
//!
//! A TUN device hands raw IP datagrams routed to it by the kernel to a user
//! space program, and injects the datagrams that program writes back into the
//! kernel's network stack, as if they had arrived on a point-to-point link.

mod tun;
pub use tun::Tun;
