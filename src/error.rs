//! Error types for TCP over IPv4, covering header parsing and construction,
//! device I/O, and connection-level conditions.

use std::{io, result};

use thiserror::Error;

/// Creates a [`crate::Error::Io`] with a custom message prefixed to the current
/// `errno` value.
#[cfg(target_os = "linux")]
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        let msg = format!("{prefix}: {errno}");
        $crate::Error::Io(::std::io::Error::new(errno.kind(), msg))
    }};
}
#[cfg(target_os = "linux")]
pub(crate) use errno;

/// A convenience wrapper around `Result` for [`crate::Error`].
pub type Result<T> = result::Result<T, Error>;

/// Set of errors that can occur while exchanging TCP segments.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error while reading from or writing to the virtual device.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Error parsing an IPv4 datagram or TCP segment.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Error creating or serializing an IPv4 or TCP header.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// Error parsing a dotted-quad IPv4 address.
    #[error(transparent)]
    Addr(#[from] AddrParseError),
    /// The device did not become readable within the configured bound.
    #[error("timed out waiting for the device")]
    TimedOut,
    /// The peer did not answer the SYN with a SYN+ACK.
    #[error("connection refused")]
    ConnectionRefused,
    /// The peer reset the connection.
    #[error("connection reset by peer")]
    ConnectionReset,
    /// The connection was closed locally.
    #[error("connection closed")]
    ConnectionClosed,
    /// A worker task gave up after repeated device failures.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

impl Error {
    /// Returns `true` if the error means the connection can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Error::ConnectionRefused
                | Error::ConnectionReset
                | Error::ConnectionClosed
                | Error::ConnectionFailed(_)
        )
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(err) => err,
            Error::TimedOut => io::Error::new(io::ErrorKind::TimedOut, err),
            Error::ConnectionRefused => io::Error::new(io::ErrorKind::ConnectionRefused, err),
            Error::ConnectionReset => io::Error::new(io::ErrorKind::ConnectionReset, err),
            Error::ConnectionClosed => io::Error::new(io::ErrorKind::NotConnected, err),
            Error::ConnectionFailed(_) => io::Error::new(io::ErrorKind::BrokenPipe, err),
            Error::Parse(_) | Error::Header(_) | Error::Addr(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
        }
    }
}

/// Error occurred while trying to parse an IPv4 datagram or TCP segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ParseError {
    /// Input buffer shorter than the fixed part of an IPv4/TCP header.
    #[error("invalid header length: {provided} bytes (less than minimum required {min} bytes)")]
    InvalidBufferLength { provided: usize, min: u16 },
    /// Invalid IPv4 version.
    #[error("invalid IP version: IPv{provided} (must be IPv{expected})")]
    InvalidVersion { provided: u8, expected: u8 },
    /// Invalid IPv4 IHL.
    #[error("invalid IPv4 IHL: {provided} (less than minimum {min})")]
    InvalidIhl { provided: u8, min: u8 },
    /// Invalid IPv4 total length.
    ///
    /// Value provided is less than `IHL << 2`.
    #[error(
        "invalid IPv4 total length: {provided} bytes (less than indicated by IHL: {expected} bytes)"
    )]
    InvalidTotalLength { provided: u16, expected: u16 },
    /// The buffer ends before the length advertised by the IPv4 total length.
    #[error("truncated IPv4 datagram: {provided} bytes (total length indicates {expected} bytes)")]
    TruncatedDatagram { provided: usize, expected: u16 },
    /// Invalid TCP data offset.
    #[error("invalid TCP data offset: {provided} (less than minimum {min})")]
    InvalidDataOffset { provided: u8, min: u8 },
    /// Mismatch between the provided and expected header length, including
    /// options.
    ///
    /// Value provided is less than `IHL << 2` or `data_offset << 2`.
    #[error(
        "invalid header length: {provided} bytes (less than indicated by the header: {expected} bytes)"
    )]
    HeaderLengthMismatch { provided: usize, expected: u16 },
}

/// Error occurred while trying to create or serialize an IPv4 or TCP header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum HeaderError {
    /// Payload too large to be described by the IPv4 total length.
    #[error("payload too large: {provided} bytes (exceeds maximum allowed {max} bytes)")]
    PayloadTooLarge { provided: usize, max: usize },
    /// Options not a multiple of 4 bytes, or longer than 40 bytes.
    #[error("invalid options length: {provided} bytes (must be a multiple of 4, at most {max})")]
    InvalidOptionsLength { provided: usize, max: usize },
    /// A bit-packed field was given a value wider than its width.
    #[error("value {value} does not fit in the {bits}-bit `{field}` field")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        bits: u8,
    },
}

/// Error occurred while parsing a dotted-quad IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum AddrParseError {
    /// The address does not have exactly four components.
    #[error("invalid IPv4 address `{addr}`: expected 4 components, found {found}")]
    ComponentCount { addr: String, found: usize },
    /// A component is not a decimal number in the 0..=255 range.
    #[error("invalid IPv4 address `{addr}`: component `{component}` is not in 0..=255")]
    InvalidComponent { addr: String, component: String },
}
