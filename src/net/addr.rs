//! Conversions between dotted-quad IPv4 addresses, their 32-bit big-endian
//! integer form, and the raw octets stored in headers.

use std::fmt;

use crate::AddrParseError;

/// Parses a dotted-quad address (e.g. `10.12.0.1`) into its 32-bit
/// big-endian integer form.
///
/// # Errors
///
/// Returns an error if the address does not have exactly four components, or
/// if a component is not a decimal number in `0..=255`.
pub fn parse_ipv4(addr: &str) -> Result<u32, AddrParseError> {
    let components: Vec<&str> = addr.trim().split('.').collect();

    if components.len() != 4 {
        return Err(AddrParseError::ComponentCount {
            addr: addr.to_string(),
            found: components.len(),
        });
    }

    let mut value = 0u32;

    for component in components {
        // `u8::from_str` also accepts a leading `+`, which is not valid here.
        let octet = if !component.is_empty() && component.bytes().all(|b| b.is_ascii_digit()) {
            component.parse::<u8>().ok()
        } else {
            None
        };

        let Some(octet) = octet else {
            return Err(AddrParseError::InvalidComponent {
                addr: addr.to_string(),
                component: component.to_string(),
            });
        };

        value = (value << 8) | octet as u32;
    }

    Ok(value)
}

/// Formats a 32-bit big-endian address as a dotted quad.
pub fn format_ipv4(addr: u32) -> String {
    Ipv4(to_octets(addr)).to_string()
}

/// Returns the octets of a 32-bit big-endian address, in wire order.
pub fn to_octets(addr: u32) -> [u8; 4] {
    addr.to_be_bytes()
}

/// Returns the 32-bit big-endian address for octets in wire order.
pub fn from_octets(octets: [u8; 4]) -> u32 {
    u32::from_be_bytes(octets)
}

/// Displays raw address octets as a dotted quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4(pub [u8; 4]);

impl fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}
