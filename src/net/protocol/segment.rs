//! Construction and serialization of TCP segments.

use std::fmt;

use crate::Result;
use crate::net::headers::{Flag, TcpHeader};

/// A TCP header together with the data it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    /// TCP header of the segment.
    pub tcp: TcpHeader,
    /// Payload of the segment.
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Create a new TCP segment given the TCP header and payload.
    pub fn new(tcp: TcpHeader, payload: &[u8]) -> Self {
        Self {
            tcp,
            payload: payload.into(),
        }
    }

    /// Parses a segment from the TCP bytes of a datagram.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let tcp = TcpHeader::try_from(bytes)?;
        let payload = bytes[tcp.header_len()..].to_vec();

        Ok(Self { tcp, payload })
    }

    /// Serializes the segment with its checksum bound to `src` and `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is too large.
    pub fn encode(&self, src: [u8; 4], dst: [u8; 4]) -> Result<Vec<u8>> {
        self.tcp.encode(src, dst, &self.payload)
    }

    /// Returns `true` if the checksum is valid for the given endpoints.
    pub fn is_valid_checksum(&self, src: [u8; 4], dst: [u8; 4]) -> bool {
        self.tcp.is_valid_checksum(src, dst, &self.payload)
    }

    /// Returns the amount of sequence space the segment occupies: the payload
    /// plus one for each of SYN and FIN.
    pub fn seq_len(&self) -> u32 {
        self.payload.len() as u32 + self.tcp.syn() as u32 + self.tcp.fin() as u32
    }
}

impl fmt::Display for TcpSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<SEQ={}><ACK={}><CTL=",
            self.tcp.seq_number(),
            self.tcp.ack_number()
        )?;

        let mut first = true;

        for flag in Flag::ALL.into_iter().rev() {
            if self.tcp.has_flag(flag) {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{flag:?}")?;
                first = false;
            }
        }

        write!(f, "><WND={}><LEN={}>", self.tcp.window(), self.payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_header_and_payload() {
        let mut tcp = TcpHeader::new(8080, 40000, 1000, 512);
        tcp.set_ack();
        tcp.set_ack_number(501);
        tcp.set_options(vec![0x02, 0x04, 0x05, 0xb4]).unwrap();

        let segment = TcpSegment::new(tcp, b"hello");
        let bytes = segment.encode([10, 12, 0, 1], [10, 12, 0, 2]).unwrap();
        let decoded = TcpSegment::decode(&bytes).unwrap();

        assert_eq!(decoded.payload, b"hello");
        assert_eq!(decoded.tcp.options(), &[0x02, 0x04, 0x05, 0xb4]);
        assert!(decoded.is_valid_checksum([10, 12, 0, 1], [10, 12, 0, 2]));
        assert_eq!(decoded.seq_len(), 5);
    }

    #[test]
    fn display_lists_control_bits() {
        let mut tcp = TcpHeader::new(1, 2, 7, 100);
        tcp.set_syn();
        tcp.set_ack();
        tcp.set_ack_number(9);

        let segment = TcpSegment::new(tcp, &[]);

        assert_eq!(
            segment.to_string(),
            "<SEQ=7><ACK=9><CTL=ACK,SYN><WND=100><LEN=0>"
        );
        assert_eq!(segment.seq_len(), 1);
    }
}
