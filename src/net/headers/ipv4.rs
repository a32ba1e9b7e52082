use crate::net::checksum::internet_checksum;
use crate::{Error, HeaderError, ParseError};

/// IPv4 Datagram Header.
///
/// # Note
///
/// IPv4 options are not interpreted. When the IHL is greater than 5 the raw
/// option bytes are kept so the payload is located at the right offset and
/// the header can be re-serialized unchanged.
///
/// RFC 791 (3.1)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |   DSCP    |ECN|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Options                    |    Padding    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    /// The version field indicates the format of the internet header.
    ///
    /// Internet Header Length (IHL) is the length of the internet header in
    /// 32-bit words.
    version_ihl: u8,
    /// Differentiated Services Code Point (6 bits) followed by Explicit
    /// Congestion Notification (2 bits), formerly the type of service.
    dscp_ecn: u8,
    /// Total length is the length of the datagram, measured in octets,
    /// including internet header and payload.
    total_len: u16,
    /// An identifying value assigned by the sender to aid in assembling the
    /// fragments of a datagram.
    id: u16,
    /// Control flags:
    ///
    /// ```text
    ///      Bit 0: reserved, must be zero
    ///      Bit 1: (DF) 0 = May Fragment,  1 = Don't Fragment.
    ///      Bit 2: (MF) 0 = Last Fragment, 1 = More Fragments.
    ///
    ///          0   1   2
    ///        +---+---+---+
    ///        |   | D | M |
    ///        | 0 | F | F |
    ///        +---+---+---+
    /// ```
    ///
    /// Fragment offset indicates where in the datagram this fragment belongs,
    /// measured in units of 8 octets (64-bits).
    flags_and_offset: u16,
    /// Indicates the maximum time the datagram is allowed to remain in the
    /// internet system.
    ttl: u8,
    /// Indicates the next level protocol used in the data portion of the
    /// internet datagram.
    protocol: Protocol,
    /// A checksum on the header only.
    header_checksum: u16,
    /// The source address.
    src_addr: [u8; 4],
    /// The destination address.
    dst_addr: [u8; 4],
    /// Raw option bytes, a multiple of 4 bytes long.
    options: Vec<u8>,
}

impl Ipv4Header {
    /// Minimum length of an IPv4 header in bytes.
    pub const MIN_HEADER_LEN: u16 = 20;

    /// Maximum length of an IPv4 header in bytes.
    ///
    /// The IHL is a 4-bit field, so at most `0b1111` (15) words, or 60 bytes.
    pub const MAX_HEADER_LEN: u16 = 60;

    /// Maximum length of the IPv4 options in bytes.
    pub const MAX_OPTIONS_LEN: usize = (Self::MAX_HEADER_LEN - Self::MIN_HEADER_LEN) as usize;

    /// Minimum IHL of an IPv4 header.
    pub const MIN_IHL: u8 = 5;

    /// Byte offset of the header checksum field.
    const CHECKSUM_OFFSET: usize = 10;

    /// Creates a new IPv4 header with the specified source and destination
    /// addresses, payload length, TTL, and protocol, while setting default
    /// values for other fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the `payload_len` exceeds the maximum allowed
    /// payload length.
    pub fn new(
        src: [u8; 4],
        dst: [u8; 4],
        payload_len: usize,
        ttl: u8,
        protocol: Protocol,
    ) -> crate::Result<Self> {
        let mut header = Self {
            ttl,
            protocol,
            src_addr: src,
            dst_addr: dst,
            ..Default::default()
        };

        header.set_payload_len(payload_len)?;

        Ok(header)
    }

    /// Returns the `version` field of the IPv4 header.
    pub fn version(&self) -> u8 {
        // Stored in the higher 4 bits.
        self.version_ihl >> 4
    }

    /// Sets the `version` field of the IPv4 header.
    ///
    /// # Errors
    ///
    /// Returns an error if `version` does not fit in 4 bits.
    pub fn set_version(&mut self, version: u8) -> crate::Result<()> {
        check_width("version", version as u32, 4)?;
        self.version_ihl = (version << 4) | self.ihl();

        Ok(())
    }

    /// Returns the `IHL` field of the IPv4 header, specified in 32-bit words.
    ///
    /// To get the header length in bytes, use [Ipv4Header::header_len].
    pub fn ihl(&self) -> u8 {
        // Stored in the lower 4 bits.
        self.version_ihl & 0xF
    }

    /// Returns the `DSCP` field of the IPv4 header.
    pub fn dscp(&self) -> u8 {
        // Stored in the higher 6 bits.
        self.dscp_ecn >> 2
    }

    /// Sets the `DSCP` field of the IPv4 header.
    ///
    /// # Errors
    ///
    /// Returns an error if `dscp` does not fit in 6 bits.
    pub fn set_dscp(&mut self, dscp: u8) -> crate::Result<()> {
        check_width("dscp", dscp as u32, 6)?;
        self.dscp_ecn = (dscp << 2) | self.ecn();

        Ok(())
    }

    /// Returns the `ECN` field of the IPv4 header.
    pub fn ecn(&self) -> u8 {
        // Stored in the lower 2 bits.
        self.dscp_ecn & 0b11
    }

    /// Sets the `ECN` field of the IPv4 header.
    ///
    /// # Errors
    ///
    /// Returns an error if `ecn` does not fit in 2 bits.
    pub fn set_ecn(&mut self, ecn: u8) -> crate::Result<()> {
        check_width("ecn", ecn as u32, 2)?;
        self.dscp_ecn = (self.dscp_ecn & !0b11) | ecn;

        Ok(())
    }

    /// Returns the `total length` field of the IPv4 header.
    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// Sets the `total length` field of the IPv4 header given a payload length.
    ///
    /// # Errors
    ///
    /// Returns an error if the `payload_len` exceeds the maximum allowed
    /// payload length for the current header length.
    pub fn set_payload_len(&mut self, payload_len: usize) -> crate::Result<()> {
        let max = u16::MAX as usize - self.header_len();

        if payload_len > max {
            return Err(Error::Header(HeaderError::PayloadTooLarge {
                provided: payload_len,
                max,
            }));
        }

        self.total_len = (self.header_len() + payload_len) as u16;

        Ok(())
    }

    /// Returns the payload length described by the `total length` field.
    pub fn payload_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(self.header_len())
    }

    /// Returns the `identification` field of the IPv4 header.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Sets the `identification` field of the IPv4 header.
    pub fn set_id(&mut self, id: u16) {
        self.id = id;
    }

    /// Returns the 3-bit `flags` field of the IPv4 header.
    pub fn flags(&self) -> u8 {
        // Stored in the higher 3 bits.
        (self.flags_and_offset >> 13) as u8
    }

    /// Sets the 3-bit `flags` field of the IPv4 header.
    ///
    /// # Errors
    ///
    /// Returns an error if `flags` does not fit in 3 bits.
    pub fn set_flags(&mut self, flags: u8) -> crate::Result<()> {
        check_width("flags", flags as u32, 3)?;
        self.flags_and_offset = ((flags as u16) << 13) | self.fragment_offset();

        Ok(())
    }

    /// Returns `true` if the `DF` (Don't Fragment) bit is set in the IPv4
    /// header.
    pub fn dont_fragment(&self) -> bool {
        // Stored at the 14th bit.
        (self.flags_and_offset >> 14) & 1 == 1
    }

    /// Returns `true` if the `MF` (More Fragments) bit is set in the IPv4
    /// header.
    pub fn more_fragments(&self) -> bool {
        // Stored at the 13th bit.
        (self.flags_and_offset >> 13) & 1 == 1
    }

    /// Returns the `fragment offset` field of the IPv4 header.
    pub fn fragment_offset(&self) -> u16 {
        // Stored in the lower 13 bits.
        self.flags_and_offset & 0x1FFF
    }

    /// Sets the `fragment offset` field of the IPv4 header.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` does not fit in 13 bits.
    pub fn set_fragment_offset(&mut self, offset: u16) -> crate::Result<()> {
        check_width("fragment offset", offset as u32, 13)?;
        self.flags_and_offset = (self.flags_and_offset & !0x1FFF) | offset;

        Ok(())
    }

    /// Returns the `time to live` field of the IPv4 header.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Returns the `protocol` field of the IPv4 header.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the `header checksum` field of the IPv4 header.
    pub fn header_checksum(&self) -> u16 {
        self.header_checksum
    }

    /// Computes and updates the header checksum for the IPv4 header.
    pub fn set_header_checksum(&mut self) {
        self.header_checksum = self.compute_header_checksum();
    }

    /// Returns `true` if the IPv4 header checksum is valid.
    pub fn is_valid_checksum(&self) -> bool {
        self.header_checksum == self.compute_header_checksum()
    }

    /// Returns the `source address` field of the IPv4 header.
    pub fn src(&self) -> [u8; 4] {
        self.src_addr
    }

    /// Returns the `destination address` field of the IPv4 header.
    pub fn dst(&self) -> [u8; 4] {
        self.dst_addr
    }

    /// Returns the raw, uninterpreted option bytes of the IPv4 header.
    pub fn options(&self) -> &[u8] {
        &self.options
    }

    /// Replaces the raw option bytes, updating the IHL and keeping the current
    /// payload length.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are not a multiple of 4 bytes or exceed
    /// [Ipv4Header::MAX_OPTIONS_LEN], or if the resulting datagram would be
    /// too large.
    pub fn set_options(&mut self, options: Vec<u8>) -> crate::Result<()> {
        if options.len() % 4 != 0 || options.len() > Self::MAX_OPTIONS_LEN {
            return Err(Error::Header(HeaderError::InvalidOptionsLength {
                provided: options.len(),
                max: Self::MAX_OPTIONS_LEN,
            }));
        }

        let payload_len = self.payload_len();
        let previous = (self.version_ihl, std::mem::replace(&mut self.options, options));

        self.version_ihl = (self.version() << 4) | (Self::MIN_IHL + (self.options.len() >> 2) as u8);

        if let Err(err) = self.set_payload_len(payload_len) {
            (self.version_ihl, self.options) = previous;
            return Err(err);
        }

        Ok(())
    }

    /// Returns the length of the IPv4 header in bytes, including options.
    pub fn header_len(&self) -> usize {
        (self.ihl() as usize) << 2
    }

    /// Returns the payload carried by `datagram`, a buffer that starts with
    /// this header.
    ///
    /// The payload ends at the `total length` of the datagram, or at the end
    /// of the buffer if it is shorter.
    pub fn payload<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        let end = (self.total_len as usize).min(datagram.len());
        let start = self.header_len().min(end);

        &datagram[start..end]
    }

    /// Returns the computed checksum of the IPv4 header.
    ///
    /// The checksum field is the 16 bit one's complement of the one's
    /// complement sum of all 16 bit words in the header. For purposes of
    /// computing the checksum, the value of the checksum field is zero.
    pub fn compute_header_checksum(&self) -> u16 {
        let mut header_bytes = self.to_be_bytes();

        // Checksum field must be 0 for computation.
        header_bytes[Self::CHECKSUM_OFFSET] = 0x00;
        header_bytes[Self::CHECKSUM_OFFSET + 1] = 0x00;

        internet_checksum(&header_bytes)
    }

    /// Returns the memory representation of the IPv4 header, including
    /// options, in big-endian (network) byte order.
    ///
    /// The checksum field is written as currently stored.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut raw_header = vec![0u8; self.header_len()];

        raw_header[0] = self.version_ihl;
        raw_header[1] = self.dscp_ecn;
        raw_header[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        raw_header[4..6].copy_from_slice(&self.id.to_be_bytes());
        raw_header[6..8].copy_from_slice(&self.flags_and_offset.to_be_bytes());
        raw_header[8] = self.ttl;
        raw_header[9] = self.protocol.into();
        raw_header[10..12].copy_from_slice(&self.header_checksum.to_be_bytes());
        raw_header[12..16].copy_from_slice(&self.src_addr);
        raw_header[16..20].copy_from_slice(&self.dst_addr);
        raw_header[20..].copy_from_slice(&self.options);

        raw_header
    }

    /// Serializes the datagram: the header with a freshly computed checksum,
    /// followed by `payload`.
    ///
    /// The `total length` written is the header length plus the length of
    /// `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` is too large for an IPv4 datagram.
    pub fn encode(&self, payload: &[u8]) -> crate::Result<Vec<u8>> {
        let mut header = self.clone();
        header.set_payload_len(payload.len())?;
        header.header_checksum = 0;

        let mut datagram = header.to_be_bytes();

        let checksum = internet_checksum(&datagram);
        datagram[Self::CHECKSUM_OFFSET..Self::CHECKSUM_OFFSET + 2]
            .copy_from_slice(&checksum.to_be_bytes());

        datagram.extend_from_slice(payload);

        Ok(datagram)
    }

    /// Parses a whole datagram, returning the header and the payload slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed or the buffer is shorter
    /// than the `total length` it advertises.
    pub fn parse_datagram(datagram: &[u8]) -> crate::Result<(Self, &[u8])> {
        let header = Self::try_from(datagram)?;

        if datagram.len() < header.total_len as usize {
            return Err(Error::Parse(ParseError::TruncatedDatagram {
                provided: datagram.len(),
                expected: header.total_len,
            }));
        }

        let payload = header.payload(datagram);

        Ok((header, payload))
    }
}

impl TryFrom<&[u8]> for Ipv4Header {
    type Error = Error;

    fn try_from(header_raw: &[u8]) -> Result<Self, Self::Error> {
        if header_raw.len() < Self::MIN_HEADER_LEN as usize {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: header_raw.len(),
                min: Self::MIN_HEADER_LEN,
            }));
        }

        let version_ihl = header_raw[0];

        if (version_ihl >> 4) != 4 {
            return Err(Error::Parse(ParseError::InvalidVersion {
                provided: version_ihl >> 4,
                expected: 4,
            }));
        }

        let ihl = version_ihl & 0xF;

        if ihl < Self::MIN_IHL {
            return Err(Error::Parse(ParseError::InvalidIhl {
                provided: ihl,
                min: Self::MIN_IHL,
            }));
        }

        let header_len = (ihl as usize) << 2;

        // There are less bytes in the buffer than advertised by the IHL.
        if header_raw.len() < header_len {
            return Err(Error::Parse(ParseError::HeaderLengthMismatch {
                provided: header_raw.len(),
                expected: header_len as u16,
            }));
        }

        let total_len = u16::from_be_bytes([header_raw[2], header_raw[3]]);

        // Total length is less than the header length.
        if (total_len as usize) < header_len {
            return Err(Error::Parse(ParseError::InvalidTotalLength {
                provided: total_len,
                expected: header_len as u16,
            }));
        }

        Ok(Self {
            version_ihl,
            dscp_ecn: header_raw[1],
            total_len,
            id: u16::from_be_bytes([header_raw[4], header_raw[5]]),
            flags_and_offset: u16::from_be_bytes([header_raw[6], header_raw[7]]),
            ttl: header_raw[8],
            protocol: header_raw[9].into(),
            header_checksum: u16::from_be_bytes([header_raw[10], header_raw[11]]),
            src_addr: [
                header_raw[12],
                header_raw[13],
                header_raw[14],
                header_raw[15],
            ],
            dst_addr: [
                header_raw[16],
                header_raw[17],
                header_raw[18],
                header_raw[19],
            ],
            // Options are skipped, not interpreted.
            options: header_raw[Self::MIN_HEADER_LEN as usize..header_len].to_vec(),
        })
    }
}

impl Default for Ipv4Header {
    fn default() -> Self {
        Self {
            // Version = 4
            // IHL = 5
            version_ihl: 0b0100_0101,
            dscp_ecn: 0,
            id: 0,
            // Bit 0 = 0 (Reserved)
            // Bit 1 = 1 (Don't Fragment)
            // Bit 2 = 0 (Last Fragment)
            //
            // Fragment Offset = 0
            flags_and_offset: 0b010_0000000000000,
            header_checksum: 0,

            total_len: Self::MIN_HEADER_LEN,
            ttl: 0,
            protocol: Protocol::TCP,
            src_addr: [0; 4],
            dst_addr: [0; 4],
            options: Vec::new(),
        }
    }
}

fn check_width(field: &'static str, value: u32, bits: u8) -> crate::Result<()> {
    if value >> bits != 0 {
        return Err(Error::Header(HeaderError::FieldOutOfRange { field, value, bits }));
    }

    Ok(())
}

/// Assigned Internet Protocol Numbers (RFC 1700).
///
/// Only the numbers this crate cares about are named; every other value is
/// carried through unchanged as [Protocol::Other].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Protocol {
    /// Internet Control Message
    ICMP,
    /// Transmission Control
    TCP,
    /// User Datagram
    UDP,
    /// Any other protocol number.
    Other(u8),
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::ICMP => 1,
            Protocol::TCP => 6,
            Protocol::UDP => 17,
            Protocol::Other(val) => val,
        }
    }
}

impl From<u8> for Protocol {
    fn from(val: u8) -> Self {
        match val {
            1 => Protocol::ICMP,
            6 => Protocol::TCP,
            17 => Protocol::UDP,
            _ => Protocol::Other(val),
        }
    }
}
