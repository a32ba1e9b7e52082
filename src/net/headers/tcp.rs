use crate::net::checksum::Checksum;
use crate::{Error, HeaderError, ParseError};

/// TCP Segment Header.
///
/// # Note
///
/// TCP options are not negotiated. When the data offset is greater than 5 the
/// raw option bytes are kept so the payload is located at the right offset
/// and the header can be re-serialized unchanged.
///
/// RFC 793 (3.1), RFC 3168 (ECE, CWR), RFC 3540 (NS)
///
/// ```text
///   0                   1                   2                   3
///     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |          Source Port          |       Destination Port        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                        Sequence Number                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Acknowledgment Number                      |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |  Data |     |N|C|E|U|A|P|R|S|F|                               |
///    | Offset| Rsv |S|W|C|R|C|S|S|Y|I|            Window             |
///    |       |     | |R|E|G|K|H|T|N|N|                               |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |           Checksum            |         Urgent Pointer        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Options                    |    Padding    |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                             data                              |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    /// The source port number.
    src_port: u16,
    /// The destination port number.
    dst_port: u16,
    /// The sequence number of the first data octet in this segment
    /// (except when SYN is present). If SYN is present the sequence number is
    /// the initial sequence number (ISN) and the first data octet is ISN+1.
    seq_number: u32,
    /// If the ACK control bit is set this field contains the value of the next
    /// sequence number the sender of the segment is expecting to receive.
    ack_number: u32,
    /// The data offset (4-bits) indicates the number of 32 bit words in the
    /// TCP Header.
    ///
    /// The remaining 12 bits hold the flags: 3 reserved bits followed by the
    /// 9 control bits addressed by [Flag].
    offset_and_flags: u16,
    /// The number of data octets beginning with the one indicated in the
    /// acknowledgment field which the sender of this segment is willing to
    /// accept.
    window: u16,
    /// The checksum field is the 16 bit one's complement of the one's
    /// complement sum of all 16 bit words in the header and text.
    ///
    /// The checksum also covers a 96 bit pseudo header conceptually prefixed
    /// to the TCP header and gives the TCP protection against misrouted
    /// segments.
    ///
    /// ```text
    ///        +--------+--------+--------+--------+
    ///        |           Source Address          |
    ///        +--------+--------+--------+--------+
    ///        |         Destination Address       |
    ///        +--------+--------+--------+--------+
    ///        |  zero  |  PTCL  |    TCP Length   |
    ///        +--------+--------+--------+--------+
    /// ```
    checksum: u16,
    /// This field communicates the current value of the urgent pointer as a
    /// positive offset from the sequence number in this segment.
    urgent_pointer: u16,
    /// Raw option bytes, a multiple of 4 bytes long.
    options: Vec<u8>,
}

impl TcpHeader {
    /// Minimum length of an TCP header in bytes.
    pub const MIN_HEADER_LEN: u16 = 20;

    /// Maximum length of an TCP header in bytes.
    ///
    /// The data offset is a 4-bit field, so at most `0b1111` (15) words, or
    /// 60 bytes.
    pub const MAX_HEADER_LEN: u16 = 60;

    /// Maximum length of the TCP options in bytes.
    pub const MAX_OPTIONS_LEN: usize = (Self::MAX_HEADER_LEN - Self::MIN_HEADER_LEN) as usize;

    /// Minimum data offset of a TCP header.
    pub const MIN_DATA_OFFSET: u8 = 5;

    /// Protocol number placed in the pseudo header.
    const PROTOCOL: u8 = 6;

    /// Byte offset of the checksum field.
    const CHECKSUM_OFFSET: usize = 16;

    /// Mask of the 12-bit flags field.
    const FLAGS_MASK: u16 = 0x0FFF;

    /// Creates a new TCP header with the specified source and destination
    /// ports, sequence number, and window size, while setting default values
    /// for other fields.
    pub fn new(src_port: u16, dst_port: u16, seq_number: u32, window: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_number,
            window,
            ..Default::default()
        }
    }

    /// Returns the `source port` field of the TCP header.
    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// Returns the `destination port` field of the TCP header.
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// Returns the `sequence number` field of the TCP header.
    pub fn seq_number(&self) -> u32 {
        self.seq_number
    }

    /// Returns the `acknowledgment number` field of the TCP header.
    pub fn ack_number(&self) -> u32 {
        self.ack_number
    }

    /// Sets the `acknowledgment number` field of the TCP header with the
    /// provided value.
    pub fn set_ack_number(&mut self, ack: u32) {
        self.ack_number = ack;
    }

    /// Returns the `data offset` field of the TCP header.
    ///
    /// To get the header length (including options) in bytes, use
    /// [TcpHeader::header_len].
    pub fn data_offset(&self) -> u8 {
        // Stored in the higher 4 bits.
        (self.offset_and_flags >> 12) as u8
    }

    /// Returns the raw 12-bit `flags` field of the TCP header.
    pub fn flags(&self) -> u16 {
        self.offset_and_flags & Self::FLAGS_MASK
    }

    /// Replaces the raw 12-bit `flags` field of the TCP header.
    ///
    /// # Errors
    ///
    /// Returns an error if `flags` does not fit in 12 bits.
    pub fn set_flags(&mut self, flags: u16) -> crate::Result<()> {
        if flags & !Self::FLAGS_MASK != 0 {
            return Err(Error::Header(HeaderError::FieldOutOfRange {
                field: "flags",
                value: flags as u32,
                bits: 12,
            }));
        }

        self.offset_and_flags = (self.offset_and_flags & !Self::FLAGS_MASK) | flags;

        Ok(())
    }

    /// Returns `true` if `flag` is set in the TCP header.
    pub fn has_flag(&self, flag: Flag) -> bool {
        (self.offset_and_flags >> flag as u8) & 1 == 1
    }

    /// Sets `flag` in the TCP header, leaving every other bit untouched.
    pub fn set_flag(&mut self, flag: Flag) {
        self.offset_and_flags |= 1 << flag as u8;
    }

    /// Clears `flag` in the TCP header, leaving every other bit untouched.
    pub fn clear_flag(&mut self, flag: Flag) {
        self.offset_and_flags &= !(1 << flag as u8);
    }

    /// Returns `true` if the URG (Urgent) control bit is set in the TCP header.
    pub fn urg(&self) -> bool {
        self.has_flag(Flag::URG)
    }

    /// Returns `true` if the ACK (Acknowledgment) control bit is set in the TCP
    /// header.
    pub fn ack(&self) -> bool {
        self.has_flag(Flag::ACK)
    }

    /// Sets the ACK (Acknowledgment) control bit in the TCP header, if not
    /// already set.
    pub fn set_ack(&mut self) {
        self.set_flag(Flag::ACK);
    }

    /// Returns `true` if the PSH (Push) control bit is set in the TCP header.
    pub fn psh(&self) -> bool {
        self.has_flag(Flag::PSH)
    }

    /// Sets the PSH (Push) control bit in the TCP header, if not already set.
    pub fn set_psh(&mut self) {
        self.set_flag(Flag::PSH);
    }

    /// Returns `true` if the RST (Reset) control bit is set in the TCP header.
    pub fn rst(&self) -> bool {
        self.has_flag(Flag::RST)
    }

    /// Returns `true` if the SYN (Synchronize) control bit is set in the TCP
    /// header.
    pub fn syn(&self) -> bool {
        self.has_flag(Flag::SYN)
    }

    /// Sets the SYN (Synchronize) control bit in the TCP header, if not already
    /// set.
    pub fn set_syn(&mut self) {
        self.set_flag(Flag::SYN);
    }

    /// Returns `true` if the FIN (Finish) control bit is set in the TCP header.
    pub fn fin(&self) -> bool {
        self.has_flag(Flag::FIN)
    }

    /// Sets the FIN (Finish) control bit in the TCP header, if not already set.
    pub fn set_fin(&mut self) {
        self.set_flag(Flag::FIN);
    }

    /// Returns the `window` field of the TCP header.
    pub fn window(&self) -> u16 {
        self.window
    }

    /// Returns the `checksum` field of the TCP header.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Returns `true` if the TCP header checksum is valid.
    pub fn is_valid_checksum(&self, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> bool {
        self.checksum == self.compute_checksum(src, dst, payload)
    }

    /// Returns the `urgent pointer` field of the TCP header.
    pub fn urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    /// Sets the `urgent pointer` field of the TCP header.
    pub fn set_urgent_pointer(&mut self, urgent_pointer: u16) {
        self.urgent_pointer = urgent_pointer;
    }

    /// Returns the raw, uninterpreted option bytes of the TCP header.
    pub fn options(&self) -> &[u8] {
        &self.options
    }

    /// Replaces the raw option bytes, updating the data offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are not a multiple of 4 bytes or exceed
    /// [TcpHeader::MAX_OPTIONS_LEN].
    pub fn set_options(&mut self, options: Vec<u8>) -> crate::Result<()> {
        if options.len() % 4 != 0 || options.len() > Self::MAX_OPTIONS_LEN {
            return Err(Error::Header(HeaderError::InvalidOptionsLength {
                provided: options.len(),
                max: Self::MAX_OPTIONS_LEN,
            }));
        }

        let data_offset = (Self::MIN_DATA_OFFSET as usize + (options.len() >> 2)) as u16;

        // Clear previous data offset value, keeping the flags.
        self.offset_and_flags = (data_offset << 12) | self.flags();
        self.options = options;

        Ok(())
    }

    /// Returns the Maximum Segment Size (MSS) carried in the options, if
    /// present.
    ///
    /// Options are otherwise not interpreted; a malformed option list simply
    /// yields `None`.
    pub fn mss(&self) -> Option<u16> {
        let mut opts = &self.options[..];

        while let Some((&kind, rest)) = opts.split_first() {
            match kind {
                // End of option list.
                0 => return None,
                // No-Operation.
                1 => opts = rest,
                _ => {
                    // ```text
                    //        +--------+--------+---------+--------+
                    //        |00000010|00000100|   max seg size   |
                    //        +--------+--------+---------+--------+
                    // ```
                    let len = *rest.first()? as usize;

                    if len < 2 || len > opts.len() {
                        return None;
                    }

                    if kind == 2 && len == 4 {
                        return Some(u16::from_be_bytes([opts[2], opts[3]]));
                    }

                    opts = &opts[len..];
                }
            }
        }

        None
    }

    /// Returns the length of the TCP header in bytes, including options.
    pub fn header_len(&self) -> usize {
        Self::MIN_HEADER_LEN as usize + self.options.len()
    }

    /// Returns the computed checksum of the TCP header.
    ///
    /// The checksum field is the 16 bit one's complement of the one's
    /// complement sum of all 16 bit words in the pseudo header, TCP header,
    /// and payload. For purposes of computing the checksum, the value of the
    /// checksum field is zero.
    pub fn compute_checksum(&self, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> u16 {
        let mut raw_header = self.to_be_bytes();

        // Checksum field must be 0 for computation.
        raw_header[Self::CHECKSUM_OFFSET] = 0x00;
        raw_header[Self::CHECKSUM_OFFSET + 1] = 0x00;

        let tcp_len = (raw_header.len() + payload.len()) as u16;

        Checksum::new()
            .add(&pseudo_header(src, dst, tcp_len))
            .add(&raw_header)
            .add(payload)
            .finish()
    }

    /// Returns the memory representation of the TCP header, including options,
    /// in big-endian (network) byte order.
    ///
    /// The checksum field is written as currently stored.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut raw_header = vec![0u8; self.header_len()];

        raw_header[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        raw_header[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        raw_header[4..8].copy_from_slice(&self.seq_number.to_be_bytes());
        raw_header[8..12].copy_from_slice(&self.ack_number.to_be_bytes());
        raw_header[12..14].copy_from_slice(&self.offset_and_flags.to_be_bytes());
        raw_header[14..16].copy_from_slice(&self.window.to_be_bytes());
        raw_header[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        raw_header[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());
        raw_header[20..].copy_from_slice(&self.options);

        raw_header
    }

    /// Serializes the segment: the header with a freshly computed checksum
    /// (bound to `src` and `dst` through the pseudo header), followed by
    /// `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment length does not fit the 16-bit TCP
    /// length of the pseudo header.
    pub fn encode(&self, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> crate::Result<Vec<u8>> {
        let max = u16::MAX as usize - self.header_len();

        if payload.len() > max {
            return Err(Error::Header(HeaderError::PayloadTooLarge {
                provided: payload.len(),
                max,
            }));
        }

        let mut segment = self.to_be_bytes();
        segment[Self::CHECKSUM_OFFSET] = 0x00;
        segment[Self::CHECKSUM_OFFSET + 1] = 0x00;
        segment.extend_from_slice(payload);

        let checksum = Checksum::new()
            .add(&pseudo_header(src, dst, segment.len() as u16))
            .add(&segment)
            .finish();

        segment[Self::CHECKSUM_OFFSET..Self::CHECKSUM_OFFSET + 2]
            .copy_from_slice(&checksum.to_be_bytes());

        Ok(segment)
    }
}

/// Builds the 96 bit pseudo header prefixed to a TCP segment for checksum
/// purposes.
fn pseudo_header(src: [u8; 4], dst: [u8; 4], tcp_len: u16) -> [u8; 12] {
    let mut pseudo_header = [0u8; 12];

    pseudo_header[0..4].copy_from_slice(&src);
    pseudo_header[4..8].copy_from_slice(&dst);
    pseudo_header[8] = 0;
    pseudo_header[9] = TcpHeader::PROTOCOL;
    pseudo_header[10..12].copy_from_slice(&tcp_len.to_be_bytes());

    pseudo_header
}

impl TryFrom<&[u8]> for TcpHeader {
    type Error = Error;

    fn try_from(header_raw: &[u8]) -> Result<Self, Self::Error> {
        if header_raw.len() < Self::MIN_HEADER_LEN as usize {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: header_raw.len(),
                min: Self::MIN_HEADER_LEN,
            }));
        }

        let offset_and_flags = u16::from_be_bytes([header_raw[12], header_raw[13]]);
        let data_offset = (offset_and_flags >> 12) as u8;

        if data_offset < Self::MIN_DATA_OFFSET {
            return Err(Error::Parse(ParseError::InvalidDataOffset {
                provided: data_offset,
                min: Self::MIN_DATA_OFFSET,
            }));
        }

        let header_len = (data_offset as usize) << 2;

        // There are less bytes in the buffer than advertised by data offset.
        if header_raw.len() < header_len {
            return Err(Error::Parse(ParseError::HeaderLengthMismatch {
                provided: header_raw.len(),
                expected: header_len as u16,
            }));
        }

        Ok(Self {
            src_port: u16::from_be_bytes([header_raw[0], header_raw[1]]),
            dst_port: u16::from_be_bytes([header_raw[2], header_raw[3]]),
            seq_number: u32::from_be_bytes([
                header_raw[4],
                header_raw[5],
                header_raw[6],
                header_raw[7],
            ]),
            ack_number: u32::from_be_bytes([
                header_raw[8],
                header_raw[9],
                header_raw[10],
                header_raw[11],
            ]),
            offset_and_flags,
            window: u16::from_be_bytes([header_raw[14], header_raw[15]]),
            checksum: u16::from_be_bytes([header_raw[16], header_raw[17]]),
            urgent_pointer: u16::from_be_bytes([header_raw[18], header_raw[19]]),
            // Limit range to data offset so payload bytes are not
            // accidentally read as options.
            options: header_raw[Self::MIN_HEADER_LEN as usize..header_len].to_vec(),
        })
    }
}

impl Default for TcpHeader {
    fn default() -> Self {
        Self {
            ack_number: 0,
            // Bits 0..4 (Data Offset) = 5
            //
            // Bits 4..7 (Reserved) = 0
            //
            // Bits 7..16 (NS, CWR, ECE, URG, ACK, PSH, RST, SYN, FIN) = 0
            offset_and_flags: 0b0101_000_000000000,
            checksum: 0,
            urgent_pointer: 0,
            options: Vec::new(),

            src_port: 0,
            dst_port: 0,
            seq_number: 0,
            window: 0,
        }
    }
}

/// The meaningful control bits of the TCP flags field, by bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)]
pub enum Flag {
    /// No more data from sender.
    FIN = 0,
    /// Synchronize sequence numbers.
    SYN = 1,
    /// Reset the connection.
    RST = 2,
    /// Push Function.
    PSH = 3,
    /// Acknowledgment field significant.
    ACK = 4,
    /// Urgent Pointer field significant.
    URG = 5,
    /// ECN-Echo.
    ECE = 6,
    /// Congestion Window Reduced.
    CWR = 7,
    /// ECN-nonce concealment protection.
    NS = 8,
}

impl Flag {
    /// Every flag, in bit order.
    pub const ALL: [Flag; 9] = [
        Flag::FIN,
        Flag::SYN,
        Flag::RST,
        Flag::PSH,
        Flag::ACK,
        Flag::URG,
        Flag::ECE,
        Flag::CWR,
        Flag::NS,
    ];
}
