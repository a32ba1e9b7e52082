//! The Internet checksum (RFC 1071) shared by the IPv4 and TCP headers.

/// Accumulates the one's complement sum of big-endian 16-bit words, folding
/// carries as it goes.
///
/// An odd trailing byte is buffered until the next chunk is added (or
/// [`Checksum::finish`] is called, which pads it on the right with zero), so
/// discontiguous slices like the TCP pseudo-header, header and payload can be
/// summed without concatenating them first.
#[derive(Debug, Default, Clone, Copy)]
pub struct Checksum {
    sum: u32,
    odd: Option<u8>,
}

impl Checksum {
    /// Creates an empty checksum accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk of bytes to the running sum.
    pub fn add(&mut self, mut bytes: &[u8]) -> &mut Self {
        if let Some(hi) = self.odd.take() {
            match bytes.split_first() {
                Some((lo, rest)) => {
                    self.add_word(u16::from_be_bytes([hi, *lo]));
                    bytes = rest;
                }
                None => {
                    self.odd = Some(hi);
                    return self;
                }
            }
        }

        let mut words = bytes.chunks_exact(2);
        for word in &mut words {
            self.add_word(u16::from_be_bytes([word[0], word[1]]));
        }

        if let [last] = words.remainder() {
            self.odd = Some(*last);
        }

        self
    }

    /// Returns the one's complement of the folded sum.
    pub fn finish(&self) -> u16 {
        let mut sum = self.sum;

        // If the data contains an odd number of octets, the last octet is
        // padded on the right with zeros to form a 16 bit word.
        if let Some(hi) = self.odd {
            sum += u16::from_be_bytes([hi, 0x00]) as u32;
        }

        // Handle any remaining overflow with carry folding.
        while sum > 0xFFFF {
            // Adds the higher 16-bits to the lower 16-bits.
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        !(sum as u16)
    }

    fn add_word(&mut self, word: u16) {
        self.sum += word as u32;

        // Handle potential overflow with carry folding.
        if self.sum > 0xFFFF {
            self.sum = (self.sum & 0xFFFF) + (self.sum >> 16);
        }
    }
}

/// Computes the 16-bit one's complement of the one's complement sum of all
/// 16-bit words in `bytes`.
///
/// Applied to a buffer that already carries a correct checksum, the result is
/// zero.
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    Checksum::new().add(bytes).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_example() {
        // RFC 1071 (3): the one's complement sum of these words is 0xDDF2.
        let bytes = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&bytes), !0xDDF2);
    }

    #[test]
    fn known_ipv4_header() {
        let header: [u8; 20] = [
            0x45, 0x00, 0x00, 0x3c, 0xbe, 0xfa, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0x2c,
        ];

        assert_eq!(internet_checksum(&header), 0xFA43);
    }

    #[test]
    fn patched_buffer_sums_to_zero() {
        let mut header: [u8; 20] = [
            0x45, 0x00, 0x00, 0x3c, 0xbe, 0xfa, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0x2c,
        ];

        let sum = internet_checksum(&header);
        header[10..12].copy_from_slice(&sum.to_be_bytes());

        assert_eq!(internet_checksum(&header), 0);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        assert_eq!(internet_checksum(&[0xAB]), internet_checksum(&[0xAB, 0x00]));
        assert_eq!(
            internet_checksum(&[0x12, 0x34, 0x56]),
            internet_checksum(&[0x12, 0x34, 0x56, 0x00])
        );
    }

    #[test]
    fn chunked_matches_contiguous() {
        let bytes: Vec<u8> = (0u8..=200).collect();

        for split in [0, 1, 7, 8, 99, 200] {
            let (a, b) = bytes.split_at(split);
            let chunked = Checksum::new().add(a).add(b).finish();
            assert_eq!(chunked, internet_checksum(&bytes), "split at {split}");
        }

        let chunked = Checksum::new()
            .add(&bytes[..3])
            .add(&[])
            .add(&bytes[3..5])
            .add(&bytes[5..])
            .finish();
        assert_eq!(chunked, internet_checksum(&bytes));
    }

    #[test]
    fn carries_are_folded() {
        let bytes = [0xFF; 64];
        // Sum of 0xFFFF words folds back to 0xFFFF, complement is 0.
        assert_eq!(internet_checksum(&bytes), 0x0000);
    }
}
