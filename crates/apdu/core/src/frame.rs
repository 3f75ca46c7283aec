//! HID frame codec
//!
//! APDUs travel to the device as a sequence of fixed-size link packets.
//! Every packet starts with an optional 2-byte channel id, the tag `0x05`
//! and a big-endian 2-byte sequence number counting from zero. The first
//! packet additionally carries the big-endian 2-byte total message length.
//!
//! ```text
//! first:        [channel(2)] 05 seq(2) len(2) payload...
//! continuation: [channel(2)] 05 seq(2) payload...
//! ```
//!
//! Channel-addressed transports (HID) zero-pad the final packet to the full
//! packet size; single-channel transports send it short.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Tag byte identifying an APDU frame
pub const TAG_APDU: u8 = 0x05;

/// Channel id used by HID transports
pub const HID_CHANNEL: u16 = 0x0101;

/// HID report size
pub const HID_PACKET_SIZE: usize = 64;

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Packet size cannot carry a header plus payload
    #[error("Can't handle framing with {actual} bytes per packet (need at least {minimum})")]
    PacketSizeTooSmall {
        /// Smallest usable packet size for this codec
        minimum: usize,
        /// Requested packet size
        actual: usize,
    },

    /// Message length does not fit the 2-byte length field
    #[error("Message too long for framing: {0} bytes")]
    MessageTooLong(usize),

    /// Packet addressed to a different channel
    #[error("Invalid channel: expected {expected:#06x}, got {actual:#06x}")]
    InvalidChannel {
        /// Channel this codec expects
        expected: u16,
        /// Channel found in the packet
        actual: u16,
    },

    /// Packet tag is not [`TAG_APDU`]
    #[error("Invalid tag: {0:#04x}")]
    InvalidTag(u8),

    /// Packet arrived out of order
    #[error("Invalid sequence: expected {expected}, got {actual}")]
    InvalidSequence {
        /// Next sequence number expected
        expected: u16,
        /// Sequence number found in the packet
        actual: u16,
    },
}

/// Splits APDUs into link packets and reassembles responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    channel: Option<u16>,
    packet_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::hid()
    }
}

impl FrameCodec {
    /// Codec for HID transports: channel 0x0101, 64 byte packets
    pub const fn hid() -> Self {
        Self {
            channel: Some(HID_CHANNEL),
            packet_size: HID_PACKET_SIZE,
        }
    }

    /// Create a codec for the given channel and packet size
    ///
    /// `None` selects single-channel framing without the channel prefix.
    pub const fn new(channel: Option<u16>, packet_size: usize) -> Result<Self, FrameError> {
        let codec = Self {
            channel,
            packet_size,
        };

        // the first packet must carry at least one payload byte
        let minimum = codec.first_header_len() + 1;
        if packet_size < minimum {
            return Err(FrameError::PacketSizeTooSmall {
                minimum,
                actual: packet_size,
            });
        }

        Ok(codec)
    }

    /// Channel id, if the transport is channel addressed
    pub const fn channel(&self) -> Option<u16> {
        self.channel
    }

    /// Link packet size
    pub const fn packet_size(&self) -> usize {
        self.packet_size
    }

    const fn header_len(&self) -> usize {
        if self.channel.is_some() { 5 } else { 3 }
    }

    const fn first_header_len(&self) -> usize {
        self.header_len() + 2
    }

    fn put_header(&self, packet: &mut BytesMut, sequence: u16) {
        if let Some(channel) = self.channel {
            packet.put_u16(channel);
        }
        packet.put_u8(TAG_APDU);
        packet.put_u16(sequence);
    }

    /// Split an APDU into an ordered list of link packets
    pub fn wrap(&self, apdu: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        if apdu.len() > u16::MAX as usize {
            return Err(FrameError::MessageTooLong(apdu.len()));
        }

        let mut packets = Vec::new();
        let mut offset = 0;
        let mut sequence = 0u16;

        loop {
            let mut packet = BytesMut::with_capacity(self.packet_size);
            self.put_header(&mut packet, sequence);
            if sequence == 0 {
                packet.put_u16(apdu.len() as u16);
            }

            let block = (self.packet_size - packet.len()).min(apdu.len() - offset);
            packet.put_slice(&apdu[offset..offset + block]);
            offset += block;

            if self.channel.is_some() {
                packet.resize(self.packet_size, 0);
            }
            packets.push(packet.freeze());

            if offset >= apdu.len() {
                break;
            }
            sequence += 1;
        }

        Ok(packets)
    }

    /// Check a packet header at `offset` and return the offset past it
    fn check_header(&self, data: &[u8], offset: usize, sequence: u16) -> Result<usize, FrameError> {
        let mut offset = offset;

        if let Some(expected) = self.channel {
            let actual = u16::from_be_bytes([data[offset], data[offset + 1]]);
            if actual != expected {
                return Err(FrameError::InvalidChannel { expected, actual });
            }
            offset += 2;
        }

        if data[offset] != TAG_APDU {
            return Err(FrameError::InvalidTag(data[offset]));
        }
        offset += 1;

        let actual = u16::from_be_bytes([data[offset], data[offset + 1]]);
        if actual != sequence {
            return Err(FrameError::InvalidSequence {
                expected: sequence,
                actual,
            });
        }

        Ok(offset + 2)
    }

    /// Reassemble a response from the packets accumulated so far
    ///
    /// Returns `Ok(None)` while more packets are required.
    pub fn unwrap(&self, data: &[u8]) -> Result<Option<Bytes>, FrameError> {
        if data.len() < self.first_header_len() {
            return Ok(None);
        }

        let mut offset = self.check_header(data, 0, 0)?;
        let total = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
        offset += 2;

        let mut response = BytesMut::with_capacity(total);
        let mut room = self.packet_size - self.first_header_len();
        let mut sequence = 0u16;

        loop {
            let block = (total - response.len()).min(room);
            if data.len() < offset + block {
                return Ok(None);
            }
            response.put_slice(&data[offset..offset + block]);
            offset += block;

            if response.len() == total {
                break;
            }

            sequence += 1;
            if data.len() < offset + self.header_len() {
                return Ok(None);
            }
            offset = self.check_header(data, offset, sequence)?;
            room = self.packet_size - self.header_len();
        }

        Ok(Some(response.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn concat(packets: &[Bytes]) -> Vec<u8> {
        packets.iter().flat_map(|p| p.iter().copied()).collect()
    }

    #[test]
    fn test_first_packet_layout() {
        let codec = FrameCodec::hid();
        let packets = codec.wrap(&hex!("E001000000")).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), HID_PACKET_SIZE);
        assert_eq!(&packets[0][..12], hex!("0101050000" "0005" "E001000000"));
        assert!(packets[0][12..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_continuation_packets() {
        let codec = FrameCodec::hid();
        // 57 bytes fit the first packet, 59 in each continuation
        let apdu: Vec<u8> = (0..120u8).collect();
        let packets = codec.wrap(&apdu).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(&packets[1][..5], hex!("0101050001"));
        assert_eq!(packets[1][5], 57);
        assert_eq!(&packets[2][..5], hex!("0101050002"));
        assert!(packets.iter().all(|p| p.len() == HID_PACKET_SIZE));
    }

    #[test]
    fn test_round_trip_sizes() {
        for codec in [FrameCodec::hid(), FrameCodec::new(None, 20).unwrap()] {
            let size = codec.packet_size();
            for len in [0, 1, size - 8, size, 10 * size + 3] {
                let apdu: Vec<u8> = (0..len).map(|i| i as u8).collect();
                let wire = concat(&codec.wrap(&apdu).unwrap());
                let decoded = codec.unwrap(&wire).unwrap().unwrap();
                assert_eq!(decoded.as_ref(), apdu.as_slice(), "length {len}");
            }
        }
    }

    #[test]
    fn test_unwrap_needs_more_data() {
        let codec = FrameCodec::hid();
        let apdu = vec![0xAB; 200];
        let packets = codec.wrap(&apdu).unwrap();

        let mut buffer = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            buffer.extend_from_slice(packet);
            let result = codec.unwrap(&buffer).unwrap();
            if i + 1 < packets.len() {
                assert!(result.is_none());
            } else {
                assert_eq!(result.unwrap().as_ref(), apdu.as_slice());
            }
        }

        assert!(codec.unwrap(&[0x01, 0x01]).unwrap().is_none());
    }

    #[test]
    fn test_unwrap_rejects_bad_headers() {
        let codec = FrameCodec::hid();

        let mut wire = concat(&codec.wrap(&hex!("9000")).unwrap());
        wire[1] = 0x02;
        assert_eq!(
            codec.unwrap(&wire),
            Err(FrameError::InvalidChannel {
                expected: 0x0101,
                actual: 0x0102
            })
        );

        let mut wire = concat(&codec.wrap(&hex!("9000")).unwrap());
        wire[2] = 0x02;
        assert_eq!(codec.unwrap(&wire), Err(FrameError::InvalidTag(0x02)));

        let mut wire = concat(&codec.wrap(&[0x55; 100]).unwrap());
        wire[HID_PACKET_SIZE + 4] = 0x05;
        assert_eq!(
            codec.unwrap(&wire),
            Err(FrameError::InvalidSequence {
                expected: 1,
                actual: 5
            })
        );
    }

    #[test]
    fn test_packet_size_limits() {
        assert!(matches!(
            FrameCodec::new(Some(HID_CHANNEL), 2),
            Err(FrameError::PacketSizeTooSmall { minimum: 8, actual: 2 })
        ));
        assert!(FrameCodec::new(None, 6).is_ok());
        assert_eq!(
            FrameCodec::hid().wrap(&vec![0; 0x10000]),
            Err(FrameError::MessageTooLong(0x10000))
        );
    }
}
