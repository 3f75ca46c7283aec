//! CRC-16/CCITT as checked by the loader after each segment
//!
//! Polynomial 0x1021, initial value 0xFFFF, MSB first, no final XOR.

use crc::{CRC_16_IBM_3740, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC-16/CCITT of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_single_bit_flip() {
        let data: Vec<u8> = (0..=255u8).collect();
        let reference = crc16(&data);
        for i in [0, 17, 128, 255] {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[i] ^= 1 << bit;
                assert_ne!(crc16(&flipped), reference, "byte {i} bit {bit}");
            }
        }
    }
}
