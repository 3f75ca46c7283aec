//! APDU command definitions
//!
//! BOLOS devices only speak short APDUs: a four byte header followed by a
//! one byte `Lc` and at most 255 bytes of data. `Lc` is always present,
//! even for empty payloads.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::transport::TransportError;

/// Maximum payload carried by a short APDU
pub const MAX_SHORT_PAYLOAD: usize = 0xFF;

/// Length of the command header including `Lc`
pub const HEADER_LENGTH: usize = 5;

/// Generic APDU command structure
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data, possibly empty
    pub data: Bytes,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: data.into(),
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = data.into();
        self
    }

    /// Serialized length of the command
    pub fn command_length(&self) -> usize {
        HEADER_LENGTH + self.data.len()
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Result<Bytes, TransportError> {
        if self.data.len() > MAX_SHORT_PAYLOAD {
            return Err(TransportError::CommandTooLong(self.data.len()));
        }

        let mut buffer = BytesMut::with_capacity(self.command_length());
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);
        buffer.put_u8(self.data.len() as u8);
        buffer.put_slice(&self.data);

        Ok(buffer.freeze())
    }

    /// Parse a command from raw bytes
    ///
    /// A bare four byte header is accepted and yields an empty payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        if data.len() < 4 {
            return Err(TransportError::InvalidCommand(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        if data.len() == 4 {
            return Ok(command);
        }

        let lc = data[4] as usize;
        if data.len() != HEADER_LENGTH + lc {
            return Err(TransportError::InvalidCommand(data.len()));
        }
        command.data = Bytes::copy_from_slice(&data[HEADER_LENGTH..]);

        Ok(command)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("cla", &format_args!("{:#04x}", self.cla))
            .field("ins", &format_args!("{:#04x}", self.ins))
            .field("p1", &format_args!("{:#04x}", self.p1))
            .field("p2", &format_args!("{:#04x}", self.p2))
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let cmd = Command::new_with_data(0xE0, 0x04, 0x00, 0x00, hex!("33100004").to_vec());
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), hex!("E00400000433100004"));
    }

    #[test]
    fn test_empty_command_keeps_lc() {
        let cmd = Command::new(0xE0, 0x52, 0x80, 0x00);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), hex!("E052800000"));
        assert_eq!(cmd.command_length(), 5);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let cmd = Command::new_with_data(0xE0, 0x00, 0x00, 0x00, vec![0u8; 256]);
        assert!(matches!(
            cmd.to_bytes(),
            Err(TransportError::CommandTooLong(256))
        ));
    }

    #[test]
    fn test_command_from_bytes() {
        let cmd = Command::from_bytes(&hex!("E0500000080102030405060708")).unwrap();
        assert_eq!(cmd.cla, 0xE0);
        assert_eq!(cmd.ins, 0x50);
        assert_eq!(cmd.data.as_ref(), hex!("0102030405060708"));

        let cmd = Command::from_bytes(&hex!("E0530000")).unwrap();
        assert!(cmd.data.is_empty());

        assert!(Command::from_bytes(&hex!("E050")).is_err());
        // Lc disagrees with the remaining bytes
        assert!(Command::from_bytes(&hex!("E050000004AABB")).is_err());
    }
}
