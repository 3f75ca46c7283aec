//! Decoders for installed application and memory records

use derive_more::Display;

use crate::error::{Error, Result};

const HASH_LENGTH: usize = 32;

/// One installed application as reported by the list command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    /// Application flags
    pub flags: u32,
    /// Hash over code and data
    pub code_data_hash: [u8; HASH_LENGTH],
    /// Full application hash, usable with delete-by-hash
    pub full_hash: [u8; HASH_LENGTH],
    /// Application name
    pub name: String,
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.offset + length;
        let slice = self
            .data
            .get(self.offset..end)
            .ok_or(Error::InvalidResponse("application record truncated"))?;
        self.offset = end;
        Ok(slice)
    }

    fn hash(&mut self) -> Result<[u8; HASH_LENGTH]> {
        let mut hash = [0u8; HASH_LENGTH];
        hash.copy_from_slice(self.take(HASH_LENGTH)?);
        Ok(hash)
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }
}

impl AppInfo {
    /// Decode every record in one list response
    ///
    /// Layout per record: `flags:u32 ‖ code_data_hash:32 ‖ full_hash:32 ‖
    /// name_len:u8 ‖ name`.
    pub fn parse_list(data: &[u8]) -> Result<Vec<Self>> {
        let mut cursor = Cursor { data, offset: 0 };
        let mut apps = Vec::new();

        while !cursor.is_empty() {
            let flags = cursor.take(4)?;
            let flags = u32::from_be_bytes([flags[0], flags[1], flags[2], flags[3]]);
            let code_data_hash = cursor.hash()?;
            let full_hash = cursor.hash()?;
            let name_length = cursor.take(1)?[0] as usize;
            let name = String::from_utf8_lossy(cursor.take(name_length)?).into_owned();
            apps.push(Self {
                flags,
                code_data_hash,
                full_hash,
                name,
            });
        }

        Ok(apps)
    }
}

/// Device memory usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(
    "system: {system_size}, applications: {applications_size}, free: {free_size}, slots: {used_app_slots}/{total_app_slots}"
)]
pub struct MemoryInfo {
    /// Bytes used by the OS
    pub system_size: u32,
    /// Bytes used by installed applications
    pub applications_size: u32,
    /// Bytes available
    pub free_size: u32,
    /// Application slots in use
    pub used_app_slots: u32,
    /// Application slots in total
    pub total_app_slots: u32,
}

impl MemoryInfo {
    /// Decode five big-endian u32 fields
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 20 {
            return Err(Error::InvalidResponse("memory info shorter than 20 bytes"));
        }
        let field = |i: usize| {
            u32::from_be_bytes([data[4 * i], data[4 * i + 1], data[4 * i + 2], data[4 * i + 3]])
        };
        Ok(Self {
            system_size: field(0),
            applications_size: field(1),
            free_size: field(2),
            used_app_slots: field(3),
            total_app_slots: field(4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn record(flags: u32, seed: u8, name: &str) -> Vec<u8> {
        let mut out = flags.to_be_bytes().to_vec();
        out.extend([seed; 32]);
        out.extend([seed.wrapping_add(1); 32]);
        out.push(name.len() as u8);
        out.extend(name.as_bytes());
        out
    }

    #[test]
    fn test_parse_list() {
        let data = [record(0x0000_0A50, 0x11, "Bitcoin"), record(0x800, 0x22, "Ethereum")].concat();
        let apps = AppInfo::parse_list(&data).unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].flags, 0xA50);
        assert_eq!(apps[0].code_data_hash, [0x11; 32]);
        assert_eq!(apps[0].full_hash, [0x12; 32]);
        assert_eq!(apps[1].name, "Ethereum");
        assert!(AppInfo::parse_list(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_record() {
        let mut data = record(0, 0x33, "Solana");
        data.pop();
        assert!(matches!(
            AppInfo::parse_list(&data),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_memory_info() {
        let info = MemoryInfo::from_bytes(&hex!(
            "00010000" "00020000" "00030000" "00000002" "0000001E"
        ))
        .unwrap();
        assert_eq!(info.system_size, 0x10000);
        assert_eq!(info.free_size, 0x30000);
        assert_eq!(info.total_app_slots, 30);
        assert!(info.to_string().ends_with("slots: 2/30"));
        assert!(MemoryInfo::from_bytes(&[0; 19]).is_err());
    }
}
