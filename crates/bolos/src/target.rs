//! Device target identifiers

use std::str::FromStr;

use derive_more::Display;

use crate::error::{EncodingError, Error, Result};

/// Secure channel protocol family negotiated for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum ScpVersion {
    /// Single AES key, no MAC
    #[display("SCP v2")]
    V2,
    /// Derived encryption and MAC keys
    #[display("SCP v3")]
    V3,
}

/// 32-bit device model identifier
///
/// The low nibble selects the secure channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{_0:#010x}")]
pub struct TargetId(pub u32);

impl TargetId {
    /// Nano S
    pub const NANO_S: Self = Self(0x3110_0004);
    /// Nano S Plus
    pub const NANO_S_PLUS: Self = Self(0x3310_0004);
    /// Nano X
    pub const NANO_X: Self = Self(0x3300_0004);
    /// Stax
    pub const STAX: Self = Self(0x3320_0004);
    /// Flex
    pub const FLEX: Self = Self(0x3330_0004);

    const NAMED: [(&'static str, Self); 5] = [
        ("nanos", Self::NANO_S),
        ("nanosp", Self::NANO_S_PLUS),
        ("nanox", Self::NANO_X),
        ("stax", Self::STAX),
        ("flex", Self::FLEX),
    ];

    /// Raw value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Low nibble of the id
    pub const fn scp_family(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// Secure channel version for this target
    ///
    /// Fails for targets older than the v2 family.
    pub fn scp_version(self) -> Result<ScpVersion> {
        match self.scp_family() {
            0 | 1 => Err(Error::UnsupportedTarget(self.0)),
            2 => Ok(ScpVersion::V2),
            _ => Ok(ScpVersion::V3),
        }
    }

    /// Whether target id and version are part of the application hash
    pub const fn hashes_metadata(self) -> bool {
        self.scp_family() > 3
    }

    /// Big-endian encoding
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::NANO_S
    }
}

impl From<u32> for TargetId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for TargetId {
    type Err = EncodingError;

    /// Parse a known model name or a hex id with optional `0x` prefix
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let name = s.to_ascii_lowercase().replace([' ', '_', '-'], "");
        if let Some((_, target)) = Self::NAMED.iter().find(|(n, _)| *n == name) {
            return Ok(*target);
        }

        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u32::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| EncodingError::InvalidTarget(s.to_string()))
    }
}
