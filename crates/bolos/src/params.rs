//! Install parameters
//!
//! Application metadata travels to the device as a TLV blob appended to the
//! memory image. Lengths use a short form below 128 and `0x81`/`0x82`
//! prefixed long forms up to 65535.

use std::str::FromStr;

use derive_more::Display;

use crate::constants::{DEFAULT_CURVE_MASK, install};
use crate::error::EncodingError;

fn length_header(length: usize) -> Result<Vec<u8>, EncodingError> {
    Ok(match length {
        0..=0x7F => vec![length as u8],
        0x80..=0xFF => vec![0x81, length as u8],
        0x100..=0xFFFF => vec![0x82, (length >> 8) as u8, length as u8],
        _ => return Err(EncodingError::ValueTooLong(length)),
    })
}

/// Length-value encoding
pub fn encode_lv(value: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut encoded = length_header(value.len())?;
    encoded.extend_from_slice(value);
    Ok(encoded)
}

/// Tag-length-value encoding
pub fn encode_tlv(tag: u8, value: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut encoded = vec![tag];
    encoded.extend(encode_lv(value)?);
    Ok(encoded)
}

/// Curves an application may derive keys on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum Curve {
    /// secp256k1
    #[display("secp256k1")]
    Secp256k1 = 0x01,
    /// secp256r1
    #[display("secp256r1")]
    Secp256r1 = 0x02,
    /// Ed25519
    #[display("ed25519")]
    Ed25519 = 0x04,
    /// SLIP-21 symmetric derivation, implied by SLIP-21 paths
    #[display("slip21")]
    Slip21 = 0x08,
    /// BLS12-381 G1
    #[display("bls12381g1")]
    Bls12381G1 = 0x10,
}

impl Curve {
    /// Bit in the curve mask
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl FromStr for Curve {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "secp256k1" => Ok(Self::Secp256k1),
            "secp256r1" => Ok(Self::Secp256r1),
            "ed25519" => Ok(Self::Ed25519),
            "bls12381g1" => Ok(Self::Bls12381G1),
            _ => Err(EncodingError::UnknownCurve(s.to_string())),
        }
    }
}

/// BIP32 derivation path such as `44'/60'/0'`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Path(pub Vec<u32>);

const HARDENED: u32 = 0x8000_0000;

impl FromStr for Bip32Path {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('/')
            .map(|element| {
                let (digits, hardened) = match element
                    .strip_suffix('\'')
                    .or_else(|| element.strip_suffix('h'))
                {
                    Some(digits) => (digits, HARDENED),
                    None => (element, 0),
                };
                digits
                    .parse::<u32>()
                    .ok()
                    .filter(|index| index & HARDENED == 0)
                    .map(|index| index | hardened)
                    .ok_or_else(|| EncodingError::InvalidPath(element.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Bip32Path {
    /// `count‖index…` with big-endian indices
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let count = u8::try_from(self.0.len()).map_err(|_| EncodingError::FieldTooLong {
            field: "bip32 path",
            length: self.0.len(),
        })?;
        let mut encoded = vec![count];
        for index in &self.0 {
            encoded.extend_from_slice(&index.to_be_bytes());
        }
        Ok(encoded)
    }
}

/// `[0x80 | (len + 1), 0x00, label]`
pub fn encode_slip21_path(label: &str) -> Result<Vec<u8>, EncodingError> {
    let length = label.len() + 1;
    if length > 0x7F {
        return Err(EncodingError::FieldTooLong {
            field: "slip21 path",
            length: label.len(),
        });
    }
    let mut encoded = vec![0x80 | length as u8, 0x00];
    encoded.extend_from_slice(label.as_bytes());
    Ok(encoded)
}

/// Curves and paths an application is allowed to derive on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationPolicy {
    /// Allowed curves, every curve when `None`
    pub curves: Option<Vec<Curve>>,
    /// Allowed BIP32 prefixes
    pub bip32_paths: Vec<Bip32Path>,
    /// Allowed SLIP-21 labels
    pub slip21_paths: Vec<String>,
}

impl DerivationPolicy {
    /// Curve mask byte
    pub fn curve_mask(&self) -> u8 {
        let mask = self.curves.as_ref().map_or(DEFAULT_CURVE_MASK, |curves| {
            curves.iter().fold(0, |mask, curve| mask | curve.mask())
        });
        if self.slip21_paths.is_empty() {
            mask
        } else {
            mask | Curve::Slip21.mask()
        }
    }

    /// `mask‖bip32…‖slip21…`, with a 0 terminator when only SLIP-21 paths are given
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut encoded = vec![self.curve_mask()];
        for path in self.bip32_paths.iter().filter(|p| !p.0.is_empty()) {
            encoded.extend(path.encode()?);
        }
        if !self.slip21_paths.is_empty() {
            for label in self.slip21_paths.iter().filter(|l| !l.is_empty()) {
                encoded.extend(encode_slip21_path(label)?);
            }
            if self.bip32_paths.iter().all(|p| p.0.is_empty()) {
                encoded.push(0x00);
            }
        }
        Ok(encoded)
    }
}

/// Library the application needs, `name` or `name:version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Library name
    pub name: String,
    /// Required version
    pub version: Option<String>,
}

impl FromStr for Dependency {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let name = parts.next().unwrap_or_default().to_string();
        let version = parts
            .next()
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Self { name, version })
    }
}

impl Dependency {
    /// `tlv(6, lv(name)‖lv(version)?)`
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut value = encode_lv(self.name.as_bytes())?;
        if let Some(version) = &self.version {
            value.extend(encode_lv(version.as_bytes())?);
        }
        encode_tlv(install::DEPENDENCY, &value)
    }
}

/// Application metadata carried in the install parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppDescriptor {
    /// Application name
    pub name: String,
    /// Application version
    pub version: Option<String>,
    /// Raw icon bitmap
    pub icon: Option<Vec<u8>>,
    /// Derivation restrictions
    pub derivation: DerivationPolicy,
}

/// Install parameter blob builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallParams {
    /// Library dependencies, encoded first
    pub dependencies: Vec<Dependency>,
    /// Application metadata, omitted for pre-built parameter sections
    pub app: Option<AppDescriptor>,
}

impl InstallParams {
    /// Encode every entry in device order
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut encoded = Vec::new();
        for dependency in &self.dependencies {
            encoded.extend(dependency.encode()?);
        }

        if let Some(app) = &self.app {
            encoded.extend(encode_tlv(install::APP_NAME, app.name.as_bytes())?);
            if let Some(version) = &app.version {
                encoded.extend(encode_tlv(install::APP_VERSION, version.as_bytes())?);
            }
            if let Some(icon) = &app.icon {
                encoded.extend(encode_tlv(install::ICON, icon)?);
            }
            let path = app.derivation.encode()?;
            if !path.is_empty() {
                encoded.extend(encode_tlv(install::DERIVE_PATH, &path)?);
            }
        }

        Ok(encoded)
    }
}
