//! Key material produced by the handshake and consumed by the codec

use std::fmt;

use k256::{SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::MAX_KEY_DERIVATION_RETRIES;
use crate::crypto::sha256;
use crate::error::ScpError;

/// AES-128 key
pub type ScpKey = [u8; 16];

/// Length of a v3 shared secret
pub const V3_SECRET_LENGTH: usize = 32;

/// Shared secret negotiated by the handshake
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub enum DeployedSecret {
    /// First 16 bytes of the ECDH secret, used directly as the AES key
    V2(ScpKey),
    /// Full ECDH secret, both codec keys are derived from it
    V3 {
        /// SHA-256 of the compressed shared point
        secret: [u8; V3_SECRET_LENGTH],
        /// Public key of the device certificate, if the device sent one
        device_public_key: Option<Vec<u8>>,
    },
}

impl fmt::Debug for DeployedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2(_) => f.write_str("DeployedSecret::V2(..)"),
            Self::V3 {
                device_public_key, ..
            } => f
                .debug_struct("DeployedSecret::V3")
                .field(
                    "device_public_key",
                    &device_public_key.as_ref().map(hex::encode),
                )
                .finish_non_exhaustive(),
        }
    }
}

/// Derive codec key `index` from a v3 secret
///
/// `d = SHA-256(index‖retry‖secret)` is retried until it is a valid scalar;
/// the key is the first 16 bytes of `SHA-256(uncompressed(d·G))`.
pub fn derive_v3_key(secret: &[u8], index: u32) -> Result<ScpKey, ScpError> {
    if secret.len() != V3_SECRET_LENGTH {
        return Err(ScpError::InvalidKeyLength {
            expected: V3_SECRET_LENGTH,
            actual: secret.len(),
        });
    }

    for retry in 0..=MAX_KEY_DERIVATION_RETRIES {
        let mut candidate = sha256(&[&index.to_be_bytes(), &[retry], secret]);
        let scalar = SecretKey::from_slice(&candidate);
        candidate.zeroize();

        if let Ok(scalar) = scalar {
            let point = scalar.public_key().to_encoded_point(false);
            let mut digest = sha256(&[point.as_bytes()]);
            let mut key = ScpKey::default();
            let len = key.len();
            key.copy_from_slice(&digest[..len]);
            digest.zeroize();
            return Ok(key);
        }
    }

    Err(ScpError::KeyDerivation(MAX_KEY_DERIVATION_RETRIES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_derivation_is_deterministic_per_index() {
        let secret = hex!("B410E816DA313545151807E25A830201FA389913A977066AB0C6DE0E8631E400");
        let enc = derive_v3_key(&secret, 0).unwrap();
        let mac = derive_v3_key(&secret, 1).unwrap();
        assert_eq!(enc, derive_v3_key(&secret, 0).unwrap());
        assert_ne!(enc, mac);
        assert_ne!(enc, derive_v3_key(&[0u8; 32], 0).unwrap());
    }

    #[test]
    fn test_short_secret_is_rejected() {
        assert!(matches!(
            derive_v3_key(&[0x11; 16], 0),
            Err(ScpError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let secret = DeployedSecret::V3 {
            secret: [0x42; 32],
            device_public_key: Some(vec![0x04, 0x01]),
        };
        let debug = format!("{secret:?}");
        assert!(debug.contains("0401"));
        assert!(!debug.contains("4242"));
    }
}
