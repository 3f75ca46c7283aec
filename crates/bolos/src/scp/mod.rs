//! Secure channel codec
//!
//! Every secure loader command body is padded with `0x80` and zeros to the
//! next block boundary and AES-128-CBC encrypted with a running IV. v3 adds a
//! CBC-MAC over the ciphertext under a second key and IV, of which the last
//! 14 bytes are appended as the tag.
//!
//! ```text
//! v2: E(k, iv, pad(m))
//! v3: c = E(k_enc, iv_enc, pad(m)) ‖ last14(CBC-MAC(k_mac, iv_mac, c))
//! ```

pub mod keys;

use aes::Aes128;
use cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    block_padding::{Iso7816, NoPadding},
};
use bytes::{Bytes, BytesMut};
use cbc_mac::{CbcMac, Mac};
use generic_array::GenericArray;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use keys::{DeployedSecret, ScpKey, derive_v3_key};

use crate::constants::{BLOCK_LENGTH, DEFAULT_MTU, SCP_MAC_LENGTH};
use crate::error::ScpError;
use crate::target::ScpVersion;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;
type Block = [u8; BLOCK_LENGTH];

const PADDING_MARKER: u8 = 0x80;

#[derive(Zeroize, ZeroizeOnDrop)]
enum State {
    Plain,
    V2 {
        key: ScpKey,
        iv: Block,
    },
    V3 {
        enc_key: ScpKey,
        enc_iv: Block,
        mac_key: ScpKey,
        mac_iv: Block,
    },
}

/// Stateful codec for one session
///
/// The running IVs advance with every wrap and unwrap, so one codec must see
/// every exchange of its session in order and must not outlive it.
pub struct SecureChannel {
    state: State,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Codec that passes every payload through untouched
    pub const fn plain() -> Self {
        Self {
            state: State::Plain,
        }
    }

    /// v2 codec with a single key
    pub const fn v2(key: ScpKey) -> Self {
        Self {
            state: State::V2 {
                key,
                iv: [0; BLOCK_LENGTH],
            },
        }
    }

    /// v3 codec with explicit encryption and MAC keys
    pub const fn v3(enc_key: ScpKey, mac_key: ScpKey) -> Self {
        Self {
            state: State::V3 {
                enc_key,
                enc_iv: [0; BLOCK_LENGTH],
                mac_key,
                mac_iv: [0; BLOCK_LENGTH],
            },
        }
    }

    /// Build the codec matching a handshake result
    pub fn from_secret(secret: &DeployedSecret) -> Result<Self, ScpError> {
        match secret {
            DeployedSecret::V2(key) => Ok(Self::v2(*key)),
            DeployedSecret::V3 { secret, .. } => {
                let enc_key = derive_v3_key(secret, 0)?;
                let mac_key = derive_v3_key(secret, 1)?;
                Ok(Self::v3(enc_key, mac_key))
            }
        }
    }

    /// Protocol version, `None` in plain mode
    pub const fn version(&self) -> Option<ScpVersion> {
        match self.state {
            State::Plain => None,
            State::V2 { .. } => Some(ScpVersion::V2),
            State::V3 { .. } => Some(ScpVersion::V3),
        }
    }

    /// Whether payloads are encrypted
    pub const fn is_secure(&self) -> bool {
        !matches!(self.state, State::Plain)
    }

    /// Largest plaintext command body for a transport payload limit
    ///
    /// v3 keeps the limit block aligned so the tag always fits.
    pub fn mtu(&self, max_payload: usize) -> usize {
        match self.state {
            State::V3 { .. } => DEFAULT_MTU.min(max_payload & 0xF0),
            _ => DEFAULT_MTU.min(max_payload),
        }
    }

    /// Encrypt (and authenticate, for v3) an outgoing command body
    pub fn wrap(&mut self, data: &[u8]) -> Result<Bytes, ScpError> {
        if data.is_empty() {
            return Ok(Bytes::new());
        }

        match &mut self.state {
            State::Plain => Ok(Bytes::copy_from_slice(data)),
            State::V2 { key, iv } => {
                let mut buffer = BytesMut::from(data);
                *iv = encrypt(key, iv, &mut buffer)?;
                trace!(plain = data.len(), wire = buffer.len(), "SCP v2 wrap");
                Ok(buffer.freeze())
            }
            State::V3 {
                enc_key,
                enc_iv,
                mac_key,
                mac_iv,
            } => {
                let mut buffer = BytesMut::from(data);
                *enc_iv = encrypt(enc_key, enc_iv, &mut buffer)?;
                *mac_iv = cbc_mac(mac_key, mac_iv, &buffer);
                buffer.extend_from_slice(&mac_iv[BLOCK_LENGTH - SCP_MAC_LENGTH..]);
                trace!(plain = data.len(), wire = buffer.len(), "SCP v3 wrap");
                Ok(buffer.freeze())
            }
        }
    }

    /// Verify (for v3) and decrypt an incoming response body
    ///
    /// Empty bodies and bare 2-byte status words pass through.
    pub fn unwrap(&mut self, data: &[u8]) -> Result<Bytes, ScpError> {
        if data.is_empty() || data.len() == 2 {
            return Ok(Bytes::copy_from_slice(data));
        }

        match &mut self.state {
            State::Plain => Ok(Bytes::copy_from_slice(data)),
            State::V2 { key, iv } => {
                let mut buffer = BytesMut::from(data);
                decrypt(key, iv, &mut buffer)?;
                strip_padding(&mut buffer)?;
                *iv = last_block(data);
                trace!(wire = data.len(), plain = buffer.len(), "SCP v2 unwrap");
                Ok(buffer.freeze())
            }
            State::V3 {
                enc_key,
                enc_iv,
                mac_key,
                mac_iv,
            } => {
                if data.len() < SCP_MAC_LENGTH + BLOCK_LENGTH {
                    return Err(ScpError::Misaligned(data.len()));
                }
                let (ciphertext, received) = data.split_at(data.len() - SCP_MAC_LENGTH);
                if ciphertext.len() % BLOCK_LENGTH != 0 {
                    return Err(ScpError::Misaligned(ciphertext.len()));
                }

                *mac_iv = cbc_mac(mac_key, mac_iv, ciphertext);
                let expected = &mac_iv[BLOCK_LENGTH - SCP_MAC_LENGTH..];
                if expected != received {
                    return Err(ScpError::InvalidMac {
                        expected: hex::encode(expected),
                        received: hex::encode(received),
                    });
                }

                let mut buffer = BytesMut::from(ciphertext);
                decrypt(enc_key, enc_iv, &mut buffer)?;
                *enc_iv = last_block(ciphertext);
                strip_padding(&mut buffer)?;
                trace!(wire = data.len(), plain = buffer.len(), "SCP v3 unwrap");
                Ok(buffer.freeze())
            }
        }
    }
}

// Reserve room for the 0x80 marker and zero fill, a full block when aligned
fn prepare_padding(data: &mut BytesMut) -> usize {
    let len = data.len();
    data.resize(len + BLOCK_LENGTH - len % BLOCK_LENGTH, 0);

    len
}

fn last_block(data: &[u8]) -> Block {
    let mut block = Block::default();
    block.copy_from_slice(&data[data.len() - BLOCK_LENGTH..]);
    block
}

/// Pad and encrypt in place, returning the last ciphertext block
fn encrypt(key: &ScpKey, iv: &Block, data: &mut BytesMut) -> Result<Block, ScpError> {
    let msg_len = prepare_padding(data);
    let padded_len = data.len();
    Encryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<Iso7816>(data, msg_len)
        .map_err(|_| ScpError::Misaligned(padded_len))?;

    Ok(last_block(data))
}

fn decrypt(key: &ScpKey, iv: &Block, data: &mut BytesMut) -> Result<(), ScpError> {
    let len = data.len();
    if len == 0 || len % BLOCK_LENGTH != 0 {
        return Err(ScpError::Misaligned(len));
    }
    Decryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|_| ScpError::Misaligned(len))?;

    Ok(())
}

/// CBC-MAC of block aligned `data` chained from `iv`
fn cbc_mac(key: &ScpKey, iv: &Block, data: &[u8]) -> Block {
    let (first, rest) = data.split_at(BLOCK_LENGTH);

    // chaining from iv is the same as folding it into the first block
    let mut head = *iv;
    head.iter_mut().zip(first).for_each(|(h, b)| *h ^= b);

    let mut mac = CbcMac::<Aes128>::new(GenericArray::from_slice(key));
    mac.update(&head);
    mac.update(rest);

    let mut tag = Block::default();
    tag.copy_from_slice(&mac.finalize().into_bytes());
    tag
}

fn strip_padding(data: &mut BytesMut) -> Result<(), ScpError> {
    let end = data
        .iter()
        .rposition(|b| *b == PADDING_MARKER)
        .ok_or(ScpError::InvalidPadding)?;
    data.truncate(end);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEY: ScpKey = hex!("2b7e151628aed2a6abf7158809cf4f3c");
    const MAC_KEY: ScpKey = hex!("000102030405060708090a0b0c0d0e0f");

    /// Host codec and the mirrored device codec
    fn pairs() -> [(SecureChannel, SecureChannel); 2] {
        [
            (SecureChannel::v2(KEY), SecureChannel::v2(KEY)),
            (
                SecureChannel::v3(KEY, MAC_KEY),
                SecureChannel::v3(KEY, MAC_KEY),
            ),
        ]
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        for (mut host, mut device) in pairs() {
            for len in [0usize, 1, 15, 16, 17, 32] {
                let plain: Vec<u8> = (0..len as u8).collect();
                let wire = host.wrap(&plain).unwrap();
                assert_eq!(device.unwrap(&wire).unwrap().as_ref(), plain.as_slice());

                // and back, with the IVs advanced by the first leg
                let wire = device.wrap(&plain).unwrap();
                assert_eq!(host.unwrap(&wire).unwrap().as_ref(), plain.as_slice());
            }
        }
    }

    #[test]
    fn test_padding_layout() {
        let mut codec = SecureChannel::v2(KEY);
        assert_eq!(codec.wrap(&[0x06; 15]).unwrap().len(), 16);
        assert_eq!(codec.wrap(&[0x06; 16]).unwrap().len(), 32);

        let mut codec = SecureChannel::v3(KEY, MAC_KEY);
        assert_eq!(codec.wrap(&[0x05; 5]).unwrap().len(), 16 + SCP_MAC_LENGTH);
    }

    #[test]
    fn test_v2_first_block_matches_aes_vector() {
        // with a zero IV the first CBC block is plain AES of the padded input
        let plain = hex!("6bc1bee22e409f96e93d7e117393172a");
        let mut codec = SecureChannel::v2(KEY);
        let wire = codec.wrap(&plain).unwrap();
        assert_eq!(&wire[..16], hex!("3ad77bb40d7a3660a89ecaf32466ef97"));
    }

    #[test]
    fn test_running_iv_changes_ciphertext() {
        let mut codec = SecureChannel::v2(KEY);
        let first = codec.wrap(b"select").unwrap();
        let second = codec.wrap(b"select").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_v3_tamper_detection() {
        let mut host = SecureChannel::v3(KEY, MAC_KEY);
        let wire = host.wrap(&[0x42; 20]).unwrap();

        for i in 0..wire.len() {
            let mut device = SecureChannel::v3(KEY, MAC_KEY);
            let mut tampered = wire.to_vec();
            tampered[i] ^= 0x01;
            assert!(
                matches!(device.unwrap(&tampered), Err(ScpError::InvalidMac { .. })),
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_pass_through() {
        let mut codec = SecureChannel::v3(KEY, MAC_KEY);
        assert!(codec.unwrap(&[]).unwrap().is_empty());
        assert_eq!(codec.unwrap(&hex!("9000")).unwrap().as_ref(), hex!("9000"));

        let mut plain = SecureChannel::plain();
        assert_eq!(plain.wrap(b"\x05abcd").unwrap().as_ref(), b"\x05abcd");
        assert!(!plain.is_secure());
    }

    #[test]
    fn test_missing_padding_marker() {
        // zero block encrypted without any marker
        let mut buffer = BytesMut::from(&[0u8; 16][..]);
        Encryptor::new(
            GenericArray::from_slice(&KEY),
            GenericArray::from_slice(&[0u8; 16]),
        )
        .encrypt_padded_mut::<NoPadding>(&mut buffer, 16)
        .unwrap();

        let mut codec = SecureChannel::v2(KEY);
        assert_eq!(codec.unwrap(&buffer), Err(ScpError::InvalidPadding));
        assert_eq!(codec.unwrap(&[0u8; 17]), Err(ScpError::Misaligned(17)));
    }

    #[test]
    fn test_mtu() {
        assert_eq!(SecureChannel::v3(KEY, MAC_KEY).mtu(255), 0xF0);
        assert_eq!(SecureChannel::v2(KEY).mtu(255), 0xFE);
        assert_eq!(SecureChannel::plain().mtu(64), 64);
    }

    #[test]
    fn test_from_secret() {
        let codec = SecureChannel::from_secret(&DeployedSecret::V3 {
            secret: [7; 32],
            device_public_key: None,
        })
        .unwrap();
        assert_eq!(codec.version(), Some(ScpVersion::V3));
        assert_eq!(
            SecureChannel::from_secret(&DeployedSecret::V2(KEY))
                .unwrap()
                .version(),
            Some(ScpVersion::V2)
        );
    }
}
