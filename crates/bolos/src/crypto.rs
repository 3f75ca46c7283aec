//! secp256k1 and SHA-256 helpers used by the handshake and the loader
//!
//! Signatures travel as DER with a low S value. Decoding is done by hand
//! because device certificates carry bare `30 len 02 r 02 s` blobs whose
//! integers may be left unpadded.

use k256::{
    AffinePoint, PublicKey, SecretKey,
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::{Signer, Verifier, hazmat::PrehashSigner},
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;
const SCALAR_LENGTH: usize = 32;

/// SHA-256 over the concatenation of `parts`
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Generate a fresh random secp256k1 key
pub fn random_signing_key() -> SigningKey {
    SigningKey::random(&mut rand_v8::thread_rng())
}

/// Uncompressed SEC1 encoding of a verifying key
pub fn uncompressed(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

fn to_compact(signature: &Signature) -> [u8; 64] {
    let signature = signature.normalize_s().unwrap_or(*signature);
    let mut compact = [0u8; 64];
    compact.copy_from_slice(&signature.to_bytes());
    compact
}

/// Low-S DER encoding of `signature`
pub fn to_der(signature: &Signature) -> Vec<u8> {
    let signature = signature.normalize_s().unwrap_or(*signature);
    signature.to_der().as_bytes().to_vec()
}

/// Sign `message` (hashed with SHA-256), returning a low-S DER signature
pub fn sign_message(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(message);
    to_der(&signature)
}

/// Sign an already computed 32-byte digest, returning a low-S DER signature
pub fn sign_prehash(key: &SigningKey, digest: &[u8; 32]) -> Result<Vec<u8>> {
    let signature: Signature = key.sign_prehash(digest)?;
    Ok(to_der(&signature))
}

/// Verify a DER signature over `message` (hashed with SHA-256)
///
/// High-S signatures are normalized before verification.
pub fn verify_message(key: &VerifyingKey, message: &[u8], der: &[u8]) -> Result<bool> {
    let compact = der_to_compact(der)?;
    let signature = Signature::from_slice(&compact)?;
    let signature = signature.normalize_s().unwrap_or(signature);
    Ok(key.verify(message, &signature).is_ok())
}

/// SHA-256 of the compressed point `public × private`
pub fn ecdh_secret(private: &SecretKey, public: &PublicKey) -> [u8; 32] {
    let shared = AffinePoint::from(public.to_projective() * *private.to_nonzero_scalar());
    sha256(&[shared.to_encoded_point(true).as_bytes()])
}

fn read_integer<'a>(der: &'a [u8], offset: &mut usize) -> Result<&'a [u8]> {
    if der.get(*offset) != Some(&DER_INTEGER) {
        return Err(Error::SignatureEncoding("missing INTEGER"));
    }
    let length = *der
        .get(*offset + 1)
        .ok_or(Error::SignatureEncoding("truncated INTEGER"))? as usize;
    let start = *offset + 2;
    let value = der
        .get(start..start + length)
        .ok_or(Error::SignatureEncoding("truncated INTEGER"))?;
    *offset = start + length;

    let value = match value {
        [0, rest @ ..] if value.len() > SCALAR_LENGTH => rest,
        _ => value,
    };
    if value.len() > SCALAR_LENGTH {
        return Err(Error::SignatureEncoding("INTEGER longer than 32 bytes"));
    }
    Ok(value)
}

/// Decode a DER signature into compact `r‖s`
pub fn der_to_compact(der: &[u8]) -> Result<[u8; 64]> {
    if der.first() != Some(&DER_SEQUENCE) {
        return Err(Error::SignatureEncoding("missing SEQUENCE"));
    }

    let mut offset = 2;
    let r = read_integer(der, &mut offset)?;
    let s = read_integer(der, &mut offset)?;

    let mut compact = [0u8; 64];
    compact[SCALAR_LENGTH - r.len()..SCALAR_LENGTH].copy_from_slice(r);
    compact[64 - s.len()..].copy_from_slice(s);
    Ok(compact)
}

/// Replace `s` by `n - s` when it lies in the upper half of the group order
pub fn ensure_low_s(compact: &[u8; 64]) -> Result<[u8; 64]> {
    Ok(to_compact(&Signature::from_slice(compact)?))
}
