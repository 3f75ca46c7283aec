//! Error types for BOLOS operations
//!
//! Transport level failures (framing, timeouts) surface through
//! [`Error::Transport`]; device rejections carry the status word, the
//! possible cause and whatever data the device returned.

use bytes::Bytes;
use sideload_apdu_core::{StatusWord, TransportError};

use crate::status::possible_cause;

/// Result type for BOLOS operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for BOLOS operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// Framing, timeout or link failure
    #[error(transparent)]
    Transport(TransportError),

    /// Device answered with a status word outside the accepted class
    #[error("Invalid status {status} ({cause})")]
    DeviceStatus {
        /// Status word returned by the device
        status: StatusWord,
        /// Human readable cause
        cause: String,
        /// Data returned alongside the status word
        data: Bytes,
    },

    //
    // Handshake related errors
    //
    /// Target id does not support the SCP v2 family
    #[error("Target ID {0:#010x} does not support SCP V2+")]
    UnsupportedTarget(u32),

    /// Handshake protocol violation
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Certificate chain verification failed on a required link
    #[error(transparent)]
    CertificateChain(#[from] CertificateError),

    //
    // Secure channel related errors
    //
    /// Secure channel codec failure
    #[error(transparent)]
    SecureChannel(#[from] ScpError),

    /// Session was poisoned by an earlier failure
    #[error("Session closed after a failed exchange, a new handshake is required")]
    SessionClosed,

    //
    // Loader related errors
    //
    /// Memory image error
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Metadata encoding error
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Malformed device response
    #[error("Invalid response: {0}")]
    InvalidResponse(&'static str),

    //
    // Crypto errors
    //
    /// ECDSA error
    #[error(transparent)]
    Ecdsa(#[from] k256::ecdsa::Error),

    /// Elliptic curve error
    #[error(transparent)]
    EllipticCurve(#[from] k256::elliptic_curve::Error),

    /// Malformed DER or compact signature
    #[error("Invalid signature encoding: {0}")]
    SignatureEncoding(&'static str),

    //
    // General errors
    //
    /// I/O error reading an input file
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a device status error, looking up the possible cause
    pub fn device_status(status: StatusWord, data: Bytes) -> Self {
        Self::DeviceStatus {
            status,
            cause: possible_cause(status.to_u16()),
            data,
        }
    }

    /// Status word carried by this error, if any
    pub fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::DeviceStatus { status, .. } => Some(*status),
            Self::Context { source, .. } => source.status_word(),
            _ => None,
        }
    }

    /// Check whether this error is a response timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Context { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<TransportError> for Error {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Status { status, data } => Self::device_status(status, data),
            other => Self::Transport(other),
        }
    }
}

/// Extension trait for results carrying [`Error`]
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

/// Certificate chain errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// Certificate bytes end before a declared field
    #[error("Truncated certificate: {field} needs {needed} bytes, {available} available")]
    Truncated {
        /// Field being decoded
        field: &'static str,
        /// Bytes required
        needed: usize,
        /// Bytes left
        available: usize,
    },

    /// Signature over the device ephemeral key does not verify
    #[error("Broken certificate chain at device ephemeral certificate")]
    BrokenChain,

    /// Public key is not a valid secp256k1 point
    #[error("Invalid certificate public key")]
    InvalidPublicKey,
}

/// Secure channel codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScpError {
    /// Response MAC does not match
    #[error("SCP: Invalid MAC (expected={expected}, got={received})")]
    InvalidMac {
        /// Hex of the recomputed tag
        expected: String,
        /// Hex of the received tag
        received: String,
    },

    /// No padding marker in the decrypted response
    #[error("SCP: Invalid padding in decrypted response")]
    InvalidPadding,

    /// Ciphertext is not block aligned
    #[error("SCP: ciphertext length {0} is not a multiple of 16")]
    Misaligned(usize),

    /// v3 key derivation did not find a valid scalar
    #[error("Key derivation failed after {0} retries")]
    KeyDerivation(u8),

    /// Key material has the wrong length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

/// Memory image errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    /// Segment larger than the loader can address
    #[error("Invalid data size for loader: segment at {address:#010x} is {length} bytes")]
    SegmentTooLarge {
        /// Segment start address
        address: u32,
        /// Segment length
        length: usize,
    },

    /// Chunk cannot be aligned to the clear-data block length
    #[error("Cannot transport non-block-aligned data: chunk of {chunk} bytes, block of {block}")]
    Misaligned {
        /// Chunk length
        chunk: usize,
        /// Clear data block length
        block: usize,
    },

    /// Maximum APDU length leaves no room for segment data
    #[error("Maximum APDU length {0} leaves no room for segment data")]
    ChunkTooSmall(usize),

    /// Image has no areas
    #[error("Memory image is empty")]
    Empty,

    /// Intel HEX record rejected by the reader
    #[error("Invalid Intel HEX record {index}: {reason}")]
    HexRecord {
        /// 1-based record number
        index: usize,
        /// What went wrong
        reason: String,
    },

    /// Unsupported Intel HEX record type
    #[error("Unsupported Intel HEX record type {record:02} at record {index}")]
    UnsupportedRecord {
        /// 1-based record number
        index: usize,
        /// Record type
        record: u8,
    },

    /// Data record size outside 1..=255
    #[error("Intel HEX data record size must be between 1 and 255, got {0}")]
    RecordSize(usize),

    /// Intel HEX writer failure
    #[error("Cannot write Intel HEX: {0}")]
    HexWrite(String),
}

/// Metadata encoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodingError {
    /// LV/TLV value of 65536 bytes or more
    #[error("Unimplemented LV encoding for {0} bytes")]
    ValueTooLong(usize),

    /// Length-prefixed field above 255 bytes
    #[error("Field {field} too long: {length} bytes")]
    FieldTooLong {
        /// Field name
        field: &'static str,
        /// Field length
        length: usize,
    },

    /// Malformed BIP32 path element
    #[error("Invalid BIP32 path element: {0:?}")]
    InvalidPath(String),

    /// Unknown curve name
    #[error("Unknown curve: {0}")]
    UnknownCurve(String),

    /// Malformed target id
    #[error("Invalid target id: {0}")]
    InvalidTarget(String),

    /// Malformed hex string
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transport_error_becomes_device_status() {
        let err: Error =
            TransportError::status(StatusWord::from_u16(0x6985), Bytes::from_static(&[1])).into();
        assert_eq!(err.status_word(), Some(StatusWord::from_u16(0x6985)));
        assert_eq!(
            err.to_string(),
            "Invalid status 6985 (Condition of use not satisfied (denied by the user?))"
        );
    }

    #[test]
    fn test_context_keeps_source() {
        let err = Error::from(TransportError::Timeout(std::time::Duration::from_secs(1)))
            .with_context("GET_NONCE");
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("GET_NONCE: "));
    }
}
