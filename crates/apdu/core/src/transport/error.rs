//! Error types specific to card transport

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::frame::FrameError;
use crate::response::status::StatusWord;

/// Transport error type
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// The device is not open or was disconnected
    #[error("Device not opened")]
    NotOpened,

    /// I/O error from the underlying link
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet framing error
    #[error(transparent)]
    Framing(#[from] FrameError),

    /// No complete response arrived before the deadline
    #[error("Timeout waiting for device response after {0:?}")]
    Timeout(Duration),

    /// Decoded response has no room for a status word
    #[error("Response too short: {0} bytes")]
    ResponseTooShort(usize),

    /// Command payload does not fit a short APDU
    #[error("Command payload too long: {0} bytes")]
    CommandTooLong(usize),

    /// Raw bytes do not form a valid command
    #[error("Invalid command encoding ({0} bytes)")]
    InvalidCommand(usize),

    /// Status word outside the accepted class
    #[error("Invalid status {status}")]
    Status {
        /// Status word returned by the device
        status: StatusWord,
        /// Data returned alongside the status word
        data: Bytes,
    },

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new status word error
    pub fn status(status: StatusWord, data: Bytes) -> Self {
        Self::Status { status, data }
    }

    /// Check if this is a timeout
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Get the status word if this is a status word error
    pub const fn get_status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}
