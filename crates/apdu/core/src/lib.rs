//! Core traits and types for APDU exchanges with BOLOS secure elements
//!
//! This crate provides the foundational layer that every higher level
//! protocol in the workspace sits on:
//!
//! - [`Command`] and [`Response`] for short ISO/IEC 7816-4 style APDUs
//! - [`StatusWord`] interpretation
//! - the [`FrameCodec`] that chunks APDUs into fixed-size HID packets and
//!   reassembles responses
//! - the [`CardTransport`] capability trait, a [`FramedTransport`] that runs
//!   the frame codec over any packet [`Link`], and a deterministic
//!   [`MockTransport`] for tests and dry runs
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod frame;
pub mod response;
pub mod transport;

pub use command::Command;
pub use frame::{FrameCodec, FrameError};
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::framed::{DEFAULT_TIMEOUT, FramedTransport, Link};
pub use transport::mock::MockTransport;
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut};

    pub use crate::Command;

    pub use crate::Response;
    pub use crate::response::status::{StatusWord, common as status};

    pub use crate::frame::FrameCodec;
    pub use crate::transport::{CardTransport, TransportError};
    pub use crate::transport::framed::{FramedTransport, Link};
    pub use crate::transport::mock::MockTransport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0xE0, 0x50, 0x00, 0x00);
        assert_eq!(cmd.cla, 0xE0);
        assert_eq!(cmd.ins, 0x50);

        let resp = Response::success(Bytes::from_static(&[0x01, 0x02, 0x03]));
        assert!(resp.is_success());
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
