//! Framed transport over a packet link
//!
//! [`FramedTransport`] runs the [`FrameCodec`] over any [`Link`] that can
//! write and read fixed-size packets, such as a HID report pipe.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::{CardTransport, TransportError};
use crate::frame::FrameCodec;

/// Default time to wait for a complete response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A half-duplex packet link
pub trait Link: Send + fmt::Debug {
    /// Write a single packet
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Read a single packet, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    fn read_packet(&mut self, timeout: Duration) -> Result<Option<Bytes>, TransportError>;

    /// Discard any buffered or in-flight packets
    fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Transport that frames APDUs into link packets
pub struct FramedTransport<L> {
    link: L,
    codec: FrameCodec,
    timeout: Duration,
    max_payload: usize,
}

impl<L: Link> fmt::Debug for FramedTransport<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedTransport")
            .field("link", &self.link)
            .field("codec", &self.codec)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<L: Link> FramedTransport<L> {
    /// Create a HID framed transport with default settings
    pub const fn new(link: L) -> Self {
        Self::with_codec(link, FrameCodec::hid())
    }

    /// Create a framed transport with a specific codec
    pub const fn with_codec(link: L, codec: FrameCodec) -> Self {
        Self {
            link,
            codec,
            timeout: DEFAULT_TIMEOUT,
            max_payload: crate::command::MAX_SHORT_PAYLOAD,
        }
    }

    /// Set the response timeout
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum command payload
    pub const fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Frame codec in use
    pub const fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Get a reference to the underlying link
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Consume the transport and return the link
    pub fn into_link(self) -> L {
        self.link
    }

    fn read_response(&mut self) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + self.timeout;
        let mut buffer = BytesMut::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(self.timeout));
            }

            let Some(packet) = self.link.read_packet(remaining)? else {
                return Err(TransportError::Timeout(self.timeout));
            };
            trace!(packet = %hex::encode(&packet), "Received packet");
            buffer.extend_from_slice(&packet);

            if let Some(response) = self.codec.unwrap(&buffer)? {
                return Ok(response);
            }
        }
    }
}

impl<L: Link> CardTransport for FramedTransport<L> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let packets = self.codec.wrap(command)?;
        debug!(
            packets = packets.len(),
            length = command.len(),
            "Sending framed command"
        );

        let result = packets
            .iter()
            .try_for_each(|packet| self.link.write_packet(packet))
            .and_then(|()| self.read_response());

        // partial frames must not bleed into the next exchange
        if let Err(e) = &result {
            warn!(error = %e, "Exchange failed, resetting link");
            if let Err(reset) = self.link.reset() {
                warn!(error = %reset, "Link reset failed");
            }
        }

        result
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.link.reset()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::command::Command;
    use hex_literal::hex;

    /// Link whose device side answers every command with a fixed response
    #[derive(Debug, Default)]
    struct EchoLink {
        written: Vec<u8>,
        pending: VecDeque<Bytes>,
        reply: Vec<u8>,
        silent: bool,
        broken_reset: bool,
        resets: usize,
    }

    impl Link for EchoLink {
        fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
            self.written.extend_from_slice(packet);
            let codec = FrameCodec::hid();
            if codec.unwrap(&self.written)?.is_some() && !self.silent {
                self.pending.extend(codec.wrap(&self.reply)?);
                self.written.clear();
            }
            Ok(())
        }

        fn read_packet(&mut self, _timeout: Duration) -> Result<Option<Bytes>, TransportError> {
            Ok(self.pending.pop_front())
        }

        fn reset(&mut self) -> Result<(), TransportError> {
            self.resets += 1;
            if self.broken_reset {
                return Err(TransportError::NotOpened);
            }
            self.written.clear();
            self.pending.clear();
            Ok(())
        }
    }

    #[test]
    fn test_framed_exchange() {
        let link = EchoLink {
            reply: [vec![0x42; 150], hex!("9000").to_vec()].concat(),
            ..Default::default()
        };
        let mut transport = FramedTransport::new(link);

        let command = Command::new_with_data(0xE0, 0x50, 0x00, 0x00, vec![0x11; 200]);
        let response = transport.exchange(&command).unwrap();
        assert!(response.is_success());
        assert_eq!(response.data().len(), 150);
    }

    #[test]
    fn test_timeout_resets_link() {
        let link = EchoLink {
            silent: true,
            ..Default::default()
        };
        let mut transport = FramedTransport::new(link).with_timeout(Duration::from_millis(10));

        let err = transport
            .exchange(&Command::new(0xE0, 0x53, 0x00, 0x00))
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(transport.link().resets, 1);
        assert!(transport.link().written.is_empty());
    }

    #[test]
    fn test_failed_reset_keeps_original_error() {
        let link = EchoLink {
            silent: true,
            broken_reset: true,
            ..Default::default()
        };
        let mut transport = FramedTransport::new(link).with_timeout(Duration::from_millis(10));

        let err = transport
            .exchange(&Command::new(0xE0, 0x53, 0x00, 0x00))
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(transport.link().resets, 1);
    }

    #[test]
    fn test_short_response_is_an_error() {
        let link = EchoLink {
            reply: vec![0x90],
            ..Default::default()
        };
        let mut transport = FramedTransport::new(link);
        assert!(matches!(
            transport.exchange(&Command::new(0xE0, 0x53, 0x00, 0x00)),
            Err(TransportError::ResponseTooShort(1))
        ));
    }

    #[test]
    fn test_transmit_accepted() {
        let link = EchoLink {
            reply: hex!("AA6985").to_vec(),
            ..Default::default()
        };
        let mut transport = FramedTransport::new(link);
        let err = transport
            .transmit_accepted(&Command::new(0xE0, 0x00, 0x00, 0x00))
            .unwrap_err();
        let TransportError::Status { status, data } = err else {
            panic!("expected status error");
        };
        assert_eq!(status.to_u16(), 0x6985);
        assert_eq!(data.as_ref(), hex!("AA"));
    }
}
