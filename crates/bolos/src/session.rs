//! Device session handle
//!
//! A [`Session`] owns the transport and the secure channel codec for the
//! lifetime of one handshake. Commands go through [`Session::exchange`],
//! which wraps the body, checks the status class and unwraps the response.

use bytes::Bytes;
use sideload_apdu_core::{CardTransport, Command};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::handshake::{self, HandshakeConfig};
use crate::scp::SecureChannel;
use crate::target::ScpVersion;

/// One authenticated (or plain) conversation with a device
#[derive(Debug)]
pub struct Session<T: CardTransport> {
    transport: T,
    channel: SecureChannel,
    closed: bool,
}

impl<T: CardTransport> Session<T> {
    /// Run the handshake over `transport` and open a secure session
    pub fn establish(mut transport: T, config: &HandshakeConfig) -> Result<Self> {
        let secret = handshake::establish(&mut transport, config)?;
        let channel = SecureChannel::from_secret(&secret)?;
        Ok(Self::new(transport, channel))
    }

    /// Session without encryption, for dry runs and recovery dashboards
    pub const fn insecure(transport: T) -> Self {
        Self::new(transport, SecureChannel::plain())
    }

    /// Session over an existing codec
    pub const fn new(transport: T, channel: SecureChannel) -> Self {
        Self {
            transport,
            channel,
            closed: false,
        }
    }

    /// Negotiated protocol version, `None` when insecure
    pub const fn scp_version(&self) -> Option<ScpVersion> {
        self.channel.version()
    }

    /// Largest plaintext body one exchange can carry
    pub fn max_payload_size(&self) -> usize {
        self.channel.mtu(self.transport.max_payload_size())
    }

    /// Whether an earlier failure closed the session
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Drop the codec state and hand the transport back
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send one command body and return the unwrapped response data
    pub fn exchange(&mut self, cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Result<Bytes> {
        if self.closed {
            return Err(Error::SessionClosed);
        }

        let result = self.exchange_inner(cla, ins, p1, p2, data);
        if let Err(e) = &result {
            // a rejected command without body leaves both codecs in step
            let in_step = matches!(e, Error::DeviceStatus { data, .. } if data.is_empty());
            if !in_step && self.channel.is_secure() {
                warn!(error = %e, "Closing session");
                self.closed = true;
                if let Err(reset) = self.transport.reset() {
                    warn!(error = %reset, "Transport reset failed");
                }
            }
        }
        result
    }

    fn exchange_inner(&mut self, cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> Result<Bytes> {
        let body = self.channel.wrap(data)?;
        trace!(
            ins = format_args!("{ins:#04x}"),
            plain = data.len(),
            wire = body.len(),
            "Session exchange"
        );
        let command = Command::new_with_data(cla, ins, p1, p2, body);
        let response = self.transport.transmit_accepted(&command)?;
        Ok(self.channel.unwrap(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use sideload_apdu_core::{MockTransport, Response};

    const KEY: [u8; 16] = hex!("000102030405060708090a0b0c0d0e0f");

    #[test]
    fn test_insecure_exchange_is_plain() {
        let mut session = Session::insecure(MockTransport::new());
        session.exchange(0xE0, 0x00, 0x00, 0x00, &[0x07]).unwrap();
        assert_eq!(session.transport().commands()[0].as_ref(), hex!("E00000000107"));
    }

    #[test]
    fn test_secure_exchange_wraps_body() {
        let mut session = Session::new(MockTransport::new(), SecureChannel::v2(KEY));
        session.exchange(0xE0, 0x00, 0x00, 0x00, &[0x07]).unwrap();
        let command = &session.transport().commands()[0];
        assert_eq!(&command[..5], hex!("E000000010"));
        assert_ne!(command[5], 0x07);
    }

    #[test]
    fn test_status_error_keeps_session_open() {
        let transport = MockTransport::with_responses([Response::status_only(0x6A83)]);
        let mut session = Session::new(transport, SecureChannel::v2(KEY));
        let err = session.exchange(0xE0, 0x00, 0x00, 0x00, &[0x0C]).unwrap_err();
        assert_eq!(err.status_word().map(|sw| sw.to_u16()), Some(0x6A83));
        assert!(!session.is_closed());
        session.exchange(0xE0, 0x00, 0x00, 0x00, &[0x0B]).unwrap();
    }

    #[test]
    fn test_codec_failure_closes_session() {
        // 17 bytes can never be a valid v2 body
        let transport = MockTransport::with_responses([Response::success(vec![0u8; 17])]);
        let mut session = Session::new(transport, SecureChannel::v2(KEY));
        assert!(matches!(
            session.exchange(0xE0, 0x00, 0x00, 0x00, &[0x10]),
            Err(Error::SecureChannel(_))
        ));
        assert!(session.is_closed());
        assert!(matches!(
            session.exchange(0xE0, 0x00, 0x00, 0x00, &[0x10]),
            Err(Error::SessionClosed)
        ));
        assert_eq!(session.transport().commands().len(), 1);
    }

    #[test]
    fn test_mtu() {
        let session = Session::new(MockTransport::new(), SecureChannel::v3(KEY, KEY));
        assert_eq!(session.max_payload_size(), 0xF0);
    }
}
