//! Transport traits for APDU communication with devices
//!
//! A transport sends one command and returns one response. It knows nothing
//! about secure channels or the loader protocol layered on top.

pub mod error;
pub mod framed;
pub mod mock;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

use crate::command::{Command, MAX_SHORT_PAYLOAD};
use crate::response::Response;

/// Capability interface for devices reachable through APDU exchanges
///
/// Exchanges take `&mut self`: only one exchange can be in flight per
/// transport handle.
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes and return the raw response, status word included
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of [`transmit_raw`](Self::transmit_raw)
    ///
    /// This is the method that concrete implementations should override.
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Exchange a command and return the response without checking its status
    fn exchange(&mut self, command: &Command) -> Result<Response, TransportError> {
        let raw = command.to_bytes()?;
        let response = Response::from_bytes(&self.transmit_raw(&raw)?)?;
        trace!(
            ins = format_args!("{:#04x}", command.ins),
            sw = %response.status(),
            "APDU exchange complete"
        );
        Ok(response)
    }

    /// Exchange a command and reject status words outside the accepted class
    ///
    /// Success as well as the 61 XX and 6C XX classes are passed through; any
    /// other status becomes [`TransportError::Status`] carrying the data.
    fn transmit_accepted(&mut self, command: &Command) -> Result<Bytes, TransportError> {
        let response = self.exchange(command)?;
        if !response.status().is_accepted() {
            let (data, status) = response.into_parts();
            return Err(TransportError::status(status, data));
        }
        Ok(response.into_data())
    }

    /// Largest command payload the transport can carry
    fn max_payload_size(&self) -> usize {
        MAX_SHORT_PAYLOAD
    }

    /// Drop any partially exchanged state
    fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).do_transmit_raw(command)
    }

    fn max_payload_size(&self) -> usize {
        (**self).max_payload_size()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).do_transmit_raw(command)
    }

    fn max_payload_size(&self) -> usize {
        (**self).max_payload_size()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }
}
