//! APDU response definitions
//!
//! A response is the payload returned by the device followed by the two
//! status bytes. The status word is never dropped: callers decide which
//! classes they accept.

pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::transport::TransportError;
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data
    data: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(data: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            data: data.into(),
            status: status.into(),
        }
    }

    /// Create a success response
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self::new(data, status::common::SUCCESS)
    }

    /// Create an empty response carrying only a status word
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(raw: &[u8]) -> Result<Self, TransportError> {
        if raw.len() < 2 {
            return Err(TransportError::ResponseTooShort(raw.len()));
        }

        let split = raw.len() - 2;
        let status = StatusWord::new(raw[split], raw[split + 1]);
        let data = Bytes::copy_from_slice(&raw[..split]);

        trace!(
            sw = %status,
            data_len = data.len(),
            "Parsed APDU response"
        );

        Ok(Self { data, status })
    }

    /// Get the response payload data
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Consume the response and return its payload
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Split the response into payload and status
    pub fn into_parts(self) -> (Bytes, StatusWord) {
        (self.data, self.status)
    }

    /// Serialize back into `data || sw1 || sw2`
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_response_from_bytes() {
        let resp = Response::from_bytes(&hex!("0102039000")).unwrap();
        assert_eq!(resp.data().as_ref(), hex!("010203"));
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
        assert!(resp.is_success());

        let resp = Response::from_bytes(&hex!("6985")).unwrap();
        assert!(resp.data().is_empty());
        assert_eq!(resp.status().to_u16(), 0x6985);
    }

    #[test]
    fn test_response_too_short() {
        assert!(matches!(
            Response::from_bytes(&[0x90]),
            Err(TransportError::ResponseTooShort(1))
        ));
    }

    #[test]
    fn test_response_to_bytes() {
        let resp = Response::new(Bytes::from_static(&[0xAA]), 0x6A84);
        assert_eq!(Bytes::from(resp).as_ref(), hex!("AA6A84"));
    }
}
