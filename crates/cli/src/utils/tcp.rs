//! TCP transport to a device proxy or emulator
//!
//! Each command is sent as a big-endian u32 length followed by the APDU.
//! The reply is a big-endian u32 length of the response data, the data,
//! then the two status word bytes.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use sideload_apdu_core::{Bytes, CardTransport, TransportError};
use tracing::debug;

/// APDU transport over a TCP stream
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    timeout: Duration,
}

impl TcpTransport {
    /// Connect to `host:port`, waiting at most `timeout` for each response
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        debug!(host, port, "Connected to device proxy");
        Ok(Self { stream, timeout })
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), TransportError> {
        self.stream.read_exact(buffer).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout(self.timeout),
            _ => TransportError::Io(e),
        })
    }
}

impl CardTransport for TcpTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let mut frame = Vec::with_capacity(command.len() + 4);
        frame.extend_from_slice(&(command.len() as u32).to_be_bytes());
        frame.extend_from_slice(command);
        self.stream.write_all(&frame)?;

        let mut header = [0u8; 4];
        self.read_exact(&mut header)?;
        let length = u32::from_be_bytes(header) as usize;

        // status word follows the counted data
        let mut response = vec![0u8; length + 2];
        self.read_exact(&mut response)?;
        Ok(Bytes::from(response))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use sideload_apdu_core::Command;

    #[test]
    fn test_exchange_with_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut header = [0u8; 4];
            socket.read_exact(&mut header).unwrap();
            let mut apdu = vec![0u8; u32::from_be_bytes(header) as usize];
            socket.read_exact(&mut apdu).unwrap();
            socket.write_all(&[0, 0, 0, 2, 0xAA, 0xBB, 0x90, 0x00]).unwrap();
            apdu
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        let response = transport
            .exchange(&Command::new(0xE0, 0x01, 0x00, 0x00))
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.data().as_ref(), &[0xAA, 0xBB]);
        assert_eq!(server.join().unwrap(), vec![0xE0, 0x01, 0x00, 0x00, 0x00]);
    }
}
