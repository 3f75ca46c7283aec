//! Deterministic in-memory transport
//!
//! [`MockTransport`] answers commands either from a fixed response queue or
//! from a handler closure, and records every raw command it receives. With
//! no queue and no handler it acknowledges everything with `90 00`, which is
//! what a dry run of the loader needs.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

use super::{CardTransport, TransportError};
use crate::command::{Command, MAX_SHORT_PAYLOAD};
use crate::response::Response;

type Handler = Box<dyn FnMut(&Command) -> Response + Send>;

/// In-memory transport for tests and dry runs
pub struct MockTransport {
    responses: VecDeque<Response>,
    handler: Option<Handler>,
    commands: Vec<Bytes>,
    max_payload: usize,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("queued", &self.responses.len())
            .field("has_handler", &self.handler.is_some())
            .field("commands", &self.commands.len())
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Transport that answers every command with `90 00`
    pub const fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            handler: None,
            commands: Vec::new(),
            max_payload: MAX_SHORT_PAYLOAD,
        }
    }

    /// Transport that replays the given responses in order
    ///
    /// Once the queue is drained every further command gets `90 00`.
    pub fn with_responses(responses: impl IntoIterator<Item = Response>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            ..Self::new()
        }
    }

    /// Transport that computes each response from the command
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: FnMut(&Command) -> Response + Send + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Set the maximum command payload reported to callers
    pub const fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Raw commands received so far
    pub fn commands(&self) -> &[Bytes] {
        &self.commands
    }

    /// Parsed commands received so far
    pub fn parsed_commands(&self) -> Result<Vec<Command>, TransportError> {
        self.commands.iter().map(|c| Command::from_bytes(c)).collect()
    }
}

impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.commands.push(Bytes::copy_from_slice(command));

        let response = if let Some(response) = self.responses.pop_front() {
            response
        } else if let Some(handler) = self.handler.as_mut() {
            handler(&Command::from_bytes(command)?)
        } else {
            Response::success(Bytes::new())
        };

        Ok(response.to_bytes())
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_default_acknowledges() {
        let mut transport = MockTransport::new();
        let response = transport
            .exchange(&Command::new(0xE0, 0x53, 0x00, 0x00))
            .unwrap();
        assert!(response.is_success());
        assert!(response.data().is_empty());
        assert_eq!(transport.commands()[0].as_ref(), hex!("E053000000"));
    }

    #[test]
    fn test_queue_then_default() {
        let mut transport = MockTransport::with_responses([
            Response::new(Bytes::from_static(&[1, 2]), 0x9000),
            Response::status_only(0x6985),
        ]);
        let command = Command::new(0xE0, 0x00, 0x00, 0x00);

        assert_eq!(transport.exchange(&command).unwrap().data().as_ref(), &[1, 2]);
        assert_eq!(
            transport.exchange(&command).unwrap().status().to_u16(),
            0x6985
        );
        assert!(transport.exchange(&command).unwrap().is_success());
        assert_eq!(transport.commands().len(), 3);
    }

    #[test]
    fn test_handler() {
        let mut transport =
            MockTransport::with_handler(|command| Response::success(command.data.clone()));
        let command = Command::new_with_data(0xE0, 0xD8, 0x00, 0x00, &b"Boilerplate"[..]);
        let response = transport.exchange(&command).unwrap();
        assert_eq!(response.data().as_ref(), b"Boilerplate");
        assert_eq!(transport.parsed_commands().unwrap()[0], command);
    }
}
