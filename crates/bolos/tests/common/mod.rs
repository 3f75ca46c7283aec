//! Simulated device for integration tests
//!
//! [`SimulatedDevice`] plays the dashboard side of the handshake and runs a
//! mirrored secure channel codec, so every secure command the host sends can
//! be decoded and inspected in the clear.
#![allow(dead_code, unreachable_pub)]

use std::fmt;

use k256::{PublicKey, SecretKey, ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint};
use sideload_apdu_core::{Bytes, CardTransport, Command, Response, TransportError};
use sideload_bolos::{
    DeployedSecret, ScpVersion, SecureChannel, TargetId,
    crypto::{ecdh_secret, sign_message, uncompressed},
};

type Handler = Box<dyn FnMut(&[u8]) -> Response + Send>;

/// Device side of the handshake and secure loader
pub struct SimulatedDevice {
    pub target_id: TargetId,
    pub version: ScpVersion,
    /// Key that signs the device certificate
    pub issuer: SigningKey,
    device_key: SigningKey,
    ephemeral: SecretKey,
    device_nonce: [u8; 8],
    host_nonce: Vec<u8>,
    host_ephemeral: Option<PublicKey>,
    channel: Option<SecureChannel>,
    /// Sign the ephemeral certificate with the wrong key
    pub break_ephemeral_signature: bool,
    /// Sign the ephemeral certificate over host nonce before device nonce
    pub swap_ephemeral_nonces: bool,
    /// Decrypted secure command bodies, in order
    pub received: Vec<Vec<u8>>,
    /// Instructions of every command, in order
    pub instructions: Vec<u8>,
    handler: Option<Handler>,
}

impl fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("target_id", &self.target_id)
            .field("received", &self.received.len())
            .finish_non_exhaustive()
    }
}

impl SimulatedDevice {
    /// Device whose certificate is signed by `issuer`
    pub fn new(target_id: TargetId, issuer: SigningKey) -> Self {
        let version = target_id.scp_version().unwrap();
        Self {
            target_id,
            version,
            issuer,
            device_key: SigningKey::random(&mut rand_v8::thread_rng()),
            ephemeral: SecretKey::random(&mut rand_v8::thread_rng()),
            device_nonce: [0x5A; 8],
            host_nonce: Vec::new(),
            host_ephemeral: None,
            channel: None,
            break_ephemeral_signature: false,
            swap_ephemeral_nonces: false,
            received: Vec::new(),
            instructions: Vec::new(),
            handler: None,
        }
    }

    /// Negotiate `version` regardless of the target
    pub fn with_version(mut self, version: ScpVersion) -> Self {
        self.version = version;
        self
    }

    /// Answer decrypted secure commands with `handler`
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&[u8]) -> Response + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Whether the handshake completed
    pub fn is_secure(&self) -> bool {
        self.channel.is_some()
    }

    /// Ephemeral key the host announced, uncompressed
    pub fn host_ephemeral_key(&self) -> Option<Vec<u8>> {
        self.host_ephemeral
            .map(|key| key.to_encoded_point(false).as_bytes().to_vec())
    }

    /// Device public key, uncompressed
    pub fn device_public_key(&self) -> Vec<u8> {
        uncompressed(self.device_key.verifying_key())
    }

    fn certificate(header: &[u8], public_key: &[u8], signature: &[u8]) -> Vec<u8> {
        let mut out = vec![header.len() as u8];
        out.extend_from_slice(header);
        out.push(public_key.len() as u8);
        out.extend_from_slice(public_key);
        out.push(signature.len() as u8);
        out.extend_from_slice(signature);
        out
    }

    fn device_certificate(&self) -> Vec<u8> {
        let header = [0x01, 0x02];
        let public_key = self.device_public_key();
        let signature = sign_message(
            &self.issuer,
            &[&[0x02][..], &header[..], &public_key[..]].concat(),
        );
        Self::certificate(&header, &public_key, &signature)
    }

    fn ephemeral_certificate(&self) -> Vec<u8> {
        let public_key = self
            .ephemeral
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let (first, second) = if self.swap_ephemeral_nonces {
            (&self.host_nonce[..], &self.device_nonce[..])
        } else {
            (&self.device_nonce[..], &self.host_nonce[..])
        };
        let message = [&[0x12][..], first, second, &public_key[..]].concat();
        let signer = if self.break_ephemeral_signature {
            &self.issuer
        } else {
            &self.device_key
        };
        Self::certificate(&[], &public_key, &sign_message(signer, &message))
    }

    fn commit(&mut self) -> Response {
        let Some(host) = self.host_ephemeral else {
            return Response::status_only(0x6985);
        };
        let secret = ecdh_secret(&self.ephemeral, &host);
        let secret = match self.version {
            ScpVersion::V2 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(&secret[..16]);
                DeployedSecret::V2(key)
            }
            ScpVersion::V3 => DeployedSecret::V3 {
                secret,
                device_public_key: None,
            },
        };
        self.channel = Some(SecureChannel::from_secret(&secret).unwrap());
        Response::status_only(0x9000)
    }

    fn secure(&mut self, command: &Command) -> Response {
        let body = match self.channel.as_mut() {
            Some(channel) => match channel.unwrap(&command.data) {
                Ok(body) => body.to_vec(),
                Err(_) => return Response::status_only(0x6982),
            },
            None => command.data.to_vec(),
        };
        self.received.push(body.clone());

        let response = match self.handler.as_mut() {
            Some(handler) => handler(&body),
            None => Response::status_only(0x9000),
        };
        if !response.is_success() || response.data().is_empty() {
            return response;
        }

        let (data, status) = response.into_parts();
        let data = match self.channel.as_mut() {
            Some(channel) => channel.wrap(&data).unwrap(),
            None => data,
        };
        Response::new(data, status)
    }
}

impl CardTransport for SimulatedDevice {
    fn do_transmit_raw(&mut self, raw: &[u8]) -> Result<Bytes, TransportError> {
        let command = Command::from_bytes(raw)?;
        self.instructions.push(command.ins);

        let response = match command.ins {
            0x04 => Response::status_only(0x9000),
            0x50 => {
                self.host_nonce = command.data.to_vec();
                Response::success([&[0xDE, 0xAD, 0xBE, 0xEF][..], &self.device_nonce[..]].concat())
            }
            0x51 if command.p1 == 0x80 => {
                let length = command.data[0] as usize;
                self.host_ephemeral = PublicKey::from_sec1_bytes(&command.data[1..1 + length]).ok();
                Response::status_only(0x9000)
            }
            0x51 => Response::status_only(0x9000),
            0x52 if command.p1 == 0x00 => Response::success(self.device_certificate()),
            0x52 => Response::success(self.ephemeral_certificate()),
            0x53 => self.commit(),
            0x00 | 0xD8 => self.secure(&command),
            _ => Response::status_only(0x6D00),
        };
        Ok(response.to_bytes())
    }
}
