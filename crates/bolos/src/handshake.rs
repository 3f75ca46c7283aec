//! Secure channel handshake
//!
//! ```text
//! IDENTIFY → GET_NONCE → VALIDATE_CERT(signer) → VALIDATE_CERT(ephemeral, last)
//!          → GET_CERT(0) → GET_CERT(1, last) → COMMIT → ECDH
//! ```
//!
//! Only the nonce exchange and the device ephemeral certificate are hard
//! requirements. The other steps log a warning and carry on, which is what
//! devices in sideload or onboarding states expect.

use bytes::Bytes;
use k256::{
    PublicKey, SecretKey,
    ecdsa::{SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand::{RngCore, rng};
use sideload_apdu_core::{CardTransport, Command, Response};
use tracing::{debug, info, warn};

use crate::constants::{HOST_NONCE_LENGTH, NONCE_RESPONSE_LENGTH, cla, ins, p1, role};
use crate::crypto::{ecdh_secret, sign_message, uncompressed, verify_message};
use crate::error::{CertificateError, Error, Result, ResultExt};
use crate::scp::DeployedSecret;
use crate::status::possible_cause;
use crate::target::{ScpVersion, TargetId};

/// Parameters of one handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Key the host certificates are signed with
    pub master_key: SigningKey,
    /// Device model
    pub target_id: TargetId,
    /// Signer certificates sent instead of the self-signed one
    pub signer_chain: Vec<Vec<u8>>,
    /// Negotiate v2 even on v3 targets
    pub force_scp_v2: bool,
}

impl HandshakeConfig {
    /// Handshake with a self-signed master certificate
    pub const fn new(master_key: SigningKey, target_id: TargetId) -> Self {
        Self {
            master_key,
            target_id,
            signer_chain: Vec::new(),
            force_scp_v2: false,
        }
    }

    /// Present an externally issued signer chain
    pub fn with_signer_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.signer_chain = chain;
        self
    }

    /// Force the v2 secret shape
    pub const fn with_force_scp_v2(mut self, force: bool) -> Self {
        self.force_scp_v2 = force;
        self
    }

    /// Protocol version the handshake will produce
    pub fn scp_version(&self) -> Result<ScpVersion> {
        let version = self.target_id.scp_version()?;
        Ok(if self.force_scp_v2 {
            ScpVersion::V2
        } else {
            version
        })
    }
}

/// Certificate returned by GET_CERT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCertificate {
    /// Opaque header, signed together with the key
    pub header: Bytes,
    /// SEC1 public key
    pub public_key: Bytes,
    /// DER signature by the previous key in the chain
    pub signature: Bytes,
}

/// Cursor over length-prefixed fields
struct LvReader<'a> {
    data: &'a [u8],
}

impl<'a> LvReader<'a> {
    fn read(&mut self, field: &'static str) -> Result<&'a [u8], CertificateError> {
        let (&length, rest) = self.data.split_first().ok_or(CertificateError::Truncated {
            field,
            needed: 1,
            available: 0,
        })?;
        let length = length as usize;
        if rest.len() < length {
            return Err(CertificateError::Truncated {
                field,
                needed: length,
                available: rest.len(),
            });
        }
        let (value, rest) = rest.split_at(length);
        self.data = rest;
        Ok(value)
    }
}

impl DeviceCertificate {
    /// Decode `[len header][len public key][len signature]`
    pub fn parse(data: &[u8]) -> Result<Self, CertificateError> {
        let mut reader = LvReader { data };
        Ok(Self {
            header: Bytes::copy_from_slice(reader.read("header")?),
            public_key: Bytes::copy_from_slice(reader.read("public key")?),
            signature: Bytes::copy_from_slice(reader.read("signature")?),
        })
    }

    /// Message the device signed for chain position `index`
    fn signed_message(&self, index: usize, host_nonce: &[u8], device_nonce: &[u8]) -> Vec<u8> {
        if index == 0 {
            [&[role::DEVICE][..], &self.header[..], &self.public_key[..]].concat()
        } else {
            [
                &[role::DEVICE_EPHEMERAL][..],
                device_nonce,
                host_nonce,
                &self.public_key[..],
            ]
            .concat()
        }
    }
}

/// Host certificate layout: `[len public key][len signature]`
pub fn host_certificate(public_key: &[u8], signature: &[u8]) -> Vec<u8> {
    let mut certificate = Vec::with_capacity(2 + public_key.len() + signature.len());
    certificate.push(public_key.len() as u8);
    certificate.extend_from_slice(public_key);
    certificate.push(signature.len() as u8);
    certificate.extend_from_slice(signature);
    certificate
}

fn tolerate<T: CardTransport + ?Sized>(
    transport: &mut T,
    command: &Command,
    step: &'static str,
) -> Result<Response> {
    let response = transport.exchange(command)?;
    if !response.is_success() {
        let sw = response.status();
        warn!(
            step,
            sw = %sw,
            cause = %possible_cause(sw.to_u16()),
            "Handshake step rejected, continuing"
        );
    }
    Ok(response)
}

/// Run the handshake and return the negotiated secret
pub fn establish<T: CardTransport + ?Sized>(
    transport: &mut T,
    config: &HandshakeConfig,
) -> Result<DeployedSecret> {
    let version = config.scp_version()?;
    let master_public = uncompressed(config.master_key.verifying_key());
    debug!(target_id = %config.target_id, %version, "Starting secure channel handshake");

    // IDENTIFY
    let identify = Command::new_with_data(
        cla::DEFAULT,
        ins::IDENTIFY,
        0x00,
        0x00,
        config.target_id.to_bytes().to_vec(),
    );
    tolerate(transport, &identify, "IDENTIFY")?;

    // GET_NONCE
    let mut host_nonce = [0u8; HOST_NONCE_LENGTH];
    rng().fill_bytes(&mut host_nonce);
    let command = Command::new_with_data(
        cla::DEFAULT,
        ins::GET_NONCE,
        0x00,
        0x00,
        host_nonce.to_vec(),
    );
    let response = transport.exchange(&command)?;
    if !response.is_success() {
        let (data, status) = response.into_parts();
        return Err(Error::device_status(status, data)).context("GET_NONCE");
    }
    let auth_info = response.into_data();
    if auth_info.len() < NONCE_RESPONSE_LENGTH {
        return Err(Error::Handshake(format!(
            "GET_NONCE returned {} bytes, need {NONCE_RESPONSE_LENGTH}",
            auth_info.len()
        )));
    }
    let device_nonce = auth_info.slice(4..NONCE_RESPONSE_LENGTH);
    debug!(
        batch_signer = %hex::encode(&auth_info[..4]),
        device_nonce = %hex::encode(&device_nonce),
        "Received device nonce"
    );

    // VALIDATE_CERT, signer
    if config.signer_chain.is_empty() {
        let signature = sign_message(
            &config.master_key,
            &[&[role::SIGNER][..], master_public.as_slice()].concat(),
        );
        let certificate = host_certificate(&master_public, &signature);
        let command = Command::new_with_data(
            cla::DEFAULT,
            ins::VALIDATE_CERTIFICATE,
            p1::FIRST,
            0x00,
            certificate,
        );
        tolerate(transport, &command, "VALIDATE_CERT signer")?;
    } else {
        for certificate in &config.signer_chain {
            let command = Command::new_with_data(
                cla::DEFAULT,
                ins::VALIDATE_CERTIFICATE,
                p1::FIRST,
                0x00,
                certificate.clone(),
            );
            tolerate(transport, &command, "VALIDATE_CERT chain")?;
        }
    }

    // VALIDATE_CERT, ephemeral
    let ephemeral = SecretKey::random(&mut rand_v8::thread_rng());
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);
    let signed = [
        &[role::SIGNER_EPHEMERAL][..],
        &host_nonce[..],
        &device_nonce[..],
        ephemeral_public.as_bytes(),
    ]
    .concat();
    let signature = sign_message(&config.master_key, &signed);
    let command = Command::new_with_data(
        cla::DEFAULT,
        ins::VALIDATE_CERTIFICATE,
        p1::LAST,
        0x00,
        host_certificate(ephemeral_public.as_bytes(), &signature),
    );
    tolerate(transport, &command, "VALIDATE_CERT ephemeral")?;

    // GET_CERT ×2
    let mut last_device_key = *config.master_key.verifying_key();
    let mut device_public_key = None;
    for index in 0..2 {
        let p1 = if index == 0 { p1::FIRST } else { p1::LAST };
        let command = Command::new(cla::DEFAULT, ins::GET_CERTIFICATE, p1, 0x00);
        let response = tolerate(transport, &command, "GET_CERT")?;
        if response.data().is_empty() {
            warn!(index, "Empty device certificate, skipping");
            continue;
        }

        let certificate = DeviceCertificate::parse(response.data())?;
        if index == 0 {
            device_public_key = Some(certificate.public_key.to_vec());
        }

        let message = certificate.signed_message(index, &host_nonce, &device_nonce);
        let verified = verify_message(&last_device_key, &message, &certificate.signature)
            .unwrap_or(false);
        match (verified, index) {
            (true, _) => debug!(index, "Device certificate verified"),
            (false, 0) => warn!("Broken certificate chain - loading from user key"),
            (false, _) => return Err(CertificateError::BrokenChain.into()),
        }

        last_device_key = VerifyingKey::from_sec1_bytes(&certificate.public_key)
            .map_err(|_| CertificateError::InvalidPublicKey)?;
    }

    // COMMIT
    let commit = Command::new(cla::DEFAULT, ins::MUTUAL_AUTHENTICATE, 0x00, 0x00);
    tolerate(transport, &commit, "COMMIT")?;

    let secret = ecdh_secret(&ephemeral, &PublicKey::from(&last_device_key));
    info!(%version, "Secure channel established");

    Ok(match version {
        ScpVersion::V2 => {
            let mut key = [0u8; 16];
            key.copy_from_slice(&secret[..16]);
            DeployedSecret::V2(key)
        }
        ScpVersion::V3 => DeployedSecret::V3 {
            secret,
            device_public_key,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use sideload_apdu_core::MockTransport;

    #[test]
    fn test_parse_certificate() {
        let certificate = DeviceCertificate::parse(&hex!("02AABB" "03040506" "01FF")).unwrap();
        assert_eq!(certificate.header.as_ref(), hex!("AABB"));
        assert_eq!(certificate.public_key.as_ref(), hex!("040506"));
        assert_eq!(certificate.signature.as_ref(), hex!("FF"));
    }

    #[test]
    fn test_parse_truncated_certificate() {
        assert_eq!(
            DeviceCertificate::parse(&hex!("02AABB" "41040506")),
            Err(CertificateError::Truncated {
                field: "public key",
                needed: 0x41,
                available: 3
            })
        );
        assert_eq!(
            DeviceCertificate::parse(&hex!("02AABB" "0104")),
            Err(CertificateError::Truncated {
                field: "signature",
                needed: 1,
                available: 0
            })
        );
    }

    #[test]
    fn test_host_certificate_layout() {
        assert_eq!(host_certificate(&hex!("0401"), &hex!("3000")), hex!("020401023000"));
    }

    #[test]
    fn test_old_target_is_rejected_before_any_exchange() {
        let mut transport = MockTransport::new();
        let config = HandshakeConfig::new(crate::crypto::random_signing_key(), TargetId(0x3110_0001));
        assert!(matches!(
            establish(&mut transport, &config),
            Err(Error::UnsupportedTarget(0x3110_0001))
        ));
        assert!(transport.commands().is_empty());
    }

    #[test]
    fn test_nonce_failure_is_fatal() {
        let mut transport = MockTransport::with_responses([
            Response::status_only(0x6D00),
            Response::status_only(0x6985),
        ]);
        let config = HandshakeConfig::new(crate::crypto::random_signing_key(), TargetId::NANO_X);
        let err = establish(&mut transport, &config).unwrap_err();
        assert_eq!(err.status_word().map(|sw| sw.to_u16()), Some(0x6985));
        assert_eq!(transport.commands().len(), 2);
    }

    #[test]
    fn test_short_nonce_is_fatal() {
        let mut transport = MockTransport::with_responses([
            Response::success(Bytes::new()),
            Response::success(Bytes::from_static(&[0; 11])),
        ]);
        let config = HandshakeConfig::new(crate::crypto::random_signing_key(), TargetId::NANO_X);
        assert!(matches!(
            establish(&mut transport, &config),
            Err(Error::Handshake(_))
        ));
    }

    #[test]
    fn test_force_v2() {
        let config = HandshakeConfig::new(crate::crypto::random_signing_key(), TargetId::STAX)
            .with_force_scp_v2(true);
        assert_eq!(config.scp_version().unwrap(), ScpVersion::V2);
    }
}
