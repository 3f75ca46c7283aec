//! Sideloading for BOLOS devices
//!
//! This crate implements the host side of the dashboard's secure loader:
//!
//! - the [`handshake`] that authenticates host and device and derives the
//!   secure channel secret
//! - the [`SecureChannel`] codec (v2 and v3) and the [`Session`] handle that
//!   runs every command through it
//! - [`MemoryImage`] with an Intel HEX reader, install parameter encoding
//!   and the [`Loader`] that streams an image into the device
//! - one-call [`operations`] such as [`load_app`] and [`list_apps`]
//!
//! Transports come from `sideload-apdu-core`; anything implementing
//! [`CardTransport`](sideload_apdu_core::CardTransport) works.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod apps;
pub mod constants;
mod crc;
pub mod crypto;
mod error;
pub mod handshake;
mod hex_file;
mod image;
pub mod loader;
pub mod operations;
pub mod params;
pub mod scp;
mod session;
pub mod status;
mod target;

pub use apps::{AppInfo, MemoryInfo};
pub use crc::crc16;
pub use error::{
    CertificateError, EncodingError, Error, ImageError, Result, ResultExt, ScpError,
};
pub use handshake::{DeviceCertificate, HandshakeConfig};
pub use image::{MemoryArea, MemoryImage};
pub use loader::{AppHash, CreateAppParams, LegacyAppParams, LoadOptions, Loader, LoaderConfig};
pub use operations::{
    LoadAppOptions, SessionOptions, delete_app, delete_app_by_hash, get_memory_info, get_version,
    install_app, list_apps, load_app, reset_custom_ca, setup_custom_ca,
};
pub use params::{AppDescriptor, Bip32Path, Curve, Dependency, DerivationPolicy, InstallParams};
pub use scp::{DeployedSecret, SecureChannel};
pub use session::Session;
pub use target::{ScpVersion, TargetId};

pub use k256::ecdsa::SigningKey;
pub use sideload_apdu_core as apdu;

/// Prelude module containing commonly used types
pub mod prelude {
    pub use crate::{
        AppHash, Error, LoadAppOptions, Loader, LoaderConfig, MemoryImage, Result, Session,
        SessionOptions, TargetId,
    };
    pub use sideload_apdu_core::prelude::*;
}
