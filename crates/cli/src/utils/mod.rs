//! Shared argument groups and parsers for the sideload CLI

pub mod display;
pub mod tcp;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use sideload_bolos::{
    Bip32Path, Curve, Dependency, DerivationPolicy, LoadAppOptions, MemoryImage, SessionOptions,
    SigningKey, TargetId,
};

pub use tcp::TcpTransport;

/// Parse a hex encoded secp256k1 private key
pub fn parse_signing_key(s: &str) -> Result<SigningKey, String> {
    let bytes = parse_hex(s)?;
    SigningKey::from_slice(&bytes).map_err(|e| format!("invalid private key: {e}"))
}

/// Parse a decimal or `0x` prefixed hexadecimal u32
pub fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

/// Decode a hex string, tolerating a `0x` prefix
pub fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| format!("invalid hex: {e}"))
}

/// Where the device is and how to authenticate to it
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Host of the device proxy
    #[arg(long, env = "SIDELOAD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the device proxy
    #[arg(long, env = "SIDELOAD_PORT", default_value_t = 9999)]
    pub port: u16,

    /// Seconds to wait for a response
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Device model name or hex target id
    #[arg(long, env = "SIDELOAD_TARGET_ID", default_value = "nanosp")]
    pub target_id: TargetId,

    /// Host root private key in hex (random when omitted)
    #[arg(long, env = "SIDELOAD_ROOT_KEY", value_parser = parse_signing_key, hide_env_values = true)]
    pub root_key: Option<SigningKey>,

    /// Negotiate SCP v2 even on v3 targets
    #[arg(long)]
    pub force_scp_v2: bool,
}

impl DeviceArgs {
    /// Session options for the configured target and root key
    pub fn session_options(&self) -> SessionOptions {
        let options = SessionOptions::new(self.target_id).with_force_scp_v2(self.force_scp_v2);
        match &self.root_key {
            Some(key) => options.with_root_key(key.clone()),
            None => options,
        }
    }

    /// Connect to the device proxy
    pub fn connect(&self) -> anyhow::Result<TcpTransport> {
        TcpTransport::connect(&self.host, self.port, Duration::from_secs(self.timeout))
            .with_context(|| format!("Failed to connect to {}:{}", self.host, self.port))
    }
}

/// Application image and metadata shared by `load` and `hash`
#[derive(Args, Debug, Clone)]
pub struct AppArgs {
    /// Intel HEX file of the application
    #[arg(required = true)]
    pub file: PathBuf,

    /// Application name
    #[arg(long)]
    pub name: String,

    /// Application version
    #[arg(long)]
    pub app_version: Option<String>,

    /// Icon bitmap in hex
    #[arg(long, value_parser = parse_hex)]
    pub icon: Option<HexBytes>,

    /// Curve the application may derive on (repeatable)
    #[arg(long = "curve")]
    pub curves: Vec<Curve>,

    /// BIP32 path prefix, e.g. 44'/60' (repeatable)
    #[arg(long = "path")]
    pub paths: Vec<Bip32Path>,

    /// SLIP-21 path label (repeatable)
    #[arg(long = "path-slip21")]
    pub slip21_paths: Vec<String>,

    /// Application flags
    #[arg(long, value_parser = parse_u32, default_value = "0")]
    pub flags: u32,

    /// Entry point, the file's start address when omitted
    #[arg(long, value_parser = parse_u32)]
    pub boot_address: Option<u32>,

    /// API level of the SDK the application was built with
    #[arg(long)]
    pub api_level: Option<u8>,

    /// Size of the data section at the end of the image
    #[arg(long, value_parser = parse_u32)]
    pub data_size: Option<u32>,

    /// Size of an install parameter section already in the image
    #[arg(long, value_parser = parse_u32)]
    pub install_params_size: Option<u32>,

    /// Library dependency as name or name:version (repeatable)
    #[arg(long = "dep")]
    pub dependencies: Vec<Dependency>,

    /// Target firmware version
    #[arg(long)]
    pub target_version: Option<String>,

    /// Use the legacy create layout without install parameters
    #[arg(long)]
    pub legacy: bool,

    /// Skip the device side CRC check of each segment
    #[arg(long)]
    pub no_crc: bool,

    /// Private key signing the application hash, in hex
    #[arg(long, env = "SIDELOAD_SIGN_KEY", value_parser = parse_signing_key, hide_env_values = true)]
    pub sign_key: Option<SigningKey>,

    /// Detached DER signature over the application hash, in hex
    #[arg(long, value_parser = parse_hex)]
    pub signature: Option<HexBytes>,
}

/// Hex decoded bytes
///
/// Spelled as an alias so clap takes one value rather than a list of `u8`.
pub type HexBytes = Vec<u8>;

impl AppArgs {
    /// Read the Intel HEX file
    pub fn image(&self) -> anyhow::Result<MemoryImage> {
        MemoryImage::from_intel_hex_file(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))
    }

    /// Derivation policy from the curve and path flags
    pub fn derivation(&self) -> DerivationPolicy {
        DerivationPolicy {
            curves: (!self.curves.is_empty()).then(|| self.curves.clone()),
            bip32_paths: self.paths.clone(),
            slip21_paths: self.slip21_paths.clone(),
        }
    }

    /// Loader options for this application
    pub fn load_options(&self, session: SessionOptions) -> LoadAppOptions {
        let mut options = LoadAppOptions::new(session.target_id, &self.name)
            .with_flags(self.flags)
            .with_derivation(self.derivation())
            .with_tlv(!self.legacy);
        options.session = session;
        options.app_version = self.app_version.clone();
        options.api_level = self.api_level;
        options.icon = self.icon.clone();
        options.boot_address = self.boot_address;
        options.data_size = self.data_size;
        options.install_params_size = self.install_params_size;
        options.dependencies = self.dependencies.clone();
        options.target_version = self.target_version.clone();
        options.crc = !self.no_crc;
        options.signing_key = self.sign_key.clone();
        options.signature = self.signature.clone();
        options
    }
}
