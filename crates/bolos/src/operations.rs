//! One-call device operations
//!
//! Each operation opens its own session: handshake, secure channel, the
//! commands it needs, then the session is dropped. A random root key is
//! generated when none is configured, which is enough for devices that
//! accept self-signed hosts.

use bytes::Bytes;
use k256::ecdsa::SigningKey;
use sideload_apdu_core::CardTransport;
use tracing::{debug, info};

use crate::apps::{AppInfo, MemoryInfo};
use crate::constants::{
    CLEAR_DATA_BLOCK_LENGTH, DEFAULT_LOAD_CHUNK, FLAG_CLEAR_DATA_BLOCKS, PAGE_ALIGNMENT,
};
use crate::crypto::{random_signing_key, sign_prehash};
use crate::error::{ImageError, Result};
use crate::handshake::HandshakeConfig;
use crate::image::{MemoryArea, MemoryImage};
use crate::loader::{AppHash, CreateAppParams, LegacyAppParams, LoadOptions, Loader, LoaderConfig};
use crate::params::{AppDescriptor, Dependency, DerivationPolicy, InstallParams};
use crate::session::Session;
use crate::target::TargetId;

/// How to reach and authenticate to a device
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Device model
    pub target_id: TargetId,
    /// Host root key, random when `None`
    pub root_key: Option<SigningKey>,
    /// Signer certificates presented instead of a self-signed one
    pub signer_chain: Vec<Vec<u8>>,
    /// Negotiate v2 even on v3 targets
    pub force_scp_v2: bool,
}

impl SessionOptions {
    /// Options for `target_id` with a random root key
    pub fn new(target_id: TargetId) -> Self {
        Self {
            target_id,
            ..Default::default()
        }
    }

    /// Authenticate with `root_key`
    pub fn with_root_key(mut self, root_key: SigningKey) -> Self {
        self.root_key = Some(root_key);
        self
    }

    /// Force the v2 secret shape
    pub const fn with_force_scp_v2(mut self, force: bool) -> Self {
        self.force_scp_v2 = force;
        self
    }

    /// Handshake parameters, generating a root key if needed
    pub fn handshake_config(&self) -> HandshakeConfig {
        let master_key = self.root_key.clone().unwrap_or_else(|| {
            debug!("No root key configured, using a random one");
            random_signing_key()
        });
        HandshakeConfig::new(master_key, self.target_id)
            .with_signer_chain(self.signer_chain.clone())
            .with_force_scp_v2(self.force_scp_v2)
    }

    /// Run the handshake and open a secure session
    pub fn open<T: CardTransport>(&self, transport: T) -> Result<Session<T>> {
        let session = Session::establish(transport, &self.handshake_config())?;
        info!(
            target_id = %self.target_id,
            scp = ?session.scp_version(),
            "Secure session established"
        );
        Ok(session)
    }
}

/// Every knob of [`load_app`]
#[derive(Debug, Clone)]
pub struct LoadAppOptions {
    /// Connection and authentication
    pub session: SessionOptions,
    /// Target firmware version, hashed on recent targets
    pub target_version: Option<String>,
    /// API level, `None` for the pre API level create layout
    pub api_level: Option<u8>,
    /// Application name
    pub app_name: String,
    /// Application version
    pub app_version: Option<String>,
    /// Raw icon bitmap
    pub icon: Option<Vec<u8>>,
    /// Curves and paths the application may derive on
    pub derivation: DerivationPolicy,
    /// Application flags
    pub flags: u32,
    /// Entry point, the image's start linear address when `None`
    pub boot_address: Option<u32>,
    /// Key signing the content hash
    pub signing_key: Option<SigningKey>,
    /// Detached DER signature, takes precedence over `signing_key`
    pub signature: Option<Vec<u8>>,
    /// Delete an application of the same name first
    pub delete: bool,
    /// Create with install parameters rather than the legacy layout
    pub tlv: bool,
    /// Data section length at the end of the image
    pub data_size: Option<u32>,
    /// Size of an install parameter section already present in the image
    pub install_params_size: Option<u32>,
    /// Library dependencies
    pub dependencies: Vec<Dependency>,
    /// Ask the device to check segment CRCs
    pub crc: bool,
}

impl LoadAppOptions {
    /// Defaults for installing `app_name` on `target_id`
    pub fn new(target_id: TargetId, app_name: impl Into<String>) -> Self {
        Self {
            session: SessionOptions::new(target_id),
            target_version: None,
            api_level: None,
            app_name: app_name.into(),
            app_version: None,
            icon: None,
            derivation: DerivationPolicy::default(),
            flags: 0,
            boot_address: None,
            signing_key: None,
            signature: None,
            delete: false,
            tlv: true,
            data_size: None,
            install_params_size: None,
            dependencies: Vec::new(),
            crc: true,
        }
    }

    /// Set the application version
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    /// Set the API level
    pub const fn with_api_level(mut self, api_level: u8) -> Self {
        self.api_level = Some(api_level);
        self
    }

    /// Set the application flags
    pub const fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Restrict derivation
    pub fn with_derivation(mut self, derivation: DerivationPolicy) -> Self {
        self.derivation = derivation;
        self
    }

    /// Sign the content hash with `key`
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Delete any previous installation first
    pub const fn with_delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Use the legacy create layout
    pub const fn with_tlv(mut self, tlv: bool) -> Self {
        self.tlv = tlv;
        self
    }

    const fn clear_data(&self) -> bool {
        self.flags & FLAG_CLEAR_DATA_BLOCKS != 0
    }
}

/// Install the application in `image` and return its content hash
pub fn load_app<T: CardTransport>(
    transport: T,
    image: &MemoryImage,
    options: &LoadAppOptions,
) -> Result<AppHash> {
    options.derivation.encode()?;
    let session = options.session.open(transport)?;
    install_app(session, image, options)
}

/// Run the install flow over an already open session
///
/// Over an insecure session on a mock transport this is a dry run that
/// yields the same content hash a device would compute.
pub fn install_app<T: CardTransport>(
    session: Session<T>,
    image: &MemoryImage,
    options: &LoadAppOptions,
) -> Result<AppHash> {
    if image.is_empty() {
        return Err(ImageError::Empty.into());
    }
    let mut image = image.clone();
    let min_address = image.min_address();
    let max_address = image.max_address();
    let boot_address = options.boot_address.unwrap_or(image.boot_address());
    let path = options.derivation.encode()?;

    let config = LoaderConfig::default()
        .with_clear_data_block_len(options.clear_data().then_some(CLEAR_DATA_BLOCK_LENGTH));
    let mut loader = Loader::new(session, config);

    if options.delete && !options.clear_data() {
        if let Err(e) = loader.delete_app(&options.app_name) {
            debug!(error = %e, "Delete failed, application may not exist");
        }
    }

    let data_size = options.data_size.unwrap_or(0);
    if options.tlv {
        let mut code_length = max_address.wrapping_sub(min_address);
        if let Some(data_size) = options.data_size {
            code_length = code_length.wrapping_sub(data_size);
        }

        let prebuilt = options.install_params_size.is_some_and(|size| size > 0);
        let build = !options.clear_data() && !prebuilt;
        let params = InstallParams {
            dependencies: options.dependencies.clone(),
            app: build.then(|| AppDescriptor {
                name: options.app_name.clone(),
                version: options.app_version.clone(),
                icon: options.icon.clone(),
                derivation: options.derivation.clone(),
            }),
        }
        .encode()?;

        if build {
            let start = max_address
                .wrapping_add((PAGE_ALIGNMENT - data_size % PAGE_ALIGNMENT) % PAGE_ALIGNMENT);
            debug!(
                start = format_args!("{start:#010x}"),
                length = params.len(),
                "Appending install parameters"
            );
            image.add_area(MemoryArea::new(start, params.clone()));
        }

        let install_params_length = match options.install_params_size {
            Some(size) if size > 0 => {
                code_length = code_length.wrapping_sub(size);
                size
            }
            _ => params.len() as u32,
        };

        let boot_offset = if boot_address > min_address {
            boot_address - min_address
        } else {
            boot_address
        };

        loader.create_app(&CreateAppParams {
            code_length,
            api_level: options.api_level,
            data_length: data_size,
            install_params_length,
            flags: options.flags,
            boot_offset: boot_offset | 1,
        })?;
    } else {
        loader.create_app_no_install_params(&LegacyAppParams {
            flags: options.flags,
            length: max_address.wrapping_sub(min_address),
            name: options.app_name.clone(),
            icon: options.icon.clone(),
            path: Some(path),
            icon_location: None,
            version: options.app_version.clone(),
        })?;
    }

    let load_options = LoadOptions {
        reverse: false,
        crc: options.crc,
        target_id: Some(options.session.target_id),
        target_version: options.target_version.clone(),
    };
    let hash = loader.load(&image, DEFAULT_LOAD_CHUNK, &load_options)?;

    let signature = match (&options.signature, &options.signing_key) {
        (Some(signature), _) => Some(signature.clone()),
        (None, Some(key)) => Some(sign_prehash(key, hash.as_bytes())?),
        (None, None) => None,
    };

    if options.tlv {
        loader.commit(signature.as_deref())?;
    } else {
        loader.boot(boot_address.wrapping_sub(min_address), signature.as_deref())?;
    }

    info!(app = %options.app_name, %hash, "Application installed");
    Ok(hash)
}

/// Delete the application called `name`
pub fn delete_app<T: CardTransport>(transport: T, name: &str, options: &SessionOptions) -> Result<()> {
    let mut loader = Loader::new(options.open(transport)?, LoaderConfig::default());
    loader.delete_app(name)
}

/// Delete the application with full hash `hash`
pub fn delete_app_by_hash<T: CardTransport>(
    transport: T,
    hash: &[u8],
    options: &SessionOptions,
) -> Result<()> {
    let mut loader = Loader::new(options.open(transport)?, LoaderConfig::default());
    loader.delete_app_by_hash(hash)
}

/// Every installed application
pub fn list_apps<T: CardTransport>(transport: T, options: &SessionOptions) -> Result<Vec<AppInfo>> {
    let mut loader = Loader::new(options.open(transport)?, LoaderConfig::default());
    loader.list_apps()
}

/// Memory usage summary
pub fn get_memory_info<T: CardTransport>(transport: T, options: &SessionOptions) -> Result<MemoryInfo> {
    let mut loader = Loader::new(options.open(transport)?, LoaderConfig::default());
    loader.get_memory_info()
}

/// Raw dashboard version response
pub fn get_version<T: CardTransport>(transport: T, options: &SessionOptions) -> Result<Bytes> {
    let mut loader = Loader::new(options.open(transport)?, LoaderConfig::default());
    loader.get_version()
}

/// Install a custom certificate authority
pub fn setup_custom_ca<T: CardTransport>(
    transport: T,
    name: &str,
    public_key: &[u8],
    options: &SessionOptions,
) -> Result<()> {
    let mut loader = Loader::new(options.open(transport)?, LoaderConfig::default());
    loader.setup_custom_ca(name, public_key)
}

/// Remove the custom certificate authority
pub fn reset_custom_ca<T: CardTransport>(transport: T, options: &SessionOptions) -> Result<()> {
    let mut loader = Loader::new(options.open(transport)?, LoaderConfig::default());
    loader.reset_custom_ca()
}
