//! Application loader
//!
//! The [`Loader`] drives the dashboard's secure loader commands over a
//! [`Session`]. Every command goes out as `cla 00 00 00` with a body whose
//! first byte selects the operation.
//!
//! The content hash returned by [`Loader::load`] is the SHA-256 of
//!
//! ```text
//! [target_id ‖ target_version]   (targets whose low nibble is above 3)
//! create_app parameters          (TLV created applications only)
//! every forward chunk, in order
//! ```

use std::fmt;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use sideload_apdu_core::CardTransport;
use tracing::{debug, info, trace};

use crate::apps::{AppInfo, MemoryInfo};
use crate::constants::{BLOCK_LENGTH, CHUNK_OVERHEAD, MAX_SEGMENT_LENGTH, cla, ins, loader};
use crate::crc::crc16;
use crate::error::{EncodingError, Error, ImageError, Result, ResultExt};
use crate::image::MemoryImage;
use crate::session::Session;
use crate::target::TargetId;

/// Loader settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Class byte of every loader command
    pub cla: u8,
    /// Address segments relative to the image's lowest address
    pub relative: bool,
    /// Chunks must be a multiple of this length
    pub clear_data_block_len: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cla: cla::DEFAULT,
            relative: true,
            clear_data_block_len: None,
        }
    }
}

impl LoaderConfig {
    /// Use absolute segment addresses
    pub const fn with_relative(mut self, relative: bool) -> Self {
        self.relative = relative;
        self
    }

    /// Require chunks aligned to `block_len`
    pub const fn with_clear_data_block_len(mut self, block_len: Option<usize>) -> Self {
        self.clear_data_block_len = block_len;
        self
    }
}

/// Per-load options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Send areas and chunks from the end, without hashing them
    pub reverse: bool,
    /// Ask the device to check each segment's CRC
    pub crc: bool,
    /// Target hashed into the content hash
    pub target_id: Option<TargetId>,
    /// Target firmware version hashed after the target id
    pub target_version: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            reverse: false,
            crc: true,
            target_id: None,
            target_version: None,
        }
    }
}

/// SHA-256 content hash of a loaded application
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppHash(pub [u8; 32]);

impl AppHash {
    /// Raw digest
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AppHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for AppHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppHash({self})")
    }
}

/// Parameters of the install-parameter style create command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateAppParams {
    /// Code section length
    pub code_length: u32,
    /// API level, `None` for devices predating API levels
    pub api_level: Option<u8>,
    /// Data section length
    pub data_length: u32,
    /// Install parameters length
    pub install_params_length: u32,
    /// Application flags
    pub flags: u32,
    /// Entry point offset, odd for thumb code
    pub boot_offset: u32,
}

impl CreateAppParams {
    /// `[api_level] ‖ code ‖ data ‖ params ‖ flags ‖ boot`, all u32 BE
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(21);
        if let Some(api_level) = self.api_level {
            out.push(api_level);
        }
        for field in [
            self.code_length,
            self.data_length,
            self.install_params_length,
            self.flags,
            self.boot_offset,
        ] {
            out.extend_from_slice(&field.to_be_bytes());
        }
        out
    }
}

/// Parameters of the legacy create command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyAppParams {
    /// Application flags
    pub flags: u32,
    /// Application length
    pub length: u32,
    /// Application name
    pub name: String,
    /// Inline icon, ignored when `icon_location` is set
    pub icon: Option<Vec<u8>>,
    /// Encoded derivation path
    pub path: Option<Vec<u8>>,
    /// Icon offset and size inside the loaded code
    pub icon_location: Option<(u32, u16)>,
    /// Application version
    pub version: Option<String>,
}

fn short_field(field: &'static str, value: &[u8]) -> Result<u8, EncodingError> {
    u8::try_from(value.len()).map_err(|_| EncodingError::FieldTooLong {
        field,
        length: value.len(),
    })
}

fn push_lv(out: &mut Vec<u8>, field: &'static str, value: &[u8]) -> Result<(), EncodingError> {
    out.push(short_field(field, value)?);
    out.extend_from_slice(value);
    Ok(())
}

impl LegacyAppParams {
    /// Encoded command body without the leading tag
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        push_lv(&mut out, "app name", self.name.as_bytes())?;
        if self.icon_location.is_none() {
            push_lv(&mut out, "icon", self.icon.as_deref().unwrap_or_default())?;
        }
        push_lv(&mut out, "derivation path", self.path.as_deref().unwrap_or_default())?;
        if let Some((offset, size)) = self.icon_location {
            out.extend_from_slice(&offset.to_be_bytes());
            out.extend_from_slice(&size.to_be_bytes());
        }
        if let Some(version) = &self.version {
            push_lv(&mut out, "app version", version.as_bytes())?;
        }
        Ok(out)
    }
}

fn chunk_length(remaining: usize, max_length: usize, block: Option<usize>) -> Result<usize, ImageError> {
    let budget = max_length.saturating_sub(CHUNK_OVERHEAD);
    let mut chunk = if remaining > budget {
        budget - budget % BLOCK_LENGTH
    } else {
        remaining
    };
    if let Some(block) = block {
        if chunk % block != 0 {
            if chunk < block {
                return Err(ImageError::Misaligned { chunk, block });
            }
            chunk -= chunk % block;
        }
    }
    if chunk == 0 {
        return Err(ImageError::ChunkTooSmall(max_length));
    }
    Ok(chunk)
}

/// Loader over an open session
#[derive(Debug)]
pub struct Loader<T: CardTransport> {
    session: Session<T>,
    config: LoaderConfig,
    create_app_params: Option<Vec<u8>>,
}

impl<T: CardTransport> Loader<T> {
    /// Create a loader over `session`
    pub const fn new(session: Session<T>, config: LoaderConfig) -> Self {
        Self {
            session,
            config,
            create_app_params: None,
        }
    }

    /// Underlying session
    pub const fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Hand the session back
    pub fn into_session(self) -> Session<T> {
        self.session
    }

    /// Parameters of the last TLV create, fed into the content hash
    pub fn create_app_params(&self) -> Option<&[u8]> {
        self.create_app_params.as_deref()
    }

    fn send(&mut self, body: &[u8]) -> Result<Bytes> {
        self.session
            .exchange(self.config.cla, ins::SECURE, 0x00, 0x00, body)
    }

    /// Select the segment starting at `address`
    pub fn select_segment(&mut self, address: u32) -> Result<()> {
        debug!(address = format_args!("{address:#010x}"), "Selecting segment");
        let mut body = vec![loader::SELECT_SEGMENT];
        body.extend_from_slice(&address.to_be_bytes());
        self.send(&body).context("select segment")?;
        Ok(())
    }

    /// Write `chunk` at `offset` inside the selected segment
    pub fn load_segment_chunk(&mut self, offset: u16, chunk: &[u8]) -> Result<()> {
        trace!(offset, length = chunk.len(), "Loading chunk");
        let mut body = vec![loader::LOAD_SEGMENT_CHUNK];
        body.extend_from_slice(&offset.to_be_bytes());
        body.extend_from_slice(chunk);
        self.send(&body).context("load segment chunk")?;
        Ok(())
    }

    /// Flush the selected segment
    pub fn flush_segment(&mut self) -> Result<()> {
        self.send(&[loader::FLUSH_SEGMENT]).context("flush segment")?;
        Ok(())
    }

    /// Ask the device to check the CRC of `length` bytes at `offset`
    pub fn crc_segment(&mut self, offset: u16, length: u32, crc: u16) -> Result<()> {
        let mut body = vec![loader::CRC_SEGMENT];
        body.extend_from_slice(&offset.to_be_bytes());
        body.extend_from_slice(&length.to_be_bytes());
        body.extend_from_slice(&crc.to_be_bytes());
        self.send(&body).context("crc segment")?;
        Ok(())
    }

    fn push_signature(body: &mut Vec<u8>, signature: Option<&[u8]>) -> Result<()> {
        if let Some(signature) = signature {
            push_lv(body, "signature", signature)?;
        }
        Ok(())
    }

    /// Boot legacy created code at `boot_address`, thumb bit forced
    pub fn boot(&mut self, boot_address: u32, signature: Option<&[u8]>) -> Result<()> {
        let boot_address = boot_address | 1;
        info!(boot = format_args!("{boot_address:#010x}"), "Booting application");
        let mut body = vec![loader::BOOT];
        body.extend_from_slice(&boot_address.to_be_bytes());
        Self::push_signature(&mut body, signature)?;
        self.send(&body).context("boot")?;
        Ok(())
    }

    /// Commit a TLV created application
    pub fn commit(&mut self, signature: Option<&[u8]>) -> Result<()> {
        info!(signed = signature.is_some(), "Committing application");
        let mut body = vec![loader::BOOT];
        Self::push_signature(&mut body, signature)?;
        self.send(&body).context("commit")?;
        Ok(())
    }

    /// Create an application with install parameters
    ///
    /// The parameter bytes are retained and hashed by the next [`load`](Self::load).
    pub fn create_app(&mut self, params: &CreateAppParams) -> Result<()> {
        debug!(?params, "Creating application");
        let encoded = params.encode();
        let mut body = vec![loader::CREATE_APP];
        body.extend_from_slice(&encoded);
        self.create_app_params = Some(encoded);
        self.send(&body).context("create app")?;
        Ok(())
    }

    /// Create an application with the legacy inline metadata layout
    pub fn create_app_no_install_params(&mut self, params: &LegacyAppParams) -> Result<()> {
        debug!(name = %params.name, length = params.length, "Creating legacy application");
        let mut body = vec![loader::CREATE_APP];
        body.extend(params.encode()?);
        self.create_app_params = None;
        self.send(&body).context("create app")?;
        Ok(())
    }

    /// Delete an application by name
    pub fn delete_app(&mut self, name: &str) -> Result<()> {
        info!(name, "Deleting application");
        let mut body = vec![loader::DELETE_APP];
        push_lv(&mut body, "app name", name.as_bytes())?;
        self.send(&body).context("delete app")?;
        Ok(())
    }

    /// Delete an application by its 32 byte full hash
    pub fn delete_app_by_hash(&mut self, hash: &[u8]) -> Result<()> {
        if hash.len() != 32 {
            return Err(Error::InvalidResponse("application hash must be 32 bytes"));
        }
        info!(hash = %hex::encode(hash), "Deleting application by hash");
        let mut body = vec![loader::DELETE_APP_BY_HASH];
        body.extend_from_slice(hash);
        self.send(&body).context("delete app by hash")?;
        Ok(())
    }

    /// Remove the custom certificate authority
    pub fn reset_custom_ca(&mut self) -> Result<()> {
        self.send(&[loader::RESET_CUSTOM_CA])
            .context("reset custom CA")?;
        Ok(())
    }

    /// Install a custom certificate authority
    pub fn setup_custom_ca(&mut self, name: &str, public_key: &[u8]) -> Result<()> {
        let mut body = vec![loader::SETUP_CUSTOM_CA];
        push_lv(&mut body, "CA name", name.as_bytes())?;
        push_lv(&mut body, "CA public key", public_key)?;
        self.send(&body).context("setup custom CA")?;
        Ok(())
    }

    /// Start an installed application by name
    pub fn run_app(&mut self, name: &str) -> Result<()> {
        info!(name, "Starting application");
        self.session
            .exchange(self.config.cla, ins::RUN_APP, 0x00, 0x00, name.as_bytes())
            .context("run app")?;
        Ok(())
    }

    /// Raw dashboard version response
    pub fn get_version(&mut self) -> Result<Bytes> {
        self.send(&[loader::GET_VERSION]).context("get version")
    }

    /// Memory usage summary
    pub fn get_memory_info(&mut self) -> Result<MemoryInfo> {
        let data = self
            .send(&[loader::GET_MEMORY_INFO])
            .context("get memory info")?;
        MemoryInfo::from_bytes(&data)
    }

    /// Every installed application
    ///
    /// Pages are requested until the device answers with an empty body.
    pub fn list_apps(&mut self) -> Result<Vec<AppInfo>> {
        let mut apps = Vec::new();
        let mut tag = loader::LIST_APPS;
        loop {
            let data = self.send(&[tag]).context("list apps")?;
            if data.is_empty() {
                break;
            }
            apps.extend(AppInfo::parse_list(&data)?);
            tag = loader::LIST_APPS_CONTINUE;
        }
        debug!(count = apps.len(), "Listed applications");
        Ok(apps)
    }

    /// Stream every area of `image` and return the content hash
    pub fn load(
        &mut self,
        image: &MemoryImage,
        max_length: usize,
        options: &LoadOptions,
    ) -> Result<AppHash> {
        if image.is_empty() {
            return Err(ImageError::Empty.into());
        }
        let max_length = max_length.min(self.session.max_payload_size());
        let block = self
            .config
            .clear_data_block_len
            .filter(|b| *b > 0)
            .map(|b| b.min(self.session.transport().max_payload_size()));
        let initial = if self.config.relative {
            image.min_address()
        } else {
            0
        };

        let mut hasher = Sha256::new();
        if let Some(target_id) = options.target_id.filter(|t| t.hashes_metadata()) {
            hasher.update(target_id.to_bytes());
            hasher.update(options.target_version.as_deref().unwrap_or_default());
        }
        if let Some(params) = &self.create_app_params {
            hasher.update(params);
        }

        info!(
            areas = image.areas().len(),
            max_length,
            reverse = options.reverse,
            "Loading image"
        );

        let areas: Vec<_> = if options.reverse {
            image.areas().iter().rev().collect()
        } else {
            image.areas().iter().collect()
        };

        for area in areas {
            self.select_segment(area.start.wrapping_sub(initial))?;
            if area.is_empty() {
                continue;
            }
            if area.len() > MAX_SEGMENT_LENGTH {
                return Err(ImageError::SegmentTooLarge {
                    address: area.start,
                    length: area.len(),
                }
                .into());
            }

            let data = &area.data;
            let crc = crc16(data);
            let mut remaining = data.len();
            let mut offset = if options.reverse { data.len() } else { 0 };

            while remaining > 0 {
                let chunk = chunk_length(remaining, max_length, block)?;
                if options.reverse {
                    offset -= chunk;
                    self.load_segment_chunk(offset as u16, &data[offset..offset + chunk])?;
                } else {
                    let part = &data[offset..offset + chunk];
                    hasher.update(part);
                    self.load_segment_chunk(offset as u16, part)?;
                    offset += chunk;
                }
                remaining -= chunk;
            }

            self.flush_segment()?;
            if options.crc {
                self.crc_segment(0, data.len() as u32, crc)?;
            }
        }

        let hash = AppHash(hasher.finalize().into());
        info!(%hash, "Image loaded");
        Ok(hash)
    }
}
