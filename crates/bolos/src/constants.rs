//! Protocol constants for the BOLOS dashboard

/// Class bytes
pub mod cla {
    /// Class byte of every dashboard command
    pub const DEFAULT: u8 = 0xE0;
}

/// Instruction bytes
pub mod ins {
    /// Send the target id
    pub const IDENTIFY: u8 = 0x04;
    /// Exchange host and device nonces
    pub const GET_NONCE: u8 = 0x50;
    /// Present a host certificate
    pub const VALIDATE_CERTIFICATE: u8 = 0x51;
    /// Read a device certificate
    pub const GET_CERTIFICATE: u8 = 0x52;
    /// Close the handshake
    pub const MUTUAL_AUTHENTICATE: u8 = 0x53;
    /// Secure loader command, the body carries its own tag
    pub const SECURE: u8 = 0x00;
    /// Start an installed application
    pub const RUN_APP: u8 = 0xD8;
}

/// P1 values for certificate commands
pub mod p1 {
    /// More certificates follow
    pub const FIRST: u8 = 0x00;
    /// Last certificate in the chain
    pub const LAST: u8 = 0x80;
}

/// Loader body tags, the first byte of a secure command body
pub mod loader {
    /// Select a memory segment
    pub const SELECT_SEGMENT: u8 = 0x05;
    /// Load a chunk into the selected segment
    pub const LOAD_SEGMENT_CHUNK: u8 = 0x06;
    /// Flush the selected segment
    pub const FLUSH_SEGMENT: u8 = 0x07;
    /// Check the CRC of the selected segment
    pub const CRC_SEGMENT: u8 = 0x08;
    /// Boot the loaded code, or commit a TLV created application
    pub const BOOT: u8 = 0x09;
    /// Create an application
    pub const CREATE_APP: u8 = 0x0B;
    /// Delete an application by name
    pub const DELETE_APP: u8 = 0x0C;
    /// First page of the application list
    pub const LIST_APPS: u8 = 0x0E;
    /// Next page of the application list
    pub const LIST_APPS_CONTINUE: u8 = 0x0F;
    /// Read the dashboard version
    pub const GET_VERSION: u8 = 0x10;
    /// Read the memory usage summary
    pub const GET_MEMORY_INFO: u8 = 0x11;
    /// Install a custom certificate authority
    pub const SETUP_CUSTOM_CA: u8 = 0x12;
    /// Remove the custom certificate authority
    pub const RESET_CUSTOM_CA: u8 = 0x13;
    /// Delete an application by hash
    pub const DELETE_APP_BY_HASH: u8 = 0x15;
}

/// Install parameter tags
pub mod install {
    /// Application name
    pub const APP_NAME: u8 = 0x01;
    /// Application version
    pub const APP_VERSION: u8 = 0x02;
    /// Application icon
    pub const ICON: u8 = 0x03;
    /// Derivation path restrictions
    pub const DERIVE_PATH: u8 = 0x04;
    /// Library dependency
    pub const DEPENDENCY: u8 = 0x06;
}

/// Role bytes prefixed to signed certificate messages
pub mod role {
    /// Host signer public key
    pub const SIGNER: u8 = 0x01;
    /// Host ephemeral public key
    pub const SIGNER_EPHEMERAL: u8 = 0x11;
    /// Device public key
    pub const DEVICE: u8 = 0x02;
    /// Device ephemeral public key
    pub const DEVICE_EPHEMERAL: u8 = 0x12;
}

/// Length of the host nonce sent with GET_NONCE
pub const HOST_NONCE_LENGTH: usize = 8;
/// Minimal GET_NONCE response: 4 byte serial and 8 byte device nonce
pub const NONCE_RESPONSE_LENGTH: usize = 12;

/// AES block length
pub const BLOCK_LENGTH: usize = 16;
/// Length of the truncated v3 MAC appended to every wrapped message
pub const SCP_MAC_LENGTH: usize = 14;
/// Bound on v3 key derivation retries
pub const MAX_KEY_DERIVATION_RETRIES: u8 = 100;

/// Largest secure payload carried by one command
pub const DEFAULT_MTU: usize = 0xFE;
/// Payload budget the load flow asks the loader for
pub const DEFAULT_LOAD_CHUNK: usize = 240;
/// Loader overhead subtracted from the MTU when sizing chunks
pub const CHUNK_OVERHEAD: usize = 18;
/// Largest segment a single select can address
pub const MAX_SEGMENT_LENGTH: usize = 0x10000;
/// Install parameters start on this alignment after the data section
pub const PAGE_ALIGNMENT: u32 = 64;

/// Default curve mask, every curve allowed
pub const DEFAULT_CURVE_MASK: u8 = 0xFF;
/// Create flag requesting 16 byte clear data blocks
pub const FLAG_CLEAR_DATA_BLOCKS: u32 = 0x02;
/// Clear data block length applied when [`FLAG_CLEAR_DATA_BLOCKS`] is set
pub const CLEAR_DATA_BLOCK_LENGTH: usize = 16;
