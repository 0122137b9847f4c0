// Core PSPF/2025 format constants that never change.

/// Trailing magic footer: UTF-8 of the package/wand emoji pair
pub const MAGIC_FOOTER: &[u8; 8] = &[0xF0, 0x9F, 0x93, 0xA6, 0xF0, 0x9F, 0xAA, 0x84];

/// ASCII magic at offset 0 of the index block
pub const INDEX_MAGIC: &[u8; 8] = b"PSPF2025";

/// On-disk index revision (the year lives in the magic)
pub const FORMAT_VERSION_MAJOR: u8 = 1;
pub const FORMAT_VERSION_MINOR: u8 = 0;

/// Manifest-level format version string
pub const MANIFEST_FORMAT_VERSION: &str = "2025.1";

// Fixed sizes - part of the format specification
pub const INDEX_SIZE: usize = 8192;
pub const SLOT_DESCRIPTOR_SIZE: usize = 64;
/// Index block plus the magic footer
pub const TRAILER_SIZE: usize = INDEX_SIZE + MAGIC_FOOTER.len();

// Index block internal offsets
pub const INDEX_CRC_OFFSET: usize = 10;
pub const INDEX_CRC_COVERAGE_START: usize = 14;
pub const INDEX_PUBLIC_KEY_OFFSET: usize = 64;
pub const INDEX_SIGNATURE_OFFSET: usize = 96;
/// The signature occupies the first 64 bytes of a 512-byte reserved region;
/// the remaining 448 bytes must be zero.
pub const INDEX_SIGNATURE_REGION_SIZE: usize = 512;
pub const INDEX_RESERVED_OFFSET: usize = INDEX_SIGNATURE_OFFSET + INDEX_SIGNATURE_REGION_SIZE;

// Operation codes - part of format spec
pub const OP_NONE: u8 = 0x00;
/// POSIX TAR archive of a single logical entry
pub const OP_TAR: u8 = 0x01;
pub const OP_GZIP: u8 = 0x10;
pub const OP_BZIP2: u8 = 0x13;
pub const OP_XZ: u8 = 0x16;
pub const OP_ZSTD: u8 = 0x1B;

/// Maximum number of opcodes in a packed chain
pub const MAX_CHAIN_LENGTH: usize = 8;

// File permission defaults
pub const DEFAULT_FILE_PERMS: u16 = 0o600;
pub const DEFAULT_EXECUTABLE_PERMS: u16 = 0o700;
pub const DEFAULT_DIR_PERMS: u32 = 0o700;

/// Streaming copy buffer size
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

// Workenv sentinel files
pub const LOCK_FILE: &str = ".extraction.lock";
pub const COMPLETE_FILE: &str = ".extraction.complete";
pub const INCOMPLETE_FILE: &str = ".extraction.incomplete";

/// Bounded wait for a contested extraction lock
pub const LOCK_WAIT_SECS: u64 = 60;

// Recognised environment variables
pub const ENV_CACHE_DIR: &str = "FLAVOR_CACHE_DIR";
pub const ENV_VALIDATION: &str = "FLAVOR_VALIDATION";
pub const ENV_LOG_LEVEL: &str = "FLAVOR_LOG_LEVEL";
pub const ENV_LAUNCHER_CLI: &str = "FLAVOR_LAUNCHER_CLI";
pub const ENV_WORKENV: &str = "FLAVOR_WORKENV";
pub const ENV_WORKENV_BASE: &str = "FLAVOR_WORKENV_BASE";
pub const ENV_LAUNCHER_BIN: &str = "FLAVOR_LAUNCHER_BIN";
pub const ENV_EXEC_MODE: &str = "FLAVOR_EXEC_MODE";
