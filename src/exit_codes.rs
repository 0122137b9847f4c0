//! Standard exit codes for Flavorpack binaries
//!
//! These exit codes are used by both builder and launcher and are stable
//! across implementations of the format.

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Generic error (avoid using - be more specific)
pub const EXIT_ERROR: i32 = 1;

/// Panic or unrecoverable error
pub const EXIT_PANIC: i32 = 101;

/// Execution error (failed to spawn process, missing interpreter)
pub const EXIT_EXECUTION_ERROR: i32 = 104;

/// Invalid command-line arguments
pub const EXIT_INVALID_ARGS: i32 = 105;

/// I/O error (file not found, permission denied, disk error)
pub const EXIT_IO_ERROR: i32 = 106;

/// Verification failed (format, checksum, CRC or signature)
pub const EXIT_VERIFICATION_ERROR: i32 = 107;

/// Build/packaging error (builder-specific)
pub const EXIT_BUILD_ERROR: i32 = 108;

/// Configuration error (invalid manifest, placeholder resolution failed)
pub const EXIT_CONFIG_ERROR: i32 = 109;
