//! High-level API for flavorpack operations

use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::pspf;

/// Options for building a package
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// Path to the pre-built launcher binary
    pub launcher_bin: Option<PathBuf>,
    /// Skip the full verification pass after building
    pub skip_verification: bool,
    /// Explicit (private seed, public key) byte pair
    pub explicit_keys: Option<([u8; 32], [u8; 32])>,
    /// Seed for deterministic key derivation
    pub key_seed: Option<String>,
    /// Directory holding flavor-private.key / flavor-public.key
    pub key_dir: Option<PathBuf>,
    /// Persist the resolved key pair to this directory after the build
    pub save_keys: Option<PathBuf>,
    /// Base directory for `{workenv}` resolution in slot sources
    pub workenv_base: Option<PathBuf>,
}

/// Options for launching a package
#[derive(Debug, Default)]
pub struct LaunchOptions {
    /// Override the workenv cache root (testing and embedding)
    pub workenv_root: Option<PathBuf>,
}

/// Result of a full package verification
#[derive(Debug)]
pub struct VerifyReport {
    pub format: String,
    pub package_name: String,
    pub package_version: String,
    pub slot_count: usize,
    /// Hex SHA-256 of the raw index block
    pub integrity_checksum: String,
}

/// Build a PSPF/2025 package from a manifest
pub fn build_package(
    manifest_path: &Path,
    output_path: &Path,
    options: &BuildOptions,
) -> Result<()> {
    pspf::build(manifest_path, output_path, options)
}

/// Launch a PSPF/2025 package
pub fn launch_package(package_path: &Path, args: &[String], options: &LaunchOptions) -> Result<i32> {
    pspf::launch(package_path, args, options)
}

/// Fully verify a PSPF/2025 package
pub fn verify_package(package_path: &Path) -> Result<VerifyReport> {
    pspf::verify(package_path)
}

/// Check whether a file carries the PSPF/2025 trailing magic
pub fn is_pspf_package(path: &Path) -> Result<bool> {
    use crate::pspf::constants::{MAGIC_FOOTER, TRAILER_SIZE};
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    let file_size = file.metadata()?.len();
    if file_size < TRAILER_SIZE as u64 {
        return Ok(false);
    }

    let mut footer = [0u8; 8];
    file.seek(SeekFrom::End(-(MAGIC_FOOTER.len() as i64)))?;
    file.read_exact(&mut footer)?;
    Ok(footer == *MAGIC_FOOTER)
}
