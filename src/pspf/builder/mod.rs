//! PSPF/2025 package builder
//!
//! Assembles launcher + metadata + slot payloads + slot table + index into a
//! single file, seals the index, and atomically renames the result into
//! place. Given the same inputs and a seeded key, two runs produce
//! byte-identical files: nothing time- or host-dependent is written.

mod slot_encoder;

use log::{debug, info, trace};
use std::fs;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use crate::api::BuildOptions;
use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{ENV_LAUNCHER_BIN, MAGIC_FOOTER, TRAILER_SIZE};
use crate::pspf::index::Index;
use crate::pspf::keys::{KeyConfig, resolve_keys, save_keys_to_dir};
use crate::pspf::manifest::Manifest;
use crate::pspf::metadata::encode_metadata;

use slot_encoder::encode_slots;

/// Build a PSPF/2025 package from a manifest
pub fn build(manifest_path: &Path, output_path: &Path, options: &BuildOptions) -> Result<()> {
    info!("🦀 flavorpack builder starting");
    info!("🔨 building PSPF/2025 package from {}", manifest_path.display());

    let mut manifest = Manifest::from_path(manifest_path)?;
    manifest.normalize();
    let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let launcher_data = read_launcher(options)?;
    debug!("🚀 launcher image: {} bytes", launcher_data.len());

    let key_config = KeyConfig {
        explicit: options.explicit_keys,
        seed: options.key_seed.clone(),
        key_dir: options.key_dir.clone(),
    };
    let (signing_key, verifying_key) = resolve_keys(&key_config)?;
    if let Some(ref save_dir) = options.save_keys {
        save_keys_to_dir(save_dir, &signing_key, &verifying_key)?;
    }

    // Encode all slots up front; offsets are assigned during assembly
    let mut slots = encode_slots(&manifest, manifest_dir, options.workenv_base.as_deref())?;

    // Assemble into a temporary file next to the final path so the rename at
    // the end stays on one filesystem. A failed or cancelled build leaves no
    // partial output at the destination.
    let output_dir = output_path.parent().unwrap_or_else(|| Path::new("."));
    let mut out = tempfile::NamedTempFile::new_in(output_dir)
        .map_err(|e| FlavorError::io_context(format!("output in {}", output_dir.display()), e))?;

    // Region 1: launcher image
    out.write_all(&launcher_data)?;
    let launcher_size = launcher_data.len() as u64;

    // Region 2: metadata block
    let metadata_bytes = encode_metadata(&manifest)?;
    let metadata_offset = launcher_size;
    out.write_all(&metadata_bytes)?;
    trace!(
        "📝 metadata at {:#x}, {} bytes",
        metadata_offset,
        metadata_bytes.len()
    );

    // Region 3: slot payloads in ascending slot id
    for slot in &mut slots {
        let offset = out.as_file_mut().stream_position()?;
        slot.descriptor.offset = offset;
        let copied = io::copy(&mut slot.payload, out.as_file_mut())?;
        if copied != slot.descriptor.encoded_size {
            return Err(FlavorError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "slot {}: staged payload truncated ({copied} of {} bytes)",
                    slot.descriptor.id, slot.descriptor.encoded_size
                ),
            )));
        }
        trace!(
            "📍 slot {} at {:#x}, {} bytes",
            slot.descriptor.id, offset, copied
        );
    }

    // Region 4: slot table
    let slot_table_offset = out.as_file_mut().stream_position()?;
    for slot in &slots {
        out.write_all(&slot.descriptor.pack())?;
    }

    // Region 5: sealed index block, then the magic footer
    let table_end = out.as_file_mut().stream_position()?;
    let mut index = Index::new();
    index.package_size = table_end + TRAILER_SIZE as u64;
    index.launcher_size = launcher_size;
    index.metadata_offset = metadata_offset;
    index.metadata_size = metadata_bytes.len() as u64;
    index.slot_table_offset = slot_table_offset;
    index.slot_count = slots.len() as u64;
    index.public_key = verifying_key.to_bytes();

    let index_bytes = index.seal(&signing_key);
    out.write_all(&index_bytes)?;
    out.write_all(MAGIC_FOOTER)?;
    out.flush()?;

    // Atomic rename into place, then the executable bit
    out.persist(output_path).map_err(|e| {
        FlavorError::io_context(format!("renaming into {}", output_path.display()), e.error)
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(output_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(output_path, perms)?;
    }

    // Prove the emitted file verifies before calling the build done
    if !options.skip_verification {
        crate::pspf::verifier::verify(output_path)?;
        debug!("✅ post-build verification passed");
    }

    info!(
        "✅ built {} v{}: {} ({} slots, {} bytes)",
        manifest.package.name,
        manifest.package.version,
        output_path.display(),
        slots.len(),
        index.package_size
    );

    Ok(())
}

/// Load the raw launcher image named by the options or the environment
fn read_launcher(options: &BuildOptions) -> Result<Vec<u8>> {
    let launcher_path = if let Some(ref explicit) = options.launcher_bin {
        explicit.clone()
    } else if let Ok(from_env) = std::env::var(ENV_LAUNCHER_BIN) {
        PathBuf::from(from_env)
    } else {
        return Err(FlavorError::Config(format!(
            "launcher binary not specified: pass --launcher-bin or set {ENV_LAUNCHER_BIN}"
        )));
    };

    fs::read(&launcher_path)
        .map_err(|e| FlavorError::io_context(format!("launcher {}", launcher_path.display()), e))
}
