//! Package dissection for troubleshooting
//!
//! Writes every region of a package (launcher image, metadata JSON, index
//! fields, decoded slots) into a directory so a broken package can be
//! inspected with ordinary tools.

use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::errors::{FlavorError, Result};
use crate::pspf::operations::operations_to_string;
use crate::pspf::reader::Reader;

/// Serializable rendition of the index block
#[derive(Debug, Serialize)]
struct IndexDump {
    version: String,
    index_crc32: String,
    package_size: u64,
    launcher_size: u64,
    metadata_offset: u64,
    metadata_size: u64,
    slot_table_offset: u64,
    slot_count: u64,
    public_key: String,
    signature: String,
    integrity_checksum: String,
}

/// Serializable rendition of one slot descriptor
#[derive(Debug, Serialize)]
struct SlotDump {
    id: u32,
    offset: u64,
    encoded_size: u64,
    original_size: u64,
    checksum: String,
    operations: String,
    purpose: &'static str,
    lifecycle: &'static str,
    permissions: String,
}

/// Dump all package internals into `output_dir`
pub fn debug_dump(reader: &mut Reader, output_dir: &Path) -> Result<()> {
    info!("🔬 dissecting package into {}", output_dir.display());
    fs::create_dir_all(output_dir)
        .map_err(|e| FlavorError::io_context(format!("dump dir {}", output_dir.display()), e))?;

    let index = reader.index().clone();
    let integrity = reader.integrity_checksum();

    // Index fields as JSON
    let index_dump = IndexDump {
        version: format!("{}.{}", index.version_major, index.version_minor),
        index_crc32: format!("{:08x}", index.index_crc32),
        package_size: index.package_size,
        launcher_size: index.launcher_size,
        metadata_offset: index.metadata_offset,
        metadata_size: index.metadata_size,
        slot_table_offset: index.slot_table_offset,
        slot_count: index.slot_count,
        public_key: hex::encode(index.public_key),
        signature: hex::encode(index.signature),
        integrity_checksum: integrity,
    };
    fs::write(
        output_dir.join("index.json"),
        serde_json::to_string_pretty(&index_dump)?,
    )?;
    debug!("💾 saved index fields to index.json");

    // Raw index block and launcher image
    fs::write(output_dir.join("index.bin"), reader.raw_index())?;
    debug!("💾 saved raw index block to index.bin");
    let launcher = reader.read_region(0, index.launcher_size as usize)?;
    fs::write(output_dir.join("launcher.bin"), launcher)?;
    debug!("💾 saved launcher image ({} bytes)", index.launcher_size);

    // Metadata as readable JSON when it decodes, raw bytes otherwise
    match reader.metadata() {
        Ok(manifest) => {
            let manifest = manifest.clone();
            fs::write(
                output_dir.join("metadata.json"),
                serde_json::to_string_pretty(&manifest)?,
            )?;
            debug!("💾 saved decoded metadata to metadata.json");
        }
        Err(e) => {
            debug!("❌ metadata does not decode: {e}");
            if let Ok(raw) =
                reader.read_region(index.metadata_offset, index.metadata_size as usize)
            {
                fs::write(output_dir.join("metadata.raw"), raw)?;
                debug!("💾 saved raw metadata block to metadata.raw");
            }
        }
    }

    // Slot table summary plus each payload. Payloads are read raw (no
    // checksum gate) and decoded best-effort: the whole point is to save
    // whatever a broken package still has.
    let descriptors = reader.descriptors().to_vec();
    let mut slot_dumps = Vec::new();
    for descriptor in &descriptors {
        slot_dumps.push(SlotDump {
            id: descriptor.id,
            offset: descriptor.offset,
            encoded_size: descriptor.encoded_size,
            original_size: descriptor.original_size,
            checksum: hex::encode(descriptor.checksum),
            operations: operations_to_string(descriptor.operations),
            purpose: descriptor.purpose.as_str(),
            lifecycle: descriptor.lifecycle.as_str(),
            permissions: format!("{:03o}", descriptor.permissions),
        });

        match reader.read_region(descriptor.offset, descriptor.encoded_size as usize) {
            Ok(encoded) => {
                fs::write(
                    output_dir.join(format!("slot-{}.encoded", descriptor.id)),
                    &encoded,
                )?;
                debug!(
                    "📊 slot {}: {} encoded bytes at {:#x}",
                    descriptor.id, descriptor.encoded_size, descriptor.offset
                );
            }
            Err(e) => debug!("❌ slot {}: payload unreadable: {e}", descriptor.id),
        }
    }
    fs::write(
        output_dir.join("slots.json"),
        serde_json::to_string_pretty(&slot_dumps)?,
    )?;
    debug!("💾 saved slot table to slots.json");

    for i in 0..descriptors.len() {
        let mut out = fs::File::create(output_dir.join(format!("slot-{i}.decoded")))?;
        match reader.extract_slot_to(i, &mut out) {
            Ok(produced) => debug!("📏 slot {i}: decoded to {produced} bytes"),
            Err(e) => debug!("❌ slot {i}: decode failed, encoded copy kept: {e}"),
        }
    }

    info!("💾 dumped package internals to {}", output_dir.display());
    Ok(())
}
