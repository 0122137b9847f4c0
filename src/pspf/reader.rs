//! PSPF/2025 package reader
//!
//! Stateless given a read-only file handle: locates the index from the end
//! of the file, validates it according to the requested level, and serves
//! metadata and slot payloads.

use log::{debug, trace};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{
    INDEX_SIZE, MAGIC_FOOTER, SLOT_DESCRIPTOR_SIZE, TRAILER_SIZE,
};
use crate::pspf::index::{Index, integrity_checksum};
use crate::pspf::manifest::Manifest;
use crate::pspf::metadata::decode_metadata;
use crate::pspf::operations::unpack_operations;
use crate::pspf::slots::SlotDescriptor;
use crate::pspf::verifier::ValidationLevel;

/// Reader over an open package file
#[derive(Debug)]
pub struct Reader {
    file: File,
    path: PathBuf,
    file_size: u64,
    raw_index: Vec<u8>,
    index: Index,
    descriptors: Vec<SlotDescriptor>,
    manifest: Option<Manifest>,
}

impl Reader {
    /// Open a package and run the full startup validation (footer, index
    /// magic, CRC, signature, bounds). Slot checksums are only verified by
    /// `verify_full` or per-slot reads.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_level(path, ValidationLevel::Standard)
    }

    /// Open a package, validating at the given level
    pub fn open_with_level(path: &Path, level: ValidationLevel) -> Result<Self> {
        trace!("📖 opening package {} at level {:?}", path.display(), level);
        let mut file = File::open(path)
            .map_err(|e| FlavorError::io_context(format!("package {}", path.display()), e))?;
        let file_size = file.metadata()?.len();

        if file_size < TRAILER_SIZE as u64 {
            return Err(FlavorError::Format(format!(
                "file is {file_size} bytes, smaller than the {TRAILER_SIZE}-byte trailer"
            )));
        }

        // Step 1: the last 8 bytes must be the magic footer
        let mut footer = [0u8; 8];
        file.seek(SeekFrom::End(-(MAGIC_FOOTER.len() as i64)))?;
        file.read_exact(&mut footer)?;
        if level != ValidationLevel::None && footer != *MAGIC_FOOTER {
            return Err(FlavorError::Format(format!(
                "magic footer mismatch at offset {}: {footer:02x?}",
                file_size - 8
            )));
        }

        // Steps 2..: the index block sits directly before the footer
        let index_offset = file_size - TRAILER_SIZE as u64;
        let mut raw_index = vec![0u8; INDEX_SIZE];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut raw_index)?;

        let index = Index::unpack(&raw_index)?;

        // The slot table must fit between the launcher and the index block,
        // whatever the validation level: a hostile count would otherwise
        // drive the descriptor loop off the end of the file.
        let table_bytes = index
            .slot_count
            .checked_mul(SLOT_DESCRIPTOR_SIZE as u64)
            .ok_or_else(|| {
                FlavorError::Format(format!("slot_count {} overflows", index.slot_count))
            })?;
        if table_bytes > index_offset {
            return Err(FlavorError::Format(format!(
                "slot table ({} descriptors) does not fit in the file",
                index.slot_count
            )));
        }

        if level.checks_index() {
            Index::verify_crc(&raw_index)?;
        }
        if level.checks_signature() {
            Index::verify_signature(&raw_index)?;
        }

        let mut reader = Reader {
            file,
            path: path.to_path_buf(),
            file_size,
            raw_index,
            index,
            descriptors: Vec::new(),
            manifest: None,
        };

        reader.load_descriptors(level.checks_index())?;
        if level.checks_index() {
            reader.check_geometry()?;
        }

        if level.checks_metadata() {
            reader.metadata()?;
        }
        if level.checks_slot_checksums() {
            reader.verify_slot_checksums()?;
        }

        debug!(
            "✅ opened package {} ({} slots, {} bytes)",
            path.display(),
            reader.index.slot_count,
            file_size
        );
        Ok(reader)
    }

    /// Step 5: all referenced offsets and sizes fall within the file
    fn check_geometry(&self) -> Result<()> {
        let index = &self.index;
        let index_offset = self.file_size - TRAILER_SIZE as u64;

        if index.package_size != self.file_size {
            return Err(FlavorError::Format(format!(
                "index package_size {} does not match file size {}",
                index.package_size, self.file_size
            )));
        }
        if index.metadata_offset != index.launcher_size {
            return Err(FlavorError::Format(format!(
                "metadata_offset {:#x} does not follow the launcher image ({:#x})",
                index.metadata_offset, index.launcher_size
            )));
        }
        let metadata_end = index
            .metadata_offset
            .checked_add(index.metadata_size)
            .ok_or_else(|| FlavorError::Format("metadata region overflows".to_string()))?;
        let table_size = index.slot_count * SLOT_DESCRIPTOR_SIZE as u64;
        let table_end = index
            .slot_table_offset
            .checked_add(table_size)
            .ok_or_else(|| FlavorError::Format("slot table overflows".to_string()))?;

        if metadata_end > index.slot_table_offset
            || index.slot_table_offset < index.metadata_offset
            || table_end != index_offset
        {
            return Err(FlavorError::Format(format!(
                "index geometry is inconsistent: metadata ends at {:#x}, slot table {:#x}..{:#x}, index at {:#x}",
                metadata_end, index.slot_table_offset, table_end, index_offset
            )));
        }

        for descriptor in &self.descriptors {
            descriptor.check_bounds(metadata_end, index.slot_table_offset)?;
        }
        Ok(())
    }

    /// Read the slot table. With `validate` off (level `none`) descriptors
    /// are taken as-is so a broken package can still be dissected.
    fn load_descriptors(&mut self, validate: bool) -> Result<()> {
        let count = self.index.slot_count as usize;
        let mut descriptors = Vec::with_capacity(count);

        debug!(
            "📊 reading {count} slot descriptors from offset {:#x}",
            self.index.slot_table_offset
        );
        for i in 0..count {
            let offset = self.index.slot_table_offset + (i * SLOT_DESCRIPTOR_SIZE) as u64;
            let data = self.read_at(offset, SLOT_DESCRIPTOR_SIZE)?;
            let descriptor = if validate {
                SlotDescriptor::unpack(&data, i as u32)?
            } else {
                SlotDescriptor::unpack_lenient(&data)?
            };
            descriptors.push(descriptor);
        }

        self.descriptors = descriptors;
        Ok(())
    }

    /// The parsed index block
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// The raw 8192 index bytes as stored
    pub fn raw_index(&self) -> &[u8] {
        &self.raw_index
    }

    /// Package path this reader was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Package integrity checksum (hex SHA-256 of the raw index block)
    pub fn integrity_checksum(&self) -> String {
        integrity_checksum(&self.raw_index)
    }

    /// Slot descriptors, ordered by slot id
    pub fn descriptors(&self) -> &[SlotDescriptor] {
        &self.descriptors
    }

    /// Descriptor for one slot
    pub fn descriptor(&self, slot: usize) -> Result<&SlotDescriptor> {
        self.descriptors.get(slot).ok_or_else(|| {
            FlavorError::Format(format!(
                "slot index {slot} out of range ({} slots)",
                self.descriptors.len()
            ))
        })
    }

    /// Decompressed manifest, cached after the first read
    pub fn metadata(&mut self) -> Result<&Manifest> {
        if self.manifest.is_none() {
            let offset = self.index.metadata_offset;
            let size = self.index.metadata_size as usize;
            let data = self.read_at(offset, size)?;
            let manifest = decode_metadata(&data)?;
            self.manifest = Some(manifest);
        }
        self.manifest
            .as_ref()
            .ok_or_else(|| FlavorError::Format("metadata unavailable".to_string()))
    }

    /// Read a slot's encoded bytes, verifying its checksum
    pub fn slot(&mut self, slot: usize) -> Result<Vec<u8>> {
        let descriptor = *self.descriptor(slot)?;
        let data = self.read_at(descriptor.offset, descriptor.encoded_size as usize)?;

        let mut cursor = &data[..];
        let actual = crate::pspf::checksums::checksum_first8(&mut cursor)?;
        if actual != descriptor.checksum {
            return Err(FlavorError::Integrity(format!(
                "slot {slot}: checksum mismatch at offset {:#x} (stored {}, calculated {})",
                descriptor.offset,
                hex::encode(descriptor.checksum),
                hex::encode(actual)
            )));
        }
        Ok(data)
    }

    /// Read a slot and reverse its operation chain, returning original bytes
    pub fn extract_slot(&mut self, slot: usize) -> Result<Vec<u8>> {
        let descriptor = *self.descriptor(slot)?;
        let encoded = self.slot(slot)?;
        let chain = unpack_operations(descriptor.operations)?;
        let decoded = crate::pspf::operations::reverse_chain(&chain, &encoded)?;
        if decoded.len() as u64 != descriptor.original_size {
            return Err(FlavorError::Integrity(format!(
                "slot {slot}: decoded to {} bytes, descriptor says {}",
                decoded.len(),
                descriptor.original_size
            )));
        }
        Ok(decoded)
    }

    /// Stream-decode a slot into a writer without buffering the payload.
    ///
    /// The encoded bytes are hashed in a first pass, then decoded in a
    /// second, so the checksum is always checked before any decoded byte is
    /// trusted.
    pub fn extract_slot_to(&mut self, slot: usize, output: &mut dyn Write) -> Result<u64> {
        let descriptor = *self.descriptor(slot)?;

        self.file.seek(SeekFrom::Start(descriptor.offset))?;
        let mut hashing = (&mut self.file).take(descriptor.encoded_size);
        let actual = crate::pspf::checksums::checksum_first8(&mut hashing)?;
        if actual != descriptor.checksum {
            return Err(FlavorError::Integrity(format!(
                "slot {slot}: checksum mismatch at offset {:#x} (stored {}, calculated {})",
                descriptor.offset,
                hex::encode(descriptor.checksum),
                hex::encode(actual)
            )));
        }

        self.file.seek(SeekFrom::Start(descriptor.offset))?;
        let mut encoded = (&mut self.file).take(descriptor.encoded_size);
        let chain = unpack_operations(descriptor.operations)?;
        let produced =
            crate::pspf::operations::reverse_chain_stream(&chain, &mut encoded, output)?;

        if produced != descriptor.original_size {
            return Err(FlavorError::Integrity(format!(
                "slot {slot}: decoded to {produced} bytes, descriptor says {}",
                descriptor.original_size
            )));
        }
        Ok(produced)
    }

    /// Read an arbitrary region of the package file
    pub fn read_region(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.read_at(offset, size)
    }

    /// Pull-based cursor over all slots in id order
    pub fn slot_cursor(&mut self) -> SlotCursor<'_> {
        SlotCursor {
            reader: self,
            next: 0,
        }
    }

    /// Re-run all checks, including every slot checksum
    pub fn verify_full(&mut self) -> Result<()> {
        Index::verify_crc(&self.raw_index)?;
        Index::verify_signature(&self.raw_index)?;
        self.check_geometry()?;
        self.metadata()?;
        self.verify_slot_checksums()
    }

    fn verify_slot_checksums(&mut self) -> Result<()> {
        for slot in 0..self.descriptors.len() {
            let descriptor = self.descriptors[slot];
            self.file.seek(SeekFrom::Start(descriptor.offset))?;
            let mut hashing = (&mut self.file).take(descriptor.encoded_size);
            let actual = crate::pspf::checksums::checksum_first8(&mut hashing)?;
            if actual != descriptor.checksum {
                return Err(FlavorError::Integrity(format!(
                    "slot {slot}: checksum mismatch at offset {:#x}",
                    descriptor.offset
                )));
            }
        }
        Ok(())
    }

    fn read_at(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(size as u64)
            .ok_or_else(|| FlavorError::Format("read range overflows".to_string()))?;
        if end > self.file_size {
            return Err(FlavorError::Format(format!(
                "read range {offset:#x}..{end:#x} extends past end of file ({:#x})",
                self.file_size
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; size];
        self.file.read_exact(&mut data)?;
        Ok(data)
    }
}

/// Pull cursor yielding `(descriptor, encoded payload)` per slot. Each
/// payload is checksum-verified as it is read.
#[derive(Debug)]
pub struct SlotCursor<'a> {
    reader: &'a mut Reader,
    next: usize,
}

impl SlotCursor<'_> {
    /// Advance to the next slot, or `None` past the end of the table
    pub fn next_slot(&mut self) -> Result<Option<(SlotDescriptor, Vec<u8>)>> {
        if self.next >= self.reader.descriptors.len() {
            return Ok(None);
        }
        let slot = self.next;
        self.next += 1;
        let descriptor = self.reader.descriptors[slot];
        let encoded = self.reader.slot(slot)?;
        Ok(Some((descriptor, encoded)))
    }
}
