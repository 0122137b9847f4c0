//! Slot source resolution and encoding
//!
//! Each manifest slot is read from its source, pushed through its operation
//! chain into an unnamed temporary file, and measured (original size, encoded
//! size, checksum). Payload offsets are assigned later, when the package is
//! assembled.

use log::{debug, trace};
use std::env;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::errors::{FlavorError, Result};
use crate::pspf::checksums::checksum_first8;
use crate::pspf::constants::ENV_WORKENV_BASE;
use crate::pspf::manifest::{Manifest, ManifestSlot};
use crate::pspf::operations::{apply_chain_stream, unpack_operations};
use crate::pspf::slots::SlotDescriptor;

/// A slot encoded and staged, ready to be appended to the package
#[derive(Debug)]
pub(super) struct EncodedSlot {
    pub(super) descriptor: SlotDescriptor,
    /// Encoded payload, staged in an unnamed temporary file
    pub(super) payload: File,
}

/// Encode every slot, returning them in manifest order.
///
/// Independent slot encodings run on worker threads; the result order (and
/// therefore the slot table) is by slot id regardless of which worker
/// finished first.
pub(super) fn encode_slots(
    manifest: &Manifest,
    manifest_dir: &Path,
    workenv_base: Option<&Path>,
) -> Result<Vec<EncodedSlot>> {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    let slots = &manifest.slots;
    let workers = thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .min(slots.len());

    if workers <= 1 {
        let mut encoded = Vec::with_capacity(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            trace!("🎰 encoding slot {i} ({})", slot.name);
            encoded.push(encode_slot(i as u32, slot, manifest_dir, workenv_base)?);
        }
        return Ok(encoded);
    }

    debug!("🎰 encoding {} slots on {workers} workers", slots.len());
    let next = AtomicUsize::new(0);
    let collected: Mutex<Vec<(usize, Result<EncodedSlot>)>> = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= slots.len() {
                        break;
                    }
                    trace!("🎰 encoding slot {i} ({})", slots[i].name);
                    let result = encode_slot(i as u32, &slots[i], manifest_dir, workenv_base);
                    if let Ok(mut guard) = collected.lock() {
                        guard.push((i, result));
                    }
                }
            });
        }
    });

    let collected = collected
        .into_inner()
        .map_err(|_| FlavorError::Execution("slot encoding worker panicked".to_string()))?;

    let mut by_index: Vec<Option<EncodedSlot>> = (0..slots.len()).map(|_| None).collect();
    for (i, result) in collected {
        by_index[i] = Some(result?);
    }

    let mut encoded = Vec::with_capacity(slots.len());
    for (i, slot) in by_index.into_iter().enumerate() {
        encoded.push(slot.ok_or_else(|| {
            FlavorError::Execution(format!("slot {i} was never encoded (worker failed)"))
        })?);
    }
    Ok(encoded)
}

fn encode_slot(
    id: u32,
    slot: &ManifestSlot,
    manifest_dir: &Path,
    workenv_base: Option<&Path>,
) -> Result<EncodedSlot> {
    let source_path = resolve_source_path(&slot.source, manifest_dir, workenv_base)?;
    let source = File::open(&source_path).map_err(|e| {
        FlavorError::io_context(
            format!("slot '{}' source {}", slot.name, source_path.display()),
            e,
        )
    })?;

    let operations = slot.operations.packed()?;
    let chain = unpack_operations(operations)?;

    let mut reader = BufReader::new(source);
    let mut payload = tempfile::tempfile()?;
    let original_size = apply_chain_stream(&chain, &mut reader, &mut payload)?;

    let encoded_size = payload.stream_position()?;
    payload.seek(SeekFrom::Start(0))?;
    let checksum = checksum_first8(&mut payload)?;
    payload.seek(SeekFrom::Start(0))?;

    debug!(
        "slot {id} ({}): {original_size} -> {encoded_size} bytes, checksum {}",
        slot.name,
        hex::encode(checksum)
    );

    let mut descriptor = SlotDescriptor::new(id);
    descriptor.encoded_size = encoded_size;
    descriptor.original_size = original_size;
    descriptor.checksum = checksum;
    descriptor.operations = operations;
    descriptor.purpose = slot.purpose.into();
    descriptor.lifecycle = slot.lifecycle.into();
    descriptor.permissions = slot.permission_bits()?;

    Ok(EncodedSlot {
        descriptor,
        payload,
    })
}

/// Resolve a slot source reference.
///
/// Plain relative paths resolve against the manifest's directory. A source
/// containing `{workenv}` resolves against `FLAVOR_WORKENV_BASE`, the
/// configured base, or the current directory, in that order.
fn resolve_source_path(
    source: &str,
    manifest_dir: &Path,
    workenv_base: Option<&Path>,
) -> Result<PathBuf> {
    if source.contains("{workenv}") {
        let base = if let Ok(env_base) = env::var(ENV_WORKENV_BASE) {
            PathBuf::from(env_base)
        } else if let Some(base) = workenv_base {
            base.to_path_buf()
        } else {
            env::current_dir()?
        };
        let resolved = source.replace("{workenv}", &base.to_string_lossy());
        return Ok(PathBuf::from(resolved));
    }

    let path = PathBuf::from(source);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(manifest_dir.join(path))
    }
}
