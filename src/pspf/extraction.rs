//! Workenv population
//!
//! Drives the per-workenv state machine: MISSING -> EXTRACTING -> READY,
//! with INCOMPLETE on fault. The completion marker is written last and
//! atomically; the advisory lock serialises writers and losers re-enter at
//! the top after a bounded wait.

use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{COMPLETE_FILE, DEFAULT_DIR_PERMS, INCOMPLETE_FILE, LOCK_FILE, LOCK_WAIT_SECS};
use crate::pspf::locking::{release_lock, try_acquire_lock, wait_for_lock};
use crate::pspf::manifest::Manifest;
use crate::pspf::reader::Reader;
use crate::pspf::slots::Lifecycle;
use crate::pspf::workenv::{CompletionMarker, IncompleteMarker, WorkenvPaths};

/// Ensure the workenv for the open package is READY, extracting if needed.
///
/// Returns the paths of the ready workenv.
pub fn ensure_workenv(reader: &mut Reader, paths: &WorkenvPaths) -> Result<()> {
    let checksum = reader.integrity_checksum();
    let manifest = reader.metadata()?.clone();

    // Two writer attempts plus one wait-and-recheck round trip
    for round in 0..3 {
        if is_ready(paths, &manifest, &checksum) {
            debug!("✅ workenv {} is ready (cache hit)", paths.root().display());
            return Ok(());
        }

        create_workenv_dir(paths.root())?;

        if try_acquire_lock(paths)? {
            // Lost-the-race then re-read: another process may have completed
            // between our readiness check and taking the lock
            if is_ready(paths, &manifest, &checksum) {
                release_lock(paths);
                return Ok(());
            }

            let result = extract_with_retry(reader, paths, &manifest, &checksum);
            release_lock(paths);
            return result;
        }

        info!("⏳ another process is extracting, waiting (round {round})");
        wait_for_lock(paths, LOCK_WAIT_SECS)?;
    }

    Err(FlavorError::Execution(format!(
        "workenv {} never became ready",
        paths.root().display()
    )))
}

/// READY means: completion marker present, matching this package, and every
/// extractable slot's artifact still on disk.
fn is_ready(paths: &WorkenvPaths, manifest: &Manifest, checksum: &str) -> bool {
    let Some(marker) = CompletionMarker::read(&paths.complete_file()) else {
        return false;
    };
    if !marker.matches(&manifest.package.name, &manifest.package.version, checksum) {
        debug!("🔍 completion marker describes a different package, re-extracting");
        return false;
    }

    for slot in &manifest.slots {
        let Some(ref extract_to) = slot.extract_to else {
            continue;
        };
        match target_in_workenv(paths.root(), extract_to) {
            Ok(target) if target.exists() => {}
            _ => {
                debug!("🔍 slot '{}' artifact missing, re-extracting", slot.name);
                return false;
            }
        }
    }
    true
}

/// Extraction with the one-rebuild recovery of the error policy: an I/O
/// fault wipes the workenv and tries once more; the second fault is fatal.
fn extract_with_retry(
    reader: &mut Reader,
    paths: &WorkenvPaths,
    manifest: &Manifest,
    checksum: &str,
) -> Result<()> {
    match extract_all(reader, paths, manifest, checksum) {
        Ok(()) => Ok(()),
        Err(FlavorError::Io(first)) => {
            warn!("⚠️ extraction failed ({first}), rebuilding workenv from scratch");
            wipe_workenv(paths)?;
            match extract_all(reader, paths, manifest, checksum) {
                Ok(()) => Ok(()),
                Err(second) => {
                    error!("❌ extraction failed again after rebuild: {second}");
                    IncompleteMarker::write(paths, &second.to_string());
                    Err(second)
                }
            }
        }
        // Format/integrity faults will not improve on retry
        Err(e) => {
            error!("❌ extraction failed: {e}");
            IncompleteMarker::write(paths, &e.to_string());
            Err(e)
        }
    }
}

/// Write every extractable slot into the workenv per its lifecycle
fn extract_all(
    reader: &mut Reader,
    paths: &WorkenvPaths,
    manifest: &Manifest,
    checksum: &str,
) -> Result<()> {
    let previous = CompletionMarker::read(&paths.complete_file());
    let mut marker =
        CompletionMarker::new(&manifest.package.name, &manifest.package.version, checksum);

    for (i, slot) in manifest.slots.iter().enumerate() {
        let descriptor = *reader.descriptor(i)?;
        let checksum_hex = hex::encode(descriptor.checksum);
        marker.slots.insert(i as u32, checksum_hex.clone());

        let Some(ref extract_to) = slot.extract_to else {
            debug!("⏭️ slot {i} ('{}') has no extract_to, skipping", slot.name);
            continue;
        };
        let target = target_in_workenv(paths.root(), extract_to)?;

        let lifecycle: Lifecycle = slot.lifecycle.into();
        match lifecycle {
            Lifecycle::Persistent if target.exists() => {
                debug!("📌 slot {i} ('{}') is persistent and present, keeping", slot.name);
                continue;
            }
            Lifecycle::Cached if target.exists() => {
                let recorded = previous
                    .as_ref()
                    .and_then(|m| m.slots.get(&(i as u32)))
                    .map(String::as_str);
                if recorded == Some(checksum_hex.as_str()) {
                    debug!("📌 slot {i} ('{}') is cached and unchanged, keeping", slot.name);
                    continue;
                }
            }
            _ => {}
        }

        info!("📤 extracting slot {i} ('{}') to {}", slot.name, target.display());
        write_slot_artifact(reader, i, &target, descriptor.permissions)?;
    }

    let _ = fs::remove_file(paths.incomplete_file());
    marker.write_atomic(&paths.complete_file())?;
    debug!("✅ workenv {} marked complete", paths.root().display());
    Ok(())
}

/// Stream one slot to its artifact path: decode into a sibling temp file,
/// then rename over the target so readers never see a half-written artifact.
fn write_slot_artifact(
    reader: &mut Reader,
    slot: usize,
    target: &Path,
    permissions: u16,
) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| FlavorError::Config(format!("target {target:?} has no parent")))?;
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(DEFAULT_DIR_PERMS));
    }

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    reader.extract_slot_to(slot, temp.as_file_mut())?;
    temp.flush_and_sync()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(u32::from(permissions)))?;
    }
    #[cfg(not(unix))]
    let _ = permissions;

    if target.exists() {
        if target.is_dir() {
            fs::remove_dir_all(target)?;
        } else {
            fs::remove_file(target)?;
        }
    }
    temp.persist(target)
        .map_err(|e| FlavorError::io_context(format!("renaming into {}", target.display()), e.error))?;
    Ok(())
}

trait FlushSync {
    fn flush_and_sync(&mut self) -> Result<()>;
}

impl FlushSync for tempfile::NamedTempFile {
    fn flush_and_sync(&mut self) -> Result<()> {
        use std::io::Write;
        self.as_file_mut().flush()?;
        self.as_file_mut().sync_all()?;
        Ok(())
    }
}

/// Resolve an `extract_to` path against the workenv root.
///
/// The leading `{workenv}/` is optional; the resolved path must stay inside
/// the workenv.
pub fn target_in_workenv(root: &Path, extract_to: &str) -> Result<PathBuf> {
    let relative = if let Some(rest) = extract_to.strip_prefix("{workenv}") {
        rest.trim_start_matches('/')
    } else if extract_to.starts_with('/') {
        return Err(FlavorError::Config(format!(
            "absolute extract_to {extract_to:?} must be written as {{workenv}}/..."
        )));
    } else {
        extract_to
    };

    if relative.is_empty() {
        return Err(FlavorError::Config(format!(
            "extract_to {extract_to:?} resolves to the workenv root itself"
        )));
    }

    let candidate = PathBuf::from(relative);
    for component in candidate.components() {
        use std::path::Component;
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(FlavorError::Config(format!(
                    "extract_to {extract_to:?} escapes the workenv"
                )));
            }
        }
    }

    Ok(root.join(candidate))
}

fn create_workenv_dir(root: &Path) -> Result<()> {
    fs::create_dir_all(root)
        .map_err(|e| FlavorError::io_context(format!("workenv {}", root.display()), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(root, fs::Permissions::from_mode(DEFAULT_DIR_PERMS))?;
    }
    Ok(())
}

/// Remove everything in the workenv except the lock we are holding
fn wipe_workenv(paths: &WorkenvPaths) -> Result<()> {
    let root = paths.root();
    if !root.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == LOCK_FILE {
            continue;
        }
        if name == COMPLETE_FILE || name == INCOMPLETE_FILE {
            let _ = fs::remove_file(entry.path());
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::target_in_workenv;
    use std::path::Path;

    #[test]
    fn workenv_prefix_is_stripped() {
        let root = Path::new("/cache/flavor/deadbeef");
        assert_eq!(
            target_in_workenv(root, "{workenv}/bin/app").unwrap(),
            root.join("bin/app")
        );
        assert_eq!(
            target_in_workenv(root, "data/file.txt").unwrap(),
            root.join("data/file.txt")
        );
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let root = Path::new("/cache/flavor/deadbeef");
        assert!(target_in_workenv(root, "{workenv}/../evil").is_err());
        assert!(target_in_workenv(root, "/etc/passwd").is_err());
        assert!(target_in_workenv(root, "{workenv}").is_err());
    }
}
