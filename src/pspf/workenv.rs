//! Workenv layout and state markers
//!
//! A workenv is a directory under the per-user cache root, named with the
//! first 8 hex chars of the package's integrity checksum. Its state is
//! carried by two sentinel files: `.extraction.lock` (advisory) and
//! `.extraction.complete` (atomic JSON marker). A third,
//! `.extraction.incomplete`, records the reason for a faulted extraction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{COMPLETE_FILE, INCOMPLETE_FILE, LOCK_FILE};
use crate::utils::get_cache_root;

/// Paths of one workenv
#[derive(Debug, Clone)]
pub struct WorkenvPaths {
    root: PathBuf,
}

impl WorkenvPaths {
    /// Workenv location for a package integrity checksum (full hex digest)
    pub fn for_checksum(cache_root: &Path, integrity_checksum: &str) -> Self {
        let short = &integrity_checksum[..8.min(integrity_checksum.len())];
        WorkenvPaths {
            root: cache_root.join(short),
        }
    }

    /// Workenv location under the default cache root
    pub fn from_checksum(integrity_checksum: &str) -> Self {
        Self::for_checksum(&get_cache_root(), integrity_checksum)
    }

    /// The workenv root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn complete_file(&self) -> PathBuf {
        self.root.join(COMPLETE_FILE)
    }

    pub fn incomplete_file(&self) -> PathBuf {
        self.root.join(INCOMPLETE_FILE)
    }
}

/// The `.extraction.complete` marker. Written last and atomically: no
/// consumer observes a half-populated workenv that claims completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub package_name: String,
    pub version: String,
    /// Full hex integrity checksum of the package
    pub checksum: String,
    pub timestamp: String,
    /// Encoded checksum per slot id, recorded for `cached`-lifecycle reuse
    #[serde(default)]
    pub slots: BTreeMap<u32, String>,
}

impl CompletionMarker {
    pub fn new(package_name: &str, version: &str, checksum: &str) -> Self {
        CompletionMarker {
            package_name: package_name.to_string(),
            version: version.to_string(),
            checksum: checksum.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            slots: BTreeMap::new(),
        }
    }

    /// Does this marker describe the given package?
    pub fn matches(&self, package_name: &str, version: &str, checksum: &str) -> bool {
        self.package_name == package_name && self.version == version && self.checksum == checksum
    }

    /// Read a marker if one exists; a malformed marker reads as absent
    pub fn read(path: &Path) -> Option<Self> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Write the marker atomically (write-temp + rename)
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| FlavorError::Config(format!("marker path {path:?} has no parent")))?;
        let json = serde_json::to_string_pretty(self)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        use std::io::Write;
        temp.write_all(json.as_bytes())?;
        temp.flush()?;
        temp.persist(path)
            .map_err(|e| FlavorError::io_context("completion marker rename", e.error))?;
        Ok(())
    }
}

/// The `.extraction.incomplete` marker, left behind by a faulted extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompleteMarker {
    pub reason: String,
    pub timestamp: String,
}

impl IncompleteMarker {
    pub fn write(paths: &WorkenvPaths, reason: &str) {
        let marker = IncompleteMarker {
            reason: reason.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        // Best effort: the fault itself is what gets reported
        if let Ok(json) = serde_json::to_string_pretty(&marker) {
            let _ = fs::write(paths.incomplete_file(), json);
        }
        let _ = fs::remove_file(paths.complete_file());
    }
}

#[cfg(test)]
mod tests {
    use super::{CompletionMarker, WorkenvPaths};
    use std::path::Path;

    #[test]
    fn workenv_is_named_by_checksum_prefix() {
        let paths = WorkenvPaths::for_checksum(Path::new("/cache/flavor"), "deadbeefcafe0123");
        assert_eq!(paths.root(), Path::new("/cache/flavor/deadbeef"));
        assert!(paths.lock_file().ends_with(".extraction.lock"));
        assert!(paths.complete_file().ends_with(".extraction.complete"));
    }

    #[test]
    fn marker_round_trips_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".extraction.complete");

        let mut marker = CompletionMarker::new("demo", "1.0.0", "deadbeef");
        marker.slots.insert(0, "0011223344556677".to_string());
        marker.write_atomic(&path).unwrap();

        let loaded = CompletionMarker::read(&path).unwrap();
        assert!(loaded.matches("demo", "1.0.0", "deadbeef"));
        assert!(!loaded.matches("demo", "1.0.1", "deadbeef"));
        assert_eq!(loaded.slots.get(&0).map(String::as_str), Some("0011223344556677"));
    }

    #[test]
    fn malformed_marker_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".extraction.complete");
        std::fs::write(&path, "not json").unwrap();
        assert!(CompletionMarker::read(&path).is_none());
    }
}
