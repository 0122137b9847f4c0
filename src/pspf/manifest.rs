//! Build manifest structures
//!
//! The manifest is consumed by the builder and carried into the package as
//! gzipped metadata (see `metadata`). It is self-describing: everything the
//! launcher needs to recreate the workenv and execute the child lives here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{
    DEFAULT_EXECUTABLE_PERMS, DEFAULT_FILE_PERMS, MANIFEST_FORMAT_VERSION,
};
use crate::pspf::operations::{names_to_operations, string_to_operations, unpack_operations};
use crate::pspf::slots::{Lifecycle, Purpose};

/// Top-level manifest, format version "2025.1"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: String,
    pub package: PackageInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildInfo>,
    pub slots: Vec<ManifestSlot>,
    pub execution: ExecutionInfo,
}

/// Package identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<serde_json::Value>,
}

/// Provenance of the build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    pub builder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub deterministic: bool,
}

/// One slot entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSlot {
    /// Optional position validator; must equal the table index when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
    pub name: String,
    pub purpose: PurposeField,
    pub lifecycle: LifecycleField,
    #[serde(default)]
    pub operations: OperationsSpec,
    /// Source path, relative to the manifest's directory
    pub source: String,
    /// Target path under the workenv; a slot without one is kept in the
    /// package only and never materialised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_to: Option<String>,
    /// Octal permission string, e.g. "755" or "0o755"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

/// Execution contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_slot: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInfo>,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvPolicy>,
}

/// Environment policy, applied unset -> pass -> set -> map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unset: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<BTreeMap<String, String>>,
}

/// Purpose field, serialised as its lowercase name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurposeField {
    Runtime,
    Payload,
    Resource,
    Data,
    Other,
}

impl From<PurposeField> for Purpose {
    fn from(value: PurposeField) -> Self {
        match value {
            PurposeField::Runtime => Purpose::Runtime,
            PurposeField::Payload => Purpose::Payload,
            PurposeField::Resource => Purpose::Resource,
            PurposeField::Data => Purpose::Data,
            PurposeField::Other => Purpose::Other,
        }
    }
}

/// Lifecycle field, serialised as its lowercase name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleField {
    Cached,
    Volatile,
    Persistent,
}

impl From<LifecycleField> for Lifecycle {
    fn from(value: LifecycleField) -> Self {
        match value {
            LifecycleField::Cached => Lifecycle::Cached,
            LifecycleField::Volatile => Lifecycle::Volatile,
            LifecycleField::Persistent => Lifecycle::Persistent,
        }
    }
}

/// The `operations` field accepts a canonical name ("tar.gz"), an integer
/// equal to the packed chain, or an array of opcode names. All three forms
/// produce the same `u64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationsSpec {
    Name(String),
    Packed(u64),
    Names(Vec<String>),
}

impl Default for OperationsSpec {
    fn default() -> Self {
        OperationsSpec::Packed(0)
    }
}

impl OperationsSpec {
    /// Normalise to the packed 64-bit chain
    pub fn packed(&self) -> Result<u64> {
        match self {
            OperationsSpec::Name(name) => string_to_operations(name),
            OperationsSpec::Packed(value) => {
                // Validate the integer form byte-by-byte
                unpack_operations(*value)?;
                Ok(*value)
            }
            OperationsSpec::Names(names) => names_to_operations(names),
        }
    }
}

impl ManifestSlot {
    /// Resolve the permission bits, defaulting per purpose
    pub fn permission_bits(&self) -> Result<u16> {
        match &self.permissions {
            Some(text) => parse_octal_permissions(text),
            None => Ok(match self.purpose {
                PurposeField::Runtime => DEFAULT_EXECUTABLE_PERMS,
                _ => DEFAULT_FILE_PERMS,
            }),
        }
    }
}

/// Parse an octal permission string: "755", "0755" or "0o755"
pub fn parse_octal_permissions(text: &str) -> Result<u16> {
    let digits = text
        .strip_prefix("0o")
        .or_else(|| text.strip_prefix("0O"))
        .unwrap_or(text);
    u16::from_str_radix(digits, 8).map_err(|_| {
        FlavorError::Config(format!("invalid octal permission string: {text:?}"))
    })
}

impl Manifest {
    /// Read and validate a manifest from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| FlavorError::io_context(format!("manifest {}", path.display()), e))?;
        Self::from_str(&data)
    }

    /// Parse and validate a manifest from a JSON string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(data)
            .map_err(|e| FlavorError::Config(format!("manifest parse failed: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MANIFEST_FORMAT_VERSION {
            return Err(FlavorError::Format(format!(
                "unsupported manifest format_version {:?} (expected {:?})",
                self.format_version, MANIFEST_FORMAT_VERSION
            )));
        }
        if self.package.name.is_empty() {
            return Err(FlavorError::Config("package.name is empty".to_string()));
        }
        if self.execution.command.is_empty() {
            return Err(FlavorError::Config("execution.command is empty".to_string()));
        }

        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(declared) = slot.slot {
                if declared as usize != i {
                    return Err(FlavorError::Format(format!(
                        "slot '{}' declares slot number {declared} but sits at table index {i}",
                        slot.name
                    )));
                }
            }
            slot.operations.packed().map_err(|e| match e {
                FlavorError::Format(msg) => {
                    FlavorError::Format(format!("slot '{}': {msg}", slot.name))
                }
                other => other,
            })?;
            slot.permission_bits()?;
        }

        if let Some(primary) = self.execution.primary_slot {
            if primary as usize >= self.slots.len() {
                return Err(FlavorError::Config(format!(
                    "execution.primary_slot {primary} is out of range ({} slots)",
                    self.slots.len()
                )));
            }
        }

        Ok(())
    }

    /// Fill in each slot's explicit index so the embedded metadata is
    /// self-describing
    pub fn normalize(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.slot = Some(i as u32);
        }
    }
}
