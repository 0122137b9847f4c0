//! Package verification and validation levels

use log::{debug, info};
use std::env;
use std::path::Path;

use crate::api::VerifyReport;
use crate::errors::Result;
use crate::pspf::constants::ENV_VALIDATION;
use crate::pspf::reader::Reader;

/// How much of a package the launcher checks before executing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    /// All checks, every slot checksum
    Strict,
    /// Index + signature + metadata (default)
    Standard,
    /// Index + metadata, no signature
    Relaxed,
    /// Index only
    Minimal,
    /// Skip everything (testing only)
    None,
}

impl ValidationLevel {
    /// Parse a validation level (case insensitive)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "standard" => Some(Self::Standard),
            "relaxed" => Some(Self::Relaxed),
            "minimal" => Some(Self::Minimal),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Relaxed => "relaxed",
            Self::Minimal => "minimal",
            Self::None => "none",
        }
    }

    /// Footer magic, index magic, CRC, geometry
    pub fn checks_index(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Metadata must decode
    pub fn checks_metadata(&self) -> bool {
        matches!(self, Self::Strict | Self::Standard | Self::Relaxed)
    }

    /// Ed25519 signature over the index
    pub fn checks_signature(&self) -> bool {
        matches!(self, Self::Strict | Self::Standard)
    }

    /// Every slot checksum
    pub fn checks_slot_checksums(&self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Resolve the validation level from `FLAVOR_VALIDATION` (default: standard)
pub fn get_validation_level() -> ValidationLevel {
    if let Ok(val) = env::var(ENV_VALIDATION) {
        if let Some(level) = ValidationLevel::parse(&val) {
            return level;
        }
        debug!("⚠️ ignoring unrecognised {ENV_VALIDATION}={val}");
    }
    ValidationLevel::Standard
}

/// Fully verify a package: §4.4 steps 1-5 plus every slot checksum
pub fn verify(package_path: &Path) -> Result<VerifyReport> {
    info!("🔍 verifying package {}", package_path.display());

    let mut reader = Reader::open_with_level(package_path, ValidationLevel::Strict)?;
    let checksum = reader.integrity_checksum();
    let slot_count = reader.descriptors().len();
    let manifest = reader.metadata()?;

    Ok(VerifyReport {
        format: "PSPF/2025".to_string(),
        package_name: manifest.package.name.clone(),
        package_version: manifest.package.version.clone(),
        slot_count,
        integrity_checksum: checksum,
    })
}
