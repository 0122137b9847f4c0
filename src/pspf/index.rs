//! PSPF/2025 index block
//!
//! The 8192-byte fixed structure near the end of a package. All integers are
//! little-endian. The integrity seal (CRC32 + Ed25519 signature) is computed
//! over the block with the 512-byte signature region zeroed; the CRC covers
//! bytes 14..8192 of that view and is written before signing, so the
//! signature also covers the final CRC bytes.

use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{
    FORMAT_VERSION_MAJOR, FORMAT_VERSION_MINOR, INDEX_CRC_COVERAGE_START, INDEX_CRC_OFFSET,
    INDEX_MAGIC, INDEX_PUBLIC_KEY_OFFSET, INDEX_RESERVED_OFFSET, INDEX_SIGNATURE_OFFSET,
    INDEX_SIZE,
};

/// Parsed PSPF/2025 index block
#[derive(Debug, Clone)]
pub struct Index {
    pub version_major: u8,
    pub version_minor: u8,
    pub index_crc32: u32,
    pub package_size: u64,
    pub launcher_size: u64,
    pub metadata_offset: u64,
    pub metadata_size: u64,
    pub slot_table_offset: u64,
    pub slot_count: u64,
    pub public_key: [u8; 32],
    pub signature: [u8; 64],
}

impl Index {
    /// Create a new index with defaults
    pub fn new() -> Self {
        Index {
            version_major: FORMAT_VERSION_MAJOR,
            version_minor: FORMAT_VERSION_MINOR,
            index_crc32: 0,
            package_size: 0,
            launcher_size: 0,
            metadata_offset: 0,
            metadata_size: 0,
            slot_table_offset: 0,
            slot_count: 0,
            public_key: [0; 32],
            signature: [0; 64],
        }
    }

    /// Pack the index to its 8192-byte on-disk form
    pub fn pack(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; INDEX_SIZE];

        bytes[0..8].copy_from_slice(INDEX_MAGIC);
        bytes[8] = self.version_major;
        bytes[9] = self.version_minor;
        bytes[10..14].copy_from_slice(&self.index_crc32.to_le_bytes());
        // bytes 14..16 reserved, zero
        bytes[16..24].copy_from_slice(&self.package_size.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.launcher_size.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.metadata_offset.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.metadata_size.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.slot_table_offset.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.slot_count.to_le_bytes());
        bytes[64..96].copy_from_slice(&self.public_key);
        bytes[96..160].copy_from_slice(&self.signature);
        // bytes 160..608 signature padding and 608..8192 reserved stay zero

        bytes
    }

    /// Unpack and structurally validate an index block.
    ///
    /// CRC and signature are checked separately (`verify_crc`,
    /// `verify_signature`) so the launcher can honour its validation level.
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() != INDEX_SIZE {
            return Err(FlavorError::Format(format!(
                "index block is {} bytes, expected {INDEX_SIZE}",
                data.len()
            )));
        }

        if &data[0..8] != INDEX_MAGIC {
            return Err(FlavorError::Format(format!(
                "index magic mismatch at block offset 0: {:02x?}",
                &data[0..8]
            )));
        }

        let version_major = data[8];
        let version_minor = data[9];
        if version_major != FORMAT_VERSION_MAJOR {
            return Err(FlavorError::Format(format!(
                "unsupported format version {version_major}.{version_minor}"
            )));
        }

        // The signature region is 512 bytes but Ed25519 uses only 64; the
        // trailing 448 bytes and everything after them must be zero.
        if data[160..INDEX_RESERVED_OFFSET].iter().any(|&b| b != 0) {
            return Err(FlavorError::Format(
                "signature padding (block offsets 160..608) is not zero".to_string(),
            ));
        }
        if data[INDEX_RESERVED_OFFSET..].iter().any(|&b| b != 0) {
            return Err(FlavorError::Format(
                "reserved region (block offsets 608..8192) is not zero".to_string(),
            ));
        }
        if data[14] != 0 || data[15] != 0 {
            return Err(FlavorError::Format(
                "reserved bytes at block offsets 14..16 are not zero".to_string(),
            ));
        }

        let read_u64 = |off: usize| -> u64 {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[off..off + 8]);
            u64::from_le_bytes(buf)
        };

        let mut crc_buf = [0u8; 4];
        crc_buf.copy_from_slice(&data[INDEX_CRC_OFFSET..INDEX_CRC_OFFSET + 4]);

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&data[INDEX_PUBLIC_KEY_OFFSET..INDEX_PUBLIC_KEY_OFFSET + 32]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&data[INDEX_SIGNATURE_OFFSET..INDEX_SIGNATURE_OFFSET + 64]);

        Ok(Index {
            version_major,
            version_minor,
            index_crc32: u32::from_le_bytes(crc_buf),
            package_size: read_u64(16),
            launcher_size: read_u64(24),
            metadata_offset: read_u64(32),
            metadata_size: read_u64(40),
            slot_table_offset: read_u64(48),
            slot_count: read_u64(56),
            public_key,
            signature,
        })
    }

    /// Seal the index: fill in CRC32 and Ed25519 signature, returning the
    /// final on-disk bytes.
    pub fn seal(&mut self, signing_key: &SigningKey) -> Vec<u8> {
        self.index_crc32 = 0;
        self.signature = [0; 64];
        let mut bytes = self.pack();

        let crc = crc32(&bytes[INDEX_CRC_COVERAGE_START..]);
        bytes[INDEX_CRC_OFFSET..INDEX_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        self.index_crc32 = crc;

        let signature = signing_key.sign(&bytes);
        self.signature = signature.to_bytes();
        bytes[INDEX_SIGNATURE_OFFSET..INDEX_SIGNATURE_OFFSET + 64]
            .copy_from_slice(&self.signature);

        bytes
    }

    /// Verify the stored CRC32 against the raw block
    pub fn verify_crc(raw: &[u8]) -> Result<()> {
        if raw.len() != INDEX_SIZE {
            return Err(FlavorError::Format(format!(
                "index block is {} bytes, expected {INDEX_SIZE}",
                raw.len()
            )));
        }

        let mut stored = [0u8; 4];
        stored.copy_from_slice(&raw[INDEX_CRC_OFFSET..INDEX_CRC_OFFSET + 4]);
        let stored = u32::from_le_bytes(stored);

        let view = sealed_view(raw);
        let calculated = crc32(&view[INDEX_CRC_COVERAGE_START..]);
        if calculated != stored {
            return Err(FlavorError::Integrity(format!(
                "index CRC32 mismatch: stored {stored:08x}, calculated {calculated:08x}"
            )));
        }
        Ok(())
    }

    /// Verify the Ed25519 signature against the raw block and its embedded
    /// public key
    pub fn verify_signature(raw: &[u8]) -> Result<()> {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        if raw.len() != INDEX_SIZE {
            return Err(FlavorError::Format(format!(
                "index block is {} bytes, expected {INDEX_SIZE}",
                raw.len()
            )));
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&raw[INDEX_PUBLIC_KEY_OFFSET..INDEX_PUBLIC_KEY_OFFSET + 32]);
        if key_bytes.iter().all(|&b| b == 0) {
            return Err(FlavorError::Integrity(
                "package carries no integrity seal (public key is zero)".to_string(),
            ));
        }

        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&raw[INDEX_SIGNATURE_OFFSET..INDEX_SIGNATURE_OFFSET + 64]);
        if sig_bytes.iter().all(|&b| b == 0) {
            return Err(FlavorError::Integrity(
                "package carries no integrity seal (signature is zero)".to_string(),
            ));
        }

        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| FlavorError::Crypto(format!("embedded public key is invalid: {e}")))?;
        let signature = Signature::from_bytes(&sig_bytes);

        let view = sealed_view(raw);
        verifying_key
            .verify(&view, &signature)
            .map_err(|_| FlavorError::Integrity("Ed25519 signature verification failed".to_string()))
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the block with the whole 512-byte signature region zeroed: the
/// common domain of the CRC and the signature.
fn sealed_view(raw: &[u8]) -> Vec<u8> {
    let mut view = raw.to_vec();
    view[INDEX_SIGNATURE_OFFSET..INDEX_RESERVED_OFFSET].fill(0);
    view
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// Package integrity checksum: hex SHA-256 of the raw index block. The first
/// eight characters name the workenv directory.
pub fn integrity_checksum(raw_index: &[u8]) -> String {
    let digest = Sha256::digest(raw_index);
    hex::encode(digest)
}
