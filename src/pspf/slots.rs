//! Slot descriptors and the slot table
//!
//! Each slot is described by a fixed 64-byte record in the slot table, which
//! is a contiguous array ordered (and indexed) by slot id.

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::SLOT_DESCRIPTOR_SIZE;
use crate::pspf::operations::unpack_operations;

/// Role of a slot's content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Runtime,
    Payload,
    Resource,
    Data,
    Other,
}

impl Purpose {
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Purpose::Runtime),
            1 => Ok(Purpose::Payload),
            2 => Ok(Purpose::Resource),
            3 => Ok(Purpose::Data),
            4 => Ok(Purpose::Other),
            other => Err(FlavorError::Format(format!(
                "unknown slot purpose value {other}"
            ))),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Purpose::Runtime => 0,
            Purpose::Payload => 1,
            Purpose::Resource => 2,
            Purpose::Data => 3,
            Purpose::Other => 4,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "runtime" => Ok(Purpose::Runtime),
            "payload" => Ok(Purpose::Payload),
            "resource" => Ok(Purpose::Resource),
            "data" => Ok(Purpose::Data),
            "other" => Ok(Purpose::Other),
            other => Err(FlavorError::Config(format!("unknown slot purpose: {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Runtime => "runtime",
            Purpose::Payload => "payload",
            Purpose::Resource => "resource",
            Purpose::Data => "data",
            Purpose::Other => "other",
        }
    }
}

/// Cache behaviour of a slot's extracted artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Skip extraction when present and the recorded checksum matches
    Cached,
    /// Always rewritten on extraction
    Volatile,
    /// Retained across workenv cleans
    Persistent,
}

impl Lifecycle {
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Lifecycle::Cached),
            1 => Ok(Lifecycle::Volatile),
            2 => Ok(Lifecycle::Persistent),
            other => Err(FlavorError::Format(format!(
                "unknown slot lifecycle value {other}"
            ))),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Lifecycle::Cached => 0,
            Lifecycle::Volatile => 1,
            Lifecycle::Persistent => 2,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "cached" => Ok(Lifecycle::Cached),
            "volatile" => Ok(Lifecycle::Volatile),
            "persistent" => Ok(Lifecycle::Persistent),
            other => Err(FlavorError::Config(format!(
                "unknown slot lifecycle: {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Cached => "cached",
            Lifecycle::Volatile => "volatile",
            Lifecycle::Persistent => "persistent",
        }
    }
}

/// Slot descriptor - 64 bytes on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDescriptor {
    /// Equals the descriptor's table index
    pub id: u32,
    /// Reserved, currently zero
    pub flags: u32,
    /// Absolute file offset of the encoded payload
    pub offset: u64,
    /// Bytes as stored on disk (post-codecs)
    pub encoded_size: u64,
    /// Bytes after reversing all codecs
    pub original_size: u64,
    /// First 8 bytes of SHA-256 over the encoded payload
    pub checksum: [u8; 8],
    /// Packed operation chain
    pub operations: u64,
    pub purpose: Purpose,
    pub lifecycle: Lifecycle,
    /// POSIX permission bits for the extracted artifact
    pub permissions: u16,
}

impl SlotDescriptor {
    pub fn new(id: u32) -> Self {
        SlotDescriptor {
            id,
            flags: 0,
            offset: 0,
            encoded_size: 0,
            original_size: 0,
            checksum: [0; 8],
            operations: 0,
            purpose: Purpose::Data,
            lifecycle: Lifecycle::Cached,
            permissions: 0o600,
        }
    }

    /// Pack the descriptor to its 64-byte on-disk form
    pub fn pack(&self) -> [u8; SLOT_DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; SLOT_DESCRIPTOR_SIZE];

        bytes[0..4].copy_from_slice(&self.id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.offset.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.encoded_size.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.original_size.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.checksum);
        bytes[40..48].copy_from_slice(&self.operations.to_le_bytes());
        bytes[48..52].copy_from_slice(&self.purpose.to_wire().to_le_bytes());
        bytes[52..56].copy_from_slice(&self.lifecycle.to_wire().to_le_bytes());
        bytes[56..58].copy_from_slice(&self.permissions.to_le_bytes());
        // bytes 58..64 reserved, zero

        bytes
    }

    /// Unpack and validate a descriptor.
    ///
    /// `expected_id` is the table index the record was read from; the stored
    /// id must match it. Reserved bytes must be zero and every opcode in the
    /// chain must be recognised.
    pub fn unpack(data: &[u8], expected_id: u32) -> Result<Self> {
        let raw = RawDescriptor::read(data)?;

        if raw.id != expected_id {
            return Err(FlavorError::Format(format!(
                "slot descriptor id {} does not match table index {expected_id}",
                raw.id
            )));
        }
        let id = raw.id;

        if raw.flags != 0 {
            return Err(FlavorError::Format(format!(
                "slot {id}: reserved flags field is 0x{:08x}, expected zero",
                raw.flags
            )));
        }
        if data[58..64].iter().any(|&b| b != 0) {
            return Err(FlavorError::Format(format!(
                "slot {id}: reserved descriptor bytes are not zero"
            )));
        }

        unpack_operations(raw.operations)
            .map_err(|e| FlavorError::Format(format!("slot {id}: {e}")))?;

        Ok(SlotDescriptor {
            id,
            flags: raw.flags,
            offset: raw.offset,
            encoded_size: raw.encoded_size,
            original_size: raw.original_size,
            checksum: raw.checksum,
            operations: raw.operations,
            purpose: Purpose::from_wire(raw.purpose)
                .map_err(|e| FlavorError::Format(format!("slot {id}: {e}")))?,
            lifecycle: Lifecycle::from_wire(raw.lifecycle)
                .map_err(|e| FlavorError::Format(format!("slot {id}: {e}")))?,
            permissions: raw.permissions,
        })
    }

    /// Unpack a descriptor without enforcing the validation rules.
    ///
    /// Used when validation is switched off so a broken package can still be
    /// dissected: the stored id is taken as-is and unknown purpose/lifecycle
    /// values fall back to `Other`/`Volatile`. The operation chain stays the
    /// raw integer either way and is re-checked at decode time.
    pub fn unpack_lenient(data: &[u8]) -> Result<Self> {
        let raw = RawDescriptor::read(data)?;

        Ok(SlotDescriptor {
            id: raw.id,
            flags: raw.flags,
            offset: raw.offset,
            encoded_size: raw.encoded_size,
            original_size: raw.original_size,
            checksum: raw.checksum,
            operations: raw.operations,
            purpose: Purpose::from_wire(raw.purpose).unwrap_or(Purpose::Other),
            lifecycle: Lifecycle::from_wire(raw.lifecycle).unwrap_or(Lifecycle::Volatile),
            permissions: raw.permissions,
        })
    }

    /// Check that the payload region lies within `[data_start, data_end)`,
    /// the span between the launcher image and the slot table.
    pub fn check_bounds(&self, data_start: u64, data_end: u64) -> Result<()> {
        if self.encoded_size == 0 {
            return Ok(());
        }
        let end = self
            .offset
            .checked_add(self.encoded_size)
            .ok_or_else(|| {
                FlavorError::Format(format!(
                    "slot {}: offset {:#x} + size {} overflows",
                    self.id, self.offset, self.encoded_size
                ))
            })?;
        if self.offset < data_start || end > data_end {
            return Err(FlavorError::Format(format!(
                "slot {}: payload range {:#x}..{:#x} escapes the data region {:#x}..{:#x}",
                self.id, self.offset, end, data_start, data_end
            )));
        }
        Ok(())
    }
}

/// Wire fields of a descriptor before any validation is applied
struct RawDescriptor {
    id: u32,
    flags: u32,
    offset: u64,
    encoded_size: u64,
    original_size: u64,
    checksum: [u8; 8],
    operations: u64,
    purpose: u32,
    lifecycle: u32,
    permissions: u16,
}

impl RawDescriptor {
    fn read(data: &[u8]) -> Result<Self> {
        if data.len() != SLOT_DESCRIPTOR_SIZE {
            return Err(FlavorError::Format(format!(
                "slot descriptor is {} bytes, expected {SLOT_DESCRIPTOR_SIZE}",
                data.len()
            )));
        }

        let read_u32 = |off: usize| -> u32 {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&data[off..off + 4]);
            u32::from_le_bytes(buf)
        };
        let read_u64 = |off: usize| -> u64 {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[off..off + 8]);
            u64::from_le_bytes(buf)
        };

        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&data[32..40]);
        let mut permissions_buf = [0u8; 2];
        permissions_buf.copy_from_slice(&data[56..58]);

        Ok(RawDescriptor {
            id: read_u32(0),
            flags: read_u32(4),
            offset: read_u64(8),
            encoded_size: read_u64(16),
            original_size: read_u64(24),
            checksum,
            operations: read_u64(40),
            purpose: read_u32(48),
            lifecycle: read_u32(52),
            permissions: u16::from_le_bytes(permissions_buf),
        })
    }
}
