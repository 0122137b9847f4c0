//! Individual codec operations
//!
//! The codec layer is a closed set of reversible byte-stream transforms,
//! dispatched on the opcode byte. Every codec exposes apply/reverse on both
//! buffers and streams; the builder streams large slots through a temporary
//! file to constrain peak memory.

use std::io::{self, Read, Write};

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{OP_BZIP2, OP_GZIP, OP_NONE, OP_TAR, OP_XZ, OP_ZSTD};

/// Name of the single logical entry inside a TAR-coded slot
const TAR_ENTRY_NAME: &str = "data";

// Fixed codec write levels so that identical inputs produce identical bytes
const XZ_LEVEL: u32 = 6;
const ZSTD_LEVEL: i32 = 3;

/// A single reversible transform, identified by an 8-bit opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Tar,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Codec {
    /// Resolve an opcode byte. `OP_NONE` is the chain terminator and never a
    /// chain member; it and every unassigned opcode are rejected.
    pub fn from_opcode(op: u8) -> Result<Self> {
        match op {
            OP_TAR => Ok(Codec::Tar),
            OP_GZIP => Ok(Codec::Gzip),
            OP_BZIP2 => Ok(Codec::Bzip2),
            OP_XZ => Ok(Codec::Xz),
            OP_ZSTD => Ok(Codec::Zstd),
            OP_NONE => Err(FlavorError::Format(
                "opcode 0x00 (NONE) is not valid inside an operation chain".to_string(),
            )),
            other => Err(FlavorError::Format(format!(
                "unknown opcode 0x{other:02x}"
            ))),
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Codec::Tar => OP_TAR,
            Codec::Gzip => OP_GZIP,
            Codec::Bzip2 => OP_BZIP2,
            Codec::Xz => OP_XZ,
            Codec::Zstd => OP_ZSTD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Tar => "tar",
            Codec::Gzip => "gzip",
            Codec::Bzip2 => "bzip2",
            Codec::Xz => "xz",
            Codec::Zstd => "zstd",
        }
    }

    /// Apply the operation to a buffer
    pub fn apply(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.apply_stream(&mut io::Cursor::new(input), &mut output)?;
        Ok(output)
    }

    /// Reverse the operation on a buffer
    pub fn reverse(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.reverse_stream(&mut io::Cursor::new(input), &mut output)?;
        Ok(output)
    }

    /// Apply the operation from a reader to a writer, returning the number of
    /// input bytes consumed
    pub fn apply_stream(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        match self {
            Codec::Tar => tar_apply(input, output),
            Codec::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(output, flate2::Compression::default());
                let copied = io::copy(input, &mut encoder)?;
                encoder.finish()?;
                Ok(copied)
            }
            Codec::Bzip2 => {
                // bzip2 always runs at level 9
                let mut encoder =
                    bzip2::write::BzEncoder::new(output, bzip2::Compression::best());
                let copied = io::copy(input, &mut encoder)?;
                encoder.finish()?;
                Ok(copied)
            }
            Codec::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(output, XZ_LEVEL);
                let copied = io::copy(input, &mut encoder)?;
                encoder.finish()?;
                Ok(copied)
            }
            Codec::Zstd => {
                let mut encoder = zstd::stream::write::Encoder::new(output, ZSTD_LEVEL)?;
                let copied = io::copy(input, &mut encoder)?;
                encoder.finish()?;
                Ok(copied)
            }
        }
    }

    /// Reverse the operation from a reader to a writer, returning the number
    /// of output bytes produced
    pub fn reverse_stream(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
        let produced = match self {
            Codec::Tar => tar_reverse(input, output)?,
            Codec::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(input);
                io::copy(&mut decoder, output).map_err(|e| decode_error("gzip", &e))?
            }
            Codec::Bzip2 => {
                let mut decoder = bzip2::read::BzDecoder::new(input);
                io::copy(&mut decoder, output).map_err(|e| decode_error("bzip2", &e))?
            }
            Codec::Xz => {
                let mut decoder = xz2::read::XzDecoder::new(input);
                io::copy(&mut decoder, output).map_err(|e| decode_error("xz", &e))?
            }
            Codec::Zstd => {
                let mut decoder = zstd::stream::read::Decoder::new(input)
                    .map_err(|e| decode_error("zstd", &e))?;
                io::copy(&mut decoder, output).map_err(|e| decode_error("zstd", &e))?
            }
        };
        Ok(produced)
    }
}

fn decode_error(codec: &str, err: &io::Error) -> FlavorError {
    FlavorError::Format(format!("{codec} stream is malformed: {err}"))
}

/// Wrap the input bytes as a deterministic single-entry POSIX ustar archive.
///
/// The header needs the entry size up front, so the input is staged through
/// an unnamed temporary file rather than held in memory.
fn tar_apply(input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
    let mut staging = tempfile::tempfile()?;
    let size = io::copy(input, &mut staging)?;
    use std::io::Seek;
    staging.seek(io::SeekFrom::Start(0))?;

    let mut header = tar::Header::new_ustar();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut builder = tar::Builder::new(output);
    builder
        .append_data(&mut header, TAR_ENTRY_NAME, &mut staging)
        .map_err(|e| FlavorError::io_context("tar append", e))?;
    builder
        .finish()
        .map_err(|e| FlavorError::io_context("tar finish", e))?;
    Ok(size)
}

/// Stream the first entry of a ustar archive to the writer
fn tar_reverse(input: &mut dyn Read, output: &mut dyn Write) -> Result<u64> {
    let mut archive = tar::Archive::new(input);
    let mut entries = archive
        .entries()
        .map_err(|e| decode_error("tar", &e))?;
    let entry = entries
        .next()
        .ok_or_else(|| FlavorError::Format("tar archive has no entries".to_string()))?;
    let mut entry = entry.map_err(|e| decode_error("tar", &e))?;
    let produced = io::copy(&mut entry, output).map_err(|e| decode_error("tar", &e))?;
    Ok(produced)
}
