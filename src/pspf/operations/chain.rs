//! Operation chain packing and composition
//!
//! A chain is an ordered sequence of up to 8 opcodes packed little-endian
//! into a `u64`: opcode `i` occupies bits `8i..8i+7` and a zero byte
//! terminates the chain. The packed integer is the only encoding mechanism;
//! the builder applies the chain left-to-right and the launcher reverses it
//! right-to-left.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{MAX_CHAIN_LENGTH, OP_BZIP2, OP_GZIP, OP_TAR, OP_XZ, OP_ZSTD};

use super::operation::Codec;

/// Pack a list of opcodes into a 64-bit integer
pub fn pack_operations(operations: &[u8]) -> Result<u64> {
    if operations.len() > MAX_CHAIN_LENGTH {
        return Err(FlavorError::Format(format!(
            "operation chain too long: {} opcodes (maximum {})",
            operations.len(),
            MAX_CHAIN_LENGTH
        )));
    }

    let mut packed = 0u64;
    for (i, &op) in operations.iter().enumerate() {
        Codec::from_opcode(op)?;
        packed |= u64::from(op) << (i * 8);
    }

    Ok(packed)
}

/// Unpack a 64-bit integer into a list of opcodes.
///
/// Every opcode before the terminator must be assigned, and every byte after
/// it must be zero, so that `pack(unpack(c)) == c` for all accepted values.
pub fn unpack_operations(packed: u64) -> Result<Vec<u8>> {
    let mut operations = Vec::new();
    let mut terminated = false;

    for i in 0..MAX_CHAIN_LENGTH {
        let op = ((packed >> (i * 8)) & 0xFF) as u8;
        if op == 0 {
            terminated = true;
            continue;
        }
        if terminated {
            return Err(FlavorError::Format(format!(
                "operation chain 0x{packed:016x} has opcode bytes after the terminator"
            )));
        }
        Codec::from_opcode(op)?;
        operations.push(op);
    }

    Ok(operations)
}

/// Convert a packed chain to its canonical name
pub fn operations_to_string(packed: u64) -> String {
    if packed == 0 {
        return "raw".to_string();
    }

    let Ok(operations) = unpack_operations(packed) else {
        return format!("invalid(0x{packed:016x})");
    };

    let chain_key = operations_to_chain_key(&operations);
    if let Some(name) = COMMON_CHAINS.get(chain_key.as_str()) {
        return (*name).to_string();
    }

    // Fall back to pipe format
    let names: Vec<&str> = operations
        .iter()
        .filter_map(|&op| Codec::from_opcode(op).ok())
        .map(|codec| codec.name())
        .collect();
    names.join("|")
}

/// Parse an operation string to a packed chain
pub fn string_to_operations(op_string: &str) -> Result<u64> {
    if op_string.is_empty() {
        return Ok(0);
    }

    let op_string = op_string.to_lowercase();

    if let Some(ops) = NAMED_CHAINS.get(op_string.as_str()) {
        return pack_operations(ops);
    }

    // Pipe-separated opcode names, e.g. "tar|gzip"
    if op_string.contains('|') {
        let mut operations = Vec::new();
        for part in op_string.split('|') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            operations.push(opcode_by_name(part)?);
        }
        return pack_operations(&operations);
    }

    Err(FlavorError::Format(format!(
        "unknown operation string: {op_string}"
    )))
}

/// Parse an array of opcode names, e.g. `["tar", "gzip"]`
pub fn names_to_operations(names: &[String]) -> Result<u64> {
    let mut operations = Vec::new();
    for name in names {
        operations.push(opcode_by_name(&name.to_lowercase())?);
    }
    pack_operations(&operations)
}

fn opcode_by_name(name: &str) -> Result<u8> {
    match name {
        "tar" => Ok(OP_TAR),
        "gzip" | "gz" => Ok(OP_GZIP),
        "bzip2" | "bz2" => Ok(OP_BZIP2),
        "xz" => Ok(OP_XZ),
        "zstd" | "zst" => Ok(OP_ZSTD),
        other => Err(FlavorError::Format(format!("unknown operation: {other}"))),
    }
}

/// Apply a chain to a buffer, left-to-right
pub fn apply_chain(operations: &[u8], input: &[u8]) -> Result<Vec<u8>> {
    let mut data = input.to_vec();
    for &op in operations {
        data = Codec::from_opcode(op)?.apply(&data)?;
    }
    Ok(data)
}

/// Reverse a chain on a buffer, right-to-left
pub fn reverse_chain(operations: &[u8], input: &[u8]) -> Result<Vec<u8>> {
    let mut data = input.to_vec();
    for &op in operations.iter().rev() {
        data = Codec::from_opcode(op)?.reverse(&data)?;
    }
    Ok(data)
}

/// Apply a chain from a reader to a writer, staging intermediate results
/// through unnamed temporary files so no stage is held in memory.
///
/// Returns the number of source bytes consumed (the slot's original size).
pub fn apply_chain_stream(
    operations: &[u8],
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> Result<u64> {
    if operations.is_empty() {
        return Ok(io::copy(input, output)?);
    }

    let mut original_size = 0u64;
    let mut staged: Option<std::fs::File> = None;

    for (i, &op) in operations.iter().enumerate() {
        let codec = Codec::from_opcode(op)?;
        let last = i == operations.len() - 1;

        let mut current: Box<dyn Read + '_> = match staged.take() {
            Some(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                Box::new(file)
            }
            None => Box::new(&mut *input),
        };

        if last {
            let consumed = codec.apply_stream(&mut current, output)?;
            if i == 0 {
                original_size = consumed;
            }
        } else {
            let mut next = tempfile::tempfile()?;
            let consumed = codec.apply_stream(&mut current, &mut next)?;
            if i == 0 {
                original_size = consumed;
            }
            staged = Some(next);
        }
    }

    Ok(original_size)
}

/// Reverse a chain from a reader to a writer, right-to-left, staging
/// intermediate results through unnamed temporary files.
///
/// Returns the number of bytes written (the slot's original size).
pub fn reverse_chain_stream(
    operations: &[u8],
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> Result<u64> {
    if operations.is_empty() {
        return Ok(io::copy(input, output)?);
    }

    let mut produced = 0u64;
    let mut staged: Option<std::fs::File> = None;

    for (i, &op) in operations.iter().rev().enumerate() {
        let codec = Codec::from_opcode(op)?;
        let last = i == operations.len() - 1;

        let mut current: Box<dyn Read + '_> = match staged.take() {
            Some(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                Box::new(file)
            }
            None => Box::new(&mut *input),
        };

        if last {
            produced = codec.reverse_stream(&mut current, output)?;
        } else {
            let mut next = tempfile::tempfile()?;
            codec.reverse_stream(&mut current, &mut next)?;
            staged = Some(next);
        }
    }

    Ok(produced)
}

fn operations_to_chain_key(ops: &[u8]) -> String {
    ops.iter()
        .map(|op| format!("{op:02x}"))
        .collect::<Vec<_>>()
        .join("-")
}

lazy_static::lazy_static! {
    static ref COMMON_CHAINS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("01-10", "tar.gz");
        m.insert("01-13", "tar.bz2");
        m.insert("01-16", "tar.xz");
        m.insert("01-1b", "tar.zst");
        m.insert("10", "gzip");
        m.insert("13", "bzip2");
        m.insert("16", "xz");
        m.insert("1b", "zstd");
        m.insert("01", "tar");
        m
    };

    static ref NAMED_CHAINS: HashMap<&'static str, Vec<u8>> = {
        let mut m = HashMap::new();
        m.insert("raw", vec![]);
        m.insert("none", vec![]);
        m.insert("gzip", vec![OP_GZIP]);
        m.insert("bzip2", vec![OP_BZIP2]);
        m.insert("xz", vec![OP_XZ]);
        m.insert("zstd", vec![OP_ZSTD]);
        m.insert("tar", vec![OP_TAR]);
        m.insert("tar.gz", vec![OP_TAR, OP_GZIP]);
        m.insert("tar.bz2", vec![OP_TAR, OP_BZIP2]);
        m.insert("tar.xz", vec![OP_TAR, OP_XZ]);
        m.insert("tar.zst", vec![OP_TAR, OP_ZSTD]);
        m.insert("tgz", vec![OP_TAR, OP_GZIP]);
        m.insert("tbz2", vec![OP_TAR, OP_BZIP2]);
        m.insert("txz", vec![OP_TAR, OP_XZ]);
        m
    };
}
