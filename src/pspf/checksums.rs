//! Streaming checksum helper shared by builder, reader and workenv cache

use sha2::{Digest, Sha256};
use std::io::Read;

use crate::errors::Result;

/// First 8 bytes of SHA-256 over a stream
pub fn checksum_first8(reader: &mut dyn Read) -> Result<[u8; 8]> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let digest = hasher.finalize();
    let mut first8 = [0u8; 8];
    first8.copy_from_slice(&digest[..8]);
    Ok(first8)
}
