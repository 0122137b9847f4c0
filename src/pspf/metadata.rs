//! Metadata block encoding
//!
//! The metadata region is the normalised manifest as pretty-printed JSON,
//! gzip-compressed. The gzip framing carries no timestamp, so identical
//! manifests produce identical bytes.

use std::io::{Read, Write};

use crate::errors::{FlavorError, Result};
use crate::pspf::manifest::Manifest;

/// Serialise and compress a manifest for embedding
pub fn encode_metadata(manifest: &Manifest) -> Result<Vec<u8>> {
    let json = serde_json::to_vec_pretty(manifest)?;

    let mut compressed = Vec::new();
    {
        let mut encoder =
            flate2::write::GzEncoder::new(&mut compressed, flate2::Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?;
    }
    Ok(compressed)
}

/// Decompress and parse an embedded metadata block
pub fn decode_metadata(data: &[u8]) -> Result<Manifest> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut json = String::new();
    decoder
        .read_to_string(&mut json)
        .map_err(|e| FlavorError::Format(format!("metadata gzip stream is malformed: {e}")))?;

    let manifest: Manifest = serde_json::from_str(&json)
        .map_err(|e| FlavorError::Format(format!("metadata JSON is malformed: {e}")))?;
    manifest.validate()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::{decode_metadata, encode_metadata};
    use crate::pspf::manifest::Manifest;

    fn sample_manifest() -> Manifest {
        Manifest::from_str(
            r#"{
                "format_version": "2025.1",
                "package": { "name": "meta-demo", "version": "0.1.0" },
                "slots": [],
                "execution": { "command": "/bin/true" }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let manifest = sample_manifest();
        let encoded = encode_metadata(&manifest).unwrap();
        assert!(encoded.starts_with(&[0x1f, 0x8b]));
        let decoded = decode_metadata(&encoded).unwrap();
        assert_eq!(decoded.package.name, "meta-demo");
    }

    #[test]
    fn encoding_is_deterministic() {
        let manifest = sample_manifest();
        assert_eq!(
            encode_metadata(&manifest).unwrap(),
            encode_metadata(&manifest).unwrap()
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_metadata(b"not gzip at all").is_err());
    }
}
