//! Hostile-input tests: every mutation of a valid package must be refused,
//! with the failure caught by the layer that owns the corrupted region.

use std::fs;
use std::path::PathBuf;

use flavorpack::pspf::constants::{SLOT_DESCRIPTOR_SIZE, TRAILER_SIZE};
use flavorpack::pspf::reader::Reader;
use flavorpack::pspf::verifier::ValidationLevel;
use flavorpack::{BuildOptions, build_package};

const LAUNCHER_STUB: &[u8] = b"\x7fELF-stand-in launcher bytes\n";

fn build_sample() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("payload.txt"), b"payload contents\n").unwrap();
    let launcher_path = dir.path().join("launcher-stub");
    fs::write(&launcher_path, LAUNCHER_STUB).unwrap();

    let manifest_path = dir.path().join("manifest.json");
    fs::write(
        &manifest_path,
        r#"{
            "format_version": "2025.1",
            "package": { "name": "hardened", "version": "1.0.0" },
            "slots": [
                { "name": "payload", "purpose": "payload", "lifecycle": "cached",
                  "operations": "gzip", "source": "payload.txt",
                  "extract_to": "{workenv}/payload.txt" }
            ],
            "execution": { "command": "/bin/true" }
        }"#,
    )
    .unwrap();

    let package_path = dir.path().join("hardened.psp");
    let options = BuildOptions {
        launcher_bin: Some(launcher_path),
        key_seed: Some("hardening".to_string()),
        ..BuildOptions::default()
    };
    build_package(&manifest_path, &package_path, &options).unwrap();
    (dir, package_path)
}

fn mutate(package_path: &PathBuf, mutator: impl FnOnce(&mut Vec<u8>)) {
    let mut bytes = fs::read(package_path).unwrap();
    mutator(&mut bytes);
    fs::write(package_path, bytes).unwrap();
}

fn index_offset(bytes_len: usize) -> usize {
    bytes_len - TRAILER_SIZE
}

#[test]
fn valid_package_opens() {
    let (_dir, package_path) = build_sample();
    assert!(Reader::open(&package_path).is_ok());
}

#[test]
fn corrupted_footer_is_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let len = bytes.len();
        bytes[len - 1] ^= 0xFF;
    });
    assert!(Reader::open(&package_path).is_err());
}

#[test]
fn corrupted_index_magic_is_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let offset = index_offset(bytes.len());
        bytes[offset] = b'Q';
    });
    assert!(Reader::open(&package_path).is_err());
}

#[test]
fn zeroed_signature_is_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let offset = index_offset(bytes.len());
        // Zero the signature, then refresh the CRC so only the seal check
        // can refuse the package
        bytes[offset + 96..offset + 160].fill(0);
        let mut view = bytes[offset..offset + 8192].to_vec();
        view[96..608].fill(0);
        let mut crc = flate2::Crc::new();
        crc.update(&view[14..]);
        bytes[offset + 10..offset + 14].copy_from_slice(&crc.sum().to_le_bytes());
    });
    let err = Reader::open(&package_path).unwrap_err();
    assert!(err.to_string().contains("integrity"), "{err}");
}

#[test]
fn nonzero_signature_padding_is_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let offset = index_offset(bytes.len());
        bytes[offset + 300] = 0x01;
    });
    assert!(Reader::open(&package_path).is_err());
}

#[test]
fn unknown_opcode_in_slot_table_is_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let index_off = index_offset(bytes.len());
        let table_off = bytes[index_off + 48..index_off + 56]
            .try_into()
            .map(u64::from_le_bytes)
            .unwrap() as usize;
        // operations field sits at descriptor offset 40
        bytes[table_off + 40] = 0x7F;
    });
    assert!(Reader::open(&package_path).is_err());
    // Validation off: the package still opens so it can be dissected
    assert!(Reader::open_with_level(&package_path, ValidationLevel::None).is_ok());
}

#[test]
fn nonzero_descriptor_reserved_bytes_are_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let index_off = index_offset(bytes.len());
        let table_off = bytes[index_off + 48..index_off + 56]
            .try_into()
            .map(u64::from_le_bytes)
            .unwrap() as usize;
        bytes[table_off + SLOT_DESCRIPTOR_SIZE - 1] = 0x01;
    });
    assert!(Reader::open(&package_path).is_err());
    assert!(Reader::open_with_level(&package_path, ValidationLevel::None).is_ok());
}

#[test]
fn corrupted_slot_table_opens_with_validation_off() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let index_off = index_offset(bytes.len());
        let table_off = bytes[index_off + 48..index_off + 56]
            .try_into()
            .map(u64::from_le_bytes)
            .unwrap() as usize;
        // Wreck id, flags, opcode and purpose in one go
        bytes[table_off] = 42;
        bytes[table_off + 4] = 1;
        bytes[table_off + 40] = 0x7F;
        bytes[table_off + 48] = 200;
    });

    let mut reader = Reader::open_with_level(&package_path, ValidationLevel::None).unwrap();
    // The descriptors come back as stored; the payload region is untouched
    assert_eq!(reader.descriptors()[0].id, 42);
    let descriptor = reader.descriptors()[0];
    let encoded = reader.read_region(descriptor.offset, descriptor.encoded_size as usize);
    assert!(encoded.is_ok());

    // The forensic dump still saves what it can
    let out = tempfile::tempdir().unwrap();
    flavorpack::pspf::debug::debug_dump(&mut reader, out.path()).unwrap();
    assert!(out.path().join("index.json").exists());
    assert!(out.path().join("slots.json").exists());
    assert!(out.path().join("slot-42.encoded").exists());
}

#[test]
fn corrupted_metadata_is_rejected_at_standard_level() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        // Metadata begins right after the launcher image
        bytes[LAUNCHER_STUB.len()] ^= 0xFF;
    });
    assert!(Reader::open(&package_path).is_err());
}

#[test]
fn oversized_slot_count_is_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let offset = index_offset(bytes.len());
        bytes[offset + 56..offset + 64].copy_from_slice(&u64::MAX.to_le_bytes());
    });
    assert!(Reader::open(&package_path).is_err());
}

#[test]
fn foreign_key_signature_is_rejected() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        let offset = index_offset(bytes.len());
        // Swap in a different (valid) public key; the signature no longer
        // matches, and the CRC is refreshed to keep it out of the way
        let foreign = ed25519_dalek::SigningKey::from_bytes(&[0x55; 32]);
        bytes[offset + 64..offset + 96].copy_from_slice(&foreign.verifying_key().to_bytes());
        let mut view = bytes[offset..offset + 8192].to_vec();
        view[96..608].fill(0);
        let mut crc = flate2::Crc::new();
        crc.update(&view[14..]);
        bytes[offset + 10..offset + 14].copy_from_slice(&crc.sum().to_le_bytes());
    });
    let err = Reader::open(&package_path).unwrap_err();
    assert!(err.to_string().contains("signature"), "{err}");
}

#[test]
fn appended_garbage_breaks_the_footer_contract() {
    let (_dir, package_path) = build_sample();
    mutate(&package_path, |bytes| {
        bytes.extend_from_slice(b"trailing garbage");
    });
    assert!(Reader::open(&package_path).is_err());
}
