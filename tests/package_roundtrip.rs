//! End-to-end package tests: build, read back, extract, verify, tamper.

use std::fs;
use std::path::{Path, PathBuf};

use flavorpack::pspf::constants::{INDEX_MAGIC, MAGIC_FOOTER, TRAILER_SIZE};
use flavorpack::pspf::extraction::ensure_workenv;
use flavorpack::pspf::reader::Reader;
use flavorpack::pspf::verifier::ValidationLevel;
use flavorpack::pspf::workenv::{CompletionMarker, WorkenvPaths};
use flavorpack::api::is_pspf_package;
use flavorpack::{BuildOptions, build_package, verify_package};

const LAUNCHER_STUB: &[u8] = b"#!/bin/sh\nexit 42\n# inert launcher stand-in\n";

struct Fixture {
    dir: tempfile::TempDir,
    manifest_path: PathBuf,
    package_path: PathBuf,
}

fn write_fixture(manifest_json: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("greeting.txt"), b"hello\n").unwrap();
    fs::write(dir.path().join("empty.bin"), b"").unwrap();
    let launcher_path = dir.path().join("launcher-stub");
    fs::write(&launcher_path, LAUNCHER_STUB).unwrap();

    let manifest_path = dir.path().join("manifest.json");
    fs::write(&manifest_path, manifest_json).unwrap();

    Fixture {
        package_path: dir.path().join("out.psp"),
        manifest_path,
        dir,
    }
}

fn single_slot_manifest() -> &'static str {
    r#"{
        "format_version": "2025.1",
        "package": { "name": "greeter", "version": "1.0.0" },
        "slots": [
            { "name": "greeting", "purpose": "data", "lifecycle": "cached",
              "operations": "tar.gz", "source": "greeting.txt",
              "extract_to": "{workenv}/greeting.txt" }
        ],
        "execution": {
            "command": "/bin/cat",
            "args": ["{workenv}/greeting.txt"]
        }
    }"#
}

fn build_options(fixture: &Fixture, seed: &str) -> BuildOptions {
    BuildOptions {
        launcher_bin: Some(fixture.dir.path().join("launcher-stub")),
        key_seed: Some(seed.to_string()),
        ..BuildOptions::default()
    }
}

fn build_fixture(manifest_json: &str, seed: &str) -> Fixture {
    let fixture = write_fixture(manifest_json);
    let options = build_options(&fixture, seed);
    build_package(&fixture.manifest_path, &fixture.package_path, &options).unwrap();
    fixture
}

#[test]
fn built_package_satisfies_layout_invariants() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let bytes = fs::read(&fixture.package_path).unwrap();

    assert!(is_pspf_package(&fixture.package_path).unwrap());
    assert!(!is_pspf_package(&fixture.manifest_path).unwrap());

    // Launcher image is a bit-for-bit copy at offset 0
    assert_eq!(&bytes[..LAUNCHER_STUB.len()], LAUNCHER_STUB);

    // Final 8 bytes are the magic footer; index magic sits 8200 from the end
    assert_eq!(&bytes[bytes.len() - 8..], MAGIC_FOOTER);
    let index_offset = bytes.len() - TRAILER_SIZE;
    assert_eq!(&bytes[index_offset..index_offset + 8], INDEX_MAGIC);

    // Size equation: launcher + metadata + payloads + 64*N + 8200
    let mut reader = Reader::open(&fixture.package_path).unwrap();
    let index = reader.index().clone();
    let payload_total: u64 = reader
        .descriptors()
        .iter()
        .map(|d| d.encoded_size)
        .sum();
    assert_eq!(
        bytes.len() as u64,
        index.launcher_size
            + index.metadata_size
            + payload_total
            + 64 * index.slot_count
            + TRAILER_SIZE as u64
    );

    // Metadata survives the trip
    let manifest = reader.metadata().unwrap();
    assert_eq!(manifest.package.name, "greeter");
    assert_eq!(manifest.slots[0].slot, Some(0));
}

#[test]
fn extracted_slot_round_trips() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();

    let descriptor = *reader.descriptor(0).unwrap();
    assert_eq!(descriptor.operations, 0x1001);
    assert_eq!(descriptor.original_size, 6);

    let decoded = reader.extract_slot(0).unwrap();
    assert_eq!(decoded, b"hello\n");

    // Encoded form differs from the original (gzip framing at minimum)
    let encoded = reader.slot(0).unwrap();
    assert_ne!(encoded, b"hello\n");
    assert_eq!(encoded.len() as u64, descriptor.encoded_size);
}

#[test]
fn full_verification_passes() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let report = verify_package(&fixture.package_path).unwrap();
    assert_eq!(report.package_name, "greeter");
    assert_eq!(report.slot_count, 1);
    assert_eq!(report.format, "PSPF/2025");
}

#[test]
fn deterministic_builds_are_byte_identical() {
    let fixture = write_fixture(single_slot_manifest());
    let options = build_options(&fixture, "abc");

    let first_path = fixture.dir.path().join("first.psp");
    let second_path = fixture.dir.path().join("second.psp");
    build_package(&fixture.manifest_path, &first_path, &options).unwrap();
    build_package(&fixture.manifest_path, &second_path, &options).unwrap();

    assert_eq!(fs::read(&first_path).unwrap(), fs::read(&second_path).unwrap());
}

#[test]
fn different_seed_changes_the_seal_only() {
    let fixture = write_fixture(single_slot_manifest());

    let first_path = fixture.dir.path().join("first.psp");
    let second_path = fixture.dir.path().join("second.psp");
    build_package(&fixture.manifest_path, &first_path, &build_options(&fixture, "abc")).unwrap();
    build_package(&fixture.manifest_path, &second_path, &build_options(&fixture, "xyz")).unwrap();

    let first = fs::read(&first_path).unwrap();
    let second = fs::read(&second_path).unwrap();
    assert_ne!(first, second);
    // Everything before the index block is key-independent
    let boundary = first.len() - TRAILER_SIZE;
    assert_eq!(first[..boundary], second[..boundary]);
}

#[test]
fn tampered_payload_fails_verification() {
    let fixture = build_fixture(single_slot_manifest(), "abc");

    let offset = {
        let reader = Reader::open(&fixture.package_path).unwrap();
        reader.descriptor(0).unwrap().offset
    };

    let mut bytes = fs::read(&fixture.package_path).unwrap();
    bytes[offset as usize + 4] ^= 0xFF;
    fs::write(&fixture.package_path, &bytes).unwrap();

    // The index still verifies, so the package opens at standard level...
    let mut reader = Reader::open(&fixture.package_path).unwrap();
    // ...but the slot checksum catches the flip
    assert!(reader.slot(0).is_err());
    assert!(verify_package(&fixture.package_path).is_err());

    // And the workenv is never promoted to READY
    let cache = tempfile::tempdir().unwrap();
    let paths = WorkenvPaths::for_checksum(cache.path(), &reader.integrity_checksum());
    assert!(ensure_workenv(&mut reader, &paths).is_err());
    assert!(!paths.complete_file().exists());
    assert!(paths.incomplete_file().exists());
}

#[test]
fn tampered_index_fails_at_open() {
    let fixture = build_fixture(single_slot_manifest(), "abc");

    let mut bytes = fs::read(&fixture.package_path).unwrap();
    let index_offset = bytes.len() - TRAILER_SIZE;
    bytes[index_offset + 16] ^= 0x01; // package_size field
    fs::write(&fixture.package_path, &bytes).unwrap();

    assert!(Reader::open(&fixture.package_path).is_err());
    // Skipping validation still gets a reader (geometry is intact enough)
    assert!(Reader::open_with_level(&fixture.package_path, ValidationLevel::None).is_ok());
}

#[test]
fn slot_number_mismatch_fails_the_build() {
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "mismatch", "version": "1.0.0" },
        "slots": [
            { "slot": 0, "name": "first", "purpose": "data", "lifecycle": "cached",
              "source": "greeting.txt", "extract_to": "{workenv}/a" },
            { "slot": 0, "name": "second", "purpose": "data", "lifecycle": "cached",
              "source": "greeting.txt", "extract_to": "{workenv}/b" }
        ],
        "execution": { "command": "/bin/true" }
    }"#;

    let fixture = write_fixture(manifest);
    let options = build_options(&fixture, "abc");
    let err = build_package(&fixture.manifest_path, &fixture.package_path, &options).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("second"), "{message}");
    assert!(!fixture.package_path.exists(), "partial output left behind");
}

#[test]
fn empty_slot_is_valid() {
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "empty", "version": "1.0.0" },
        "slots": [
            { "name": "nothing", "purpose": "data", "lifecycle": "volatile",
              "source": "empty.bin", "extract_to": "{workenv}/nothing" }
        ],
        "execution": { "command": "/bin/true" }
    }"#;

    let fixture = build_fixture(manifest, "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();
    let descriptor = *reader.descriptor(0).unwrap();
    assert_eq!(descriptor.original_size, 0);
    assert_eq!(descriptor.encoded_size, 0);
    assert_eq!(reader.extract_slot(0).unwrap(), b"");
    verify_package(&fixture.package_path).unwrap();
}

#[test]
fn workenv_extraction_and_cache_hit() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();

    let cache = tempfile::tempdir().unwrap();
    let paths = WorkenvPaths::for_checksum(cache.path(), &reader.integrity_checksum());

    ensure_workenv(&mut reader, &paths).unwrap();

    let artifact = paths.root().join("greeting.txt");
    assert_eq!(fs::read(&artifact).unwrap(), b"hello\n");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&artifact).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let marker = CompletionMarker::read(&paths.complete_file()).unwrap();
    assert!(marker.matches("greeter", "1.0.0", &reader.integrity_checksum()));
    let first_timestamp = marker.timestamp.clone();
    let first_mtime = fs::metadata(&artifact).unwrap().modified().unwrap();

    // Second run is a cache hit: nothing rewritten, marker untouched
    ensure_workenv(&mut reader, &paths).unwrap();
    let marker_again = CompletionMarker::read(&paths.complete_file()).unwrap();
    assert_eq!(marker_again.timestamp, first_timestamp);
    assert_eq!(fs::metadata(&artifact).unwrap().modified().unwrap(), first_mtime);
}

#[test]
fn stale_marker_triggers_reextraction() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();

    let cache = tempfile::tempdir().unwrap();
    let paths = WorkenvPaths::for_checksum(cache.path(), &reader.integrity_checksum());
    fs::create_dir_all(paths.root()).unwrap();

    // A marker from some other package version must not count as READY
    CompletionMarker::new("greeter", "0.9.9", "0000000000000000")
        .write_atomic(&paths.complete_file())
        .unwrap();

    ensure_workenv(&mut reader, &paths).unwrap();
    let marker = CompletionMarker::read(&paths.complete_file()).unwrap();
    assert!(marker.matches("greeter", "1.0.0", &reader.integrity_checksum()));
    assert_eq!(
        fs::read(paths.root().join("greeting.txt")).unwrap(),
        b"hello\n"
    );
}

#[test]
fn missing_artifact_invalidates_cache_hit() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();

    let cache = tempfile::tempdir().unwrap();
    let paths = WorkenvPaths::for_checksum(cache.path(), &reader.integrity_checksum());
    ensure_workenv(&mut reader, &paths).unwrap();

    fs::remove_file(paths.root().join("greeting.txt")).unwrap();
    ensure_workenv(&mut reader, &paths).unwrap();
    assert_eq!(
        fs::read(paths.root().join("greeting.txt")).unwrap(),
        b"hello\n"
    );
}

#[test]
fn multi_slot_payloads_are_laid_down_in_id_order() {
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "multi", "version": "1.0.0" },
        "slots": [
            { "name": "a", "purpose": "data", "lifecycle": "cached",
              "operations": "gzip", "source": "greeting.txt",
              "extract_to": "{workenv}/a.txt" },
            { "name": "b", "purpose": "data", "lifecycle": "volatile",
              "source": "greeting.txt", "extract_to": "{workenv}/b.txt",
              "permissions": "0644" }
        ],
        "execution": { "command": "/bin/true" }
    }"#;

    let fixture = build_fixture(manifest, "abc");
    let reader = Reader::open(&fixture.package_path).unwrap();
    let descriptors = reader.descriptors();
    assert_eq!(descriptors.len(), 2);
    // Payloads are adjacent, never padded
    assert_eq!(
        descriptors[1].offset,
        descriptors[0].offset + descriptors[0].encoded_size
    );
    assert_eq!(descriptors[1].permissions, 0o644);
    // Raw slot: stored bytes equal the original
    assert_eq!(descriptors[1].encoded_size, descriptors[1].original_size);
}

#[test]
fn slot_cursor_walks_the_table_in_order() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();

    let mut cursor = reader.slot_cursor();
    let (descriptor, encoded) = cursor.next_slot().unwrap().unwrap();
    assert_eq!(descriptor.id, 0);
    assert_eq!(encoded.len() as u64, descriptor.encoded_size);
    assert!(cursor.next_slot().unwrap().is_none());
}

#[test]
fn debug_dump_writes_every_region() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();

    let out = tempfile::tempdir().unwrap();
    flavorpack::pspf::debug::debug_dump(&mut reader, out.path()).unwrap();

    assert_eq!(fs::read(out.path().join("launcher.bin")).unwrap(), LAUNCHER_STUB);
    assert_eq!(fs::read(out.path().join("slot-0.decoded")).unwrap(), b"hello\n");
    assert!(out.path().join("index.json").exists());
    assert!(out.path().join("metadata.json").exists());
    assert!(out.path().join("slots.json").exists());
    assert!(out.path().join("slot-0.encoded").exists());
}

#[test]
fn lifecycle_rules_govern_reextraction() {
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "lifecycles", "version": "1.0.0" },
        "slots": [
            { "name": "cached", "purpose": "data", "lifecycle": "cached",
              "source": "greeting.txt", "extract_to": "{workenv}/cached.txt" },
            { "name": "volatile", "purpose": "data", "lifecycle": "volatile",
              "source": "greeting.txt", "extract_to": "{workenv}/volatile.txt" },
            { "name": "persistent", "purpose": "data", "lifecycle": "persistent",
              "source": "greeting.txt", "extract_to": "{workenv}/persistent.txt" },
            { "name": "trigger", "purpose": "data", "lifecycle": "volatile",
              "source": "greeting.txt", "extract_to": "{workenv}/trigger.txt" }
        ],
        "execution": { "command": "/bin/true" }
    }"#;

    let fixture = build_fixture(manifest, "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();
    let cache = tempfile::tempdir().unwrap();
    let paths = WorkenvPaths::for_checksum(cache.path(), &reader.integrity_checksum());

    ensure_workenv(&mut reader, &paths).unwrap();

    // Tamper with all three artifacts, then force re-extraction by removing
    // a fourth; the completion marker stays in place
    for name in ["cached.txt", "volatile.txt", "persistent.txt"] {
        fs::write(paths.root().join(name), b"tampered").unwrap();
    }
    fs::remove_file(paths.root().join("trigger.txt")).unwrap();

    ensure_workenv(&mut reader, &paths).unwrap();

    // cached: recorded checksum still matches, so the file is left alone
    assert_eq!(fs::read(paths.root().join("cached.txt")).unwrap(), b"tampered");
    // volatile: always rewritten
    assert_eq!(fs::read(paths.root().join("volatile.txt")).unwrap(), b"hello\n");
    // persistent: retained as-is
    assert_eq!(
        fs::read(paths.root().join("persistent.txt")).unwrap(),
        b"tampered"
    );
    assert_eq!(fs::read(paths.root().join("trigger.txt")).unwrap(), b"hello\n");
}

#[test]
fn concurrent_launchers_extract_exactly_once() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let cache = tempfile::tempdir().unwrap();

    let package_path = fixture.package_path.clone();
    let cache_root = cache.path().to_path_buf();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let package_path = package_path.clone();
        let cache_root = cache_root.clone();
        handles.push(std::thread::spawn(move || {
            let mut reader = Reader::open(&package_path).unwrap();
            let paths = WorkenvPaths::for_checksum(&cache_root, &reader.integrity_checksum());
            ensure_workenv(&mut reader, &paths).unwrap();
            paths
        }));
    }

    let mut roots = Vec::new();
    for handle in handles {
        roots.push(handle.join().unwrap());
    }

    // All racers converge on the same READY workenv
    let paths = &roots[0];
    assert!(paths.complete_file().exists());
    assert!(!paths.lock_file().exists());
    assert_eq!(
        fs::read(paths.root().join("greeting.txt")).unwrap(),
        b"hello\n"
    );
}

#[test]
fn extract_slot_to_streams_the_same_bytes() {
    let fixture = build_fixture(single_slot_manifest(), "abc");
    let mut reader = Reader::open(&fixture.package_path).unwrap();

    let mut streamed = Vec::new();
    let produced = reader.extract_slot_to(0, &mut streamed).unwrap();
    assert_eq!(produced, 6);
    assert_eq!(streamed, b"hello\n");
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path: &Path = &dir.path().join("short.psp");
    fs::write(path, b"way too short").unwrap();
    assert!(Reader::open(path).is_err());
}
