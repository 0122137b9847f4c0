//! Launcher runtime tests: spawn-mode execution, placeholder substitution
//! and the environment scrub, driven through the public launch API.

#![cfg(unix)]

use std::fs;
use std::path::PathBuf;

use flavorpack::{BuildOptions, LaunchOptions, build_package, launch_package};

const LAUNCHER_STUB: &[u8] = b"#!/bin/sh\nexit 42\n";

fn build_with_manifest(manifest_json: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("greeting.txt"), b"hello\n").unwrap();
    let launcher_path = dir.path().join("launcher-stub");
    fs::write(&launcher_path, LAUNCHER_STUB).unwrap();

    let manifest_path = dir.path().join("manifest.json");
    fs::write(&manifest_path, manifest_json).unwrap();

    let package_path = dir.path().join("app.psp");
    let options = BuildOptions {
        launcher_bin: Some(launcher_path),
        key_seed: Some("launch-tests".to_string()),
        ..BuildOptions::default()
    };
    build_package(&manifest_path, &package_path, &options).unwrap();
    (dir, package_path)
}

fn spawn_mode() {
    // Keep the launcher in this process tree instead of replacing it
    unsafe { std::env::set_var("FLAVOR_EXEC_MODE", "spawn") };
}

#[test]
fn child_reads_extracted_slot_and_exits_zero() {
    spawn_mode();
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "cat-greeting", "version": "1.0.0" },
        "slots": [
            { "name": "greeting", "purpose": "data", "lifecycle": "cached",
              "operations": "tar.gz", "source": "greeting.txt",
              "extract_to": "{workenv}/greeting.txt" }
        ],
        "execution": {
            "command": "/bin/sh",
            "args": ["-c", "test \"$(cat {workenv}/greeting.txt)\" = hello"]
        }
    }"#;

    let (dir, package_path) = build_with_manifest(manifest);
    let cache = dir.path().join("cache");
    let options = LaunchOptions {
        workenv_root: Some(cache),
    };

    let code = launch_package(&package_path, &[], &options).unwrap();
    assert_eq!(code, 0);
}

#[test]
fn child_exit_code_propagates() {
    spawn_mode();
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "exit-seven", "version": "1.0.0" },
        "slots": [],
        "execution": { "command": "/bin/sh", "args": ["-c", "exit 7"] }
    }"#;

    let (dir, package_path) = build_with_manifest(manifest);
    let options = LaunchOptions {
        workenv_root: Some(dir.path().join("cache")),
    };

    let code = launch_package(&package_path, &[], &options).unwrap();
    assert_eq!(code, 7);
}

#[test]
fn launcher_arguments_are_forwarded_verbatim() {
    spawn_mode();
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "argv-check", "version": "1.0.0" },
        "slots": [],
        "execution": { "command": "/bin/sh", "args": ["-c", "test \"$1\" = forwarded", "argv0"] }
    }"#;

    let (dir, package_path) = build_with_manifest(manifest);
    let options = LaunchOptions {
        workenv_root: Some(dir.path().join("cache")),
    };

    let code =
        launch_package(&package_path, &["forwarded".to_string()], &options).unwrap();
    assert_eq!(code, 0);
}

#[test]
fn env_policy_scrubs_sets_and_maps() {
    spawn_mode();
    unsafe { std::env::set_var("LAUNCH_TEST_SECRET", "s") };

    // unset everything, allow PATH back, inject MODE, rename PATH to SYSPATH
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "env-scrub", "version": "1.0.0" },
        "slots": [],
        "execution": {
            "command": "/bin/sh",
            "args": ["-c",
                "test \"$MODE\" = test && test -n \"$SYSPATH\" && test -z \"$LAUNCH_TEST_SECRET\" && test -n \"$FLAVOR_WORKENV\""],
            "runtime": {
                "env": {
                    "unset": ["*"],
                    "pass": ["PATH"],
                    "set": { "MODE": "test" },
                    "map": { "PATH": "SYSPATH" }
                }
            }
        }
    }"#;

    let (dir, package_path) = build_with_manifest(manifest);
    let options = LaunchOptions {
        workenv_root: Some(dir.path().join("cache")),
    };

    let code = launch_package(&package_path, &[], &options).unwrap();
    assert_eq!(code, 0);
}

#[test]
fn missing_slot_placeholder_is_a_config_error() {
    spawn_mode();
    let manifest = r#"{
        "format_version": "2025.1",
        "package": { "name": "bad-placeholder", "version": "1.0.0" },
        "slots": [],
        "execution": { "command": "/bin/cat", "args": ["{slot:3}"] }
    }"#;

    let (dir, package_path) = build_with_manifest(manifest);
    let options = LaunchOptions {
        workenv_root: Some(dir.path().join("cache")),
    };

    let err = launch_package(&package_path, &[], &options).unwrap_err();
    assert_eq!(
        err.exit_code(),
        flavorpack::exit_codes::EXIT_CONFIG_ERROR
    );
}
