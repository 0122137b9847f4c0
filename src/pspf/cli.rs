//! Launcher CLI sub-commands
//!
//! Only reachable when `FLAVOR_LAUNCHER_CLI=1`: the launcher then interprets
//! its arguments itself instead of forwarding them to the packaged child.

use std::path::Path;

use crate::api::LaunchOptions;
use crate::errors::Result;
use crate::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use crate::pspf::launcher;
use crate::pspf::operations::operations_to_string;
use crate::pspf::reader::Reader;
use crate::pspf::verifier;
use crate::pspf::verifier::get_validation_level;

/// `inspect`: print package structure and slot table
pub fn inspect(package_path: &Path) -> i32 {
    match inspect_inner(package_path) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("❌ inspect failed: {e}");
            e.exit_code()
        }
    }
}

fn inspect_inner(package_path: &Path) -> Result<()> {
    let mut reader = Reader::open_with_level(package_path, get_validation_level())?;
    let checksum = reader.integrity_checksum();
    let index = reader.index().clone();
    let descriptors = reader.descriptors().to_vec();
    let manifest = reader.metadata()?;

    println!("PSPF/2025 package: {}", package_path.display());
    println!("  platform:  {}", crate::utils::get_platform_string());
    println!("  package:   {} v{}", manifest.package.name, manifest.package.version);
    if let Some(ref description) = manifest.package.description {
        println!("  about:     {description}");
    }
    println!("  size:      {} bytes", index.package_size);
    println!("  launcher:  {} bytes", index.launcher_size);
    println!("  metadata:  {} bytes at {:#x}", index.metadata_size, index.metadata_offset);
    println!("  checksum:  {checksum}");
    println!(
        "  workenv:   {}",
        crate::pspf::workenv::WorkenvPaths::from_checksum(&checksum)
            .root()
            .display()
    );
    println!("  command:   {}", manifest.execution.command);
    println!("  slots:     {}", descriptors.len());

    for descriptor in &descriptors {
        let entry = manifest.slots.get(descriptor.id as usize);
        println!(
            "    [{}] {} {} -> {} ({} -> {} bytes, {}, {}, mode {:03o})",
            descriptor.id,
            entry.map_or("?", |s| s.name.as_str()),
            operations_to_string(descriptor.operations),
            entry
                .and_then(|s| s.extract_to.as_deref())
                .unwrap_or("(not extracted)"),
            descriptor.original_size,
            descriptor.encoded_size,
            descriptor.purpose.as_str(),
            descriptor.lifecycle.as_str(),
            descriptor.permissions,
        );
    }
    Ok(())
}

/// `verify`: run the full verification including every slot checksum
pub fn verify(package_path: &Path) -> i32 {
    match verifier::verify(package_path) {
        Ok(report) => {
            println!(
                "✅ OK: {} v{} ({} slots, {})",
                report.package_name, report.package_version, report.slot_count, report.format
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("❌ verification failed: {e}");
            e.exit_code()
        }
    }
}

/// `metadata`: print the embedded manifest as JSON
pub fn metadata(package_path: &Path) -> i32 {
    match metadata_inner(package_path) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("❌ metadata failed: {e}");
            e.exit_code()
        }
    }
}

fn metadata_inner(package_path: &Path) -> Result<()> {
    let mut reader = Reader::open_with_level(package_path, get_validation_level())?;
    let manifest = reader.metadata()?;
    println!("{}", serde_json::to_string_pretty(manifest)?);
    Ok(())
}

/// `dump <dir>`: write every package region into a directory for analysis
pub fn dump(package_path: &Path, dest_dir: &str) -> i32 {
    match dump_inner(package_path, Path::new(dest_dir)) {
        Ok(()) => {
            println!("💾 dumped package internals to {dest_dir}");
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("❌ dump failed: {e}");
            e.exit_code()
        }
    }
}

fn dump_inner(package_path: &Path, dest_dir: &Path) -> Result<()> {
    // Dissection honours FLAVOR_VALIDATION so a broken package can still be
    // opened with validation lowered
    let mut reader = Reader::open_with_level(package_path, get_validation_level())?;
    crate::pspf::debug::debug_dump(&mut reader, dest_dir)
}

/// `extract <slot> <dir>`: decode one slot into a directory
pub fn extract(package_path: &Path, slot_arg: &str, dest_dir: &str) -> i32 {
    let Ok(slot) = slot_arg.parse::<usize>() else {
        eprintln!("❌ invalid slot index: {slot_arg}");
        return EXIT_ERROR;
    };

    match extract_inner(package_path, slot, Path::new(dest_dir)) {
        Ok(path) => {
            println!("📤 extracted slot {slot} to {path}");
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("❌ extract failed: {e}");
            e.exit_code()
        }
    }
}

fn extract_inner(package_path: &Path, slot: usize, dest_dir: &Path) -> Result<String> {
    let mut reader = Reader::open(package_path)?;
    let name = reader
        .metadata()?
        .slots
        .get(slot)
        .map_or_else(|| format!("slot-{slot}"), |s| s.name.clone());

    std::fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(name);
    let mut out = std::fs::File::create(&target)?;
    reader.extract_slot_to(slot, &mut out)?;
    Ok(target.display().to_string())
}

/// `shell`: spawn an interactive shell inside the package's workenv
pub fn shell(package_path: &Path) -> i32 {
    match shell_inner(package_path) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ shell failed: {e}");
            e.exit_code()
        }
    }
}

fn shell_inner(package_path: &Path) -> Result<i32> {
    use crate::pspf::extraction::ensure_workenv;
    use crate::pspf::workenv::WorkenvPaths;

    let mut reader = Reader::open(package_path)?;
    let paths = WorkenvPaths::from_checksum(&reader.integrity_checksum());
    ensure_workenv(&mut reader, &paths)?;

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    println!("📁 workenv: {}", paths.root().display());

    let status = std::process::Command::new(shell)
        .current_dir(paths.root())
        .env(crate::pspf::constants::ENV_WORKENV, paths.root())
        .status()?;
    Ok(status.code().unwrap_or(EXIT_ERROR))
}

/// `run [args...]`: execute the package as if launched directly
pub fn run(package_path: &Path, args: &[String]) -> i32 {
    match launcher::launch(package_path, args, &LaunchOptions::default()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ launch failed: {e}");
            e.exit_code()
        }
    }
}

/// `help`: usage for CLI mode
pub fn help() -> i32 {
    println!("📦 PSPF package launcher - CLI mode");
    println!();
    println!("Available commands:");
    println!("  inspect            Show package structure and slots (default)");
    println!("  verify             Verify package integrity");
    println!("  metadata           Print the embedded manifest as JSON");
    println!("  extract SLOT DIR   Decode one slot into a directory");
    println!("  dump DIR           Write all package regions into a directory");
    println!("  shell              Open a shell inside the workenv");
    println!("  run [args...]      Execute the package with arguments");
    println!("  help               Show this help message");
    println!();
    println!("Usage:");
    println!("  FLAVOR_LAUNCHER_CLI=1 ./package.psp <command>");
    EXIT_SUCCESS
}
