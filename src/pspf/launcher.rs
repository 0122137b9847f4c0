//! PSPF/2025 launcher runtime
//!
//! Self-locates the package, verifies it at the configured validation
//! level, brings the workenv to READY, scrubs the environment, substitutes
//! placeholders and hands control to the child process.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::Ordering;

use crate::api::LaunchOptions;
use crate::errors::{FlavorError, Result};
use crate::pspf::constants::{ENV_EXEC_MODE, ENV_WORKENV};
use crate::pspf::extraction::ensure_workenv;
use crate::pspf::manifest::Manifest;
use crate::pspf::placeholders::substitute;
use crate::pspf::reader::Reader;
use crate::pspf::runtime_env::apply_env_policy;
use crate::pspf::verifier::{ValidationLevel, get_validation_level};
use crate::pspf::workenv::WorkenvPaths;

/// Launch a PSPF/2025 package
///
/// On Unix the child replaces the launcher process and this function only
/// returns on error; elsewhere (or with `FLAVOR_EXEC_MODE=spawn`) it returns
/// the child's exit code.
pub fn launch(package_path: &Path, args: &[String], options: &LaunchOptions) -> Result<i32> {
    info!("🦀 flavorpack launcher starting");

    // Step 1+2: self-locate and verify at the configured level
    let level = get_validation_level();
    if level == ValidationLevel::None {
        warn!("⚠️ FLAVOR_VALIDATION=none: skipping all integrity verification");
    }
    let mut reader = Reader::open_with_level(package_path, level)?;

    let manifest = reader.metadata()?.clone();
    info!(
        "📦 package {} v{}",
        manifest.package.name, manifest.package.version
    );

    // Step 3: resolve the workenv and bring it to READY
    let paths = match options.workenv_root {
        Some(ref root) => WorkenvPaths::for_checksum(root, &reader.integrity_checksum()),
        None => WorkenvPaths::from_checksum(&reader.integrity_checksum()),
    };
    ensure_workenv(&mut reader, &paths)?;
    let workenv_root = paths.root().to_path_buf();
    debug!("📁 workenv ready at {}", workenv_root.display());

    // Step 4: scrub the environment
    let env_map = child_environment(&manifest, &workenv_root);

    // Step 5: substitute placeholders in command and args
    let command = substitute(&manifest.execution.command, &workenv_root, &manifest)?;
    let mut child_args = Vec::with_capacity(manifest.execution.args.len() + args.len());
    for arg in &manifest.execution.args {
        child_args.push(substitute(arg, &workenv_root, &manifest)?);
    }
    // Launcher arguments are forwarded to the child verbatim
    child_args.extend_from_slice(args);

    let executable = resolve_executable(&command);
    debug!("🚀 exec {executable} {child_args:?}");

    // Step 6+7: exec the child; its exit code becomes ours
    run_child(&executable, &child_args, &env_map)
}

/// Build the child's environment: policy first, then the exported
/// `FLAVOR_WORKENV`.
fn child_environment(manifest: &Manifest, workenv_root: &Path) -> HashMap<String, String> {
    let parent: HashMap<String, String> = env::vars().collect();

    let mut env_map = match manifest
        .execution
        .runtime
        .as_ref()
        .and_then(|runtime| runtime.env.as_ref())
    {
        Some(policy) => apply_env_policy(&parent, policy),
        None => parent,
    };

    env_map.insert(
        ENV_WORKENV.to_string(),
        workenv_root.to_string_lossy().to_string(),
    );
    env_map
}

/// Resolve the program to execute. Paths are used as-is; bare names are
/// looked up on PATH and fall back to the name itself.
fn resolve_executable(command: &str) -> String {
    if command.contains('/') {
        return command.to_string();
    }
    match which::which(command) {
        Ok(path) => path.to_string_lossy().to_string(),
        Err(_) => {
            debug!("⚠️ could not resolve '{command}' on PATH, passing through");
            command.to_string()
        }
    }
}

#[cfg(unix)]
fn run_child(executable: &str, args: &[String], env_map: &HashMap<String, String>) -> Result<i32> {
    use std::os::unix::process::CommandExt;

    let spawn_mode = env::var(ENV_EXEC_MODE)
        .map(|v| v.eq_ignore_ascii_case("spawn"))
        .unwrap_or(false);

    let mut cmd = Command::new(executable);
    cmd.args(args);
    cmd.env_clear();
    cmd.envs(env_map);

    if !spawn_mode {
        // Process replacement: signals, exit code and cancellation all belong
        // to the child from here on
        let error = cmd.exec();
        return Err(FlavorError::Execution(format!(
            "exec of '{executable}' failed: {error}"
        )));
    }

    spawn_and_wait(cmd, executable)
}

#[cfg(not(unix))]
fn run_child(executable: &str, args: &[String], env_map: &HashMap<String, String>) -> Result<i32> {
    let mut cmd = Command::new(executable);
    cmd.args(args);
    cmd.env_clear();
    cmd.envs(env_map);
    spawn_and_wait(cmd, executable)
}

/// Spawn mode: wait for the child and propagate its exit code. The child's
/// PID is published for the binary's signal forwarder.
fn spawn_and_wait(mut cmd: Command, executable: &str) -> Result<i32> {
    let mut child = cmd.spawn().map_err(|e| {
        FlavorError::Execution(format!("failed to spawn '{executable}': {e}"))
    })?;
    crate::CHILD_PID.store(child.id(), Ordering::SeqCst);

    let status = child.wait()?;
    crate::CHILD_PID.store(0, Ordering::SeqCst);

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Ok(128 + signal);
        }
    }

    Ok(status.code().unwrap_or(1))
}
