//! Advisory lock management for concurrent extraction
//!
//! Multiple launcher processes may race for the same workenv. The winner
//! creates `.extraction.lock` exclusively and does the work; losers wait
//! (bounded) and then re-check the completion marker. A lock whose recorded
//! PID is dead is stale and may be broken.

use log::{debug, info};
use std::fs;
use std::io::Write;
use std::thread;
use std::time::Duration;

use crate::errors::{FlavorError, Result};
use crate::pspf::workenv::WorkenvPaths;

/// Check if a process with the given PID is still running
#[cfg(target_os = "linux")]
fn is_process_running(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_process_running(_pid: u32) -> bool {
    // Without a portable liveness probe, treat locks as held; the bounded
    // wait still recovers from abandoned ones.
    true
}

/// Try to acquire the extraction lock. Returns true when this process now
/// holds it.
pub fn try_acquire_lock(paths: &WorkenvPaths) -> Result<bool> {
    let lock_path = paths.lock_file();
    let pid = std::process::id();

    // Break stale locks left by dead processes. A lock whose PID cannot be
    // read yet may be mid-write by the winner, so it counts as held.
    if lock_path.exists() {
        match fs::read_to_string(&lock_path) {
            Ok(contents) => match contents.trim().parse::<u32>() {
                Ok(old_pid) if is_process_running(old_pid) => {
                    debug!("🔒 extraction lock held by live process {old_pid}");
                    return Ok(false);
                }
                Ok(old_pid) => {
                    info!("🧹 removing stale extraction lock from dead process {old_pid}");
                    let _ = fs::remove_file(&lock_path);
                }
                Err(_) => {
                    debug!("🔒 extraction lock has no PID yet, treating as held");
                    return Ok(false);
                }
            },
            Err(_) => return Ok(false),
        }
    }

    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
    {
        Ok(mut file) => {
            writeln!(file, "{pid}")?;
            debug!("🔒 acquired extraction lock (pid {pid})");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(FlavorError::io_context("extraction lock", e)),
    }
}

/// Release the extraction lock
pub fn release_lock(paths: &WorkenvPaths) {
    if let Err(e) = fs::remove_file(paths.lock_file()) {
        debug!("⚠️ failed to remove extraction lock: {e}");
    }
}

/// Wait for another process to release the lock, checking every 100ms
pub fn wait_for_lock(paths: &WorkenvPaths, timeout_secs: u64) -> Result<()> {
    let lock_path = paths.lock_file();
    let max_attempts = timeout_secs * 10;

    for attempt in 0..max_attempts {
        if !lock_path.exists() {
            debug!("🔓 extraction lock released after ~{}ms", attempt * 100);
            return Ok(());
        }
        if attempt % 50 == 0 && attempt > 0 {
            debug!("⏳ still waiting for extraction lock ({}s)", attempt / 10);
        }
        thread::sleep(Duration::from_millis(100));
    }

    Err(FlavorError::Execution(format!(
        "timed out after {timeout_secs}s waiting for another process to finish extracting"
    )))
}

#[cfg(test)]
mod tests {
    use super::{release_lock, try_acquire_lock};
    use crate::pspf::workenv::WorkenvPaths;

    #[test]
    fn lock_is_exclusive_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkenvPaths::for_checksum(dir.path(), "0123456789abcdef");
        std::fs::create_dir_all(paths.root()).unwrap();

        assert!(try_acquire_lock(&paths).unwrap());
        // Same (live) PID holds it, so a second acquisition is refused
        assert!(!try_acquire_lock(&paths).unwrap());

        release_lock(&paths);
        assert!(try_acquire_lock(&paths).unwrap());
        release_lock(&paths);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkenvPaths::for_checksum(dir.path(), "0123456789abcdef");
        std::fs::create_dir_all(paths.root()).unwrap();

        // PIDs near u32::MAX exceed any real pid_max
        std::fs::write(paths.lock_file(), format!("{}\n", u32::MAX - 7)).unwrap();
        assert!(try_acquire_lock(&paths).unwrap());
        release_lock(&paths);
    }
}
