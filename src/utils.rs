//! Utility functions for flavorpack

use std::env;
use std::path::PathBuf;

/// Check if an environment variable is set to a truthy value
/// Accepts: "1", "true", "on", "yes", "t" (case insensitive)
pub fn is_env_true(key: &str) -> bool {
    match env::var(key) {
        Ok(val) => {
            let val_lower = val.to_lowercase();
            matches!(val_lower.as_str(), "1" | "true" | "on" | "yes" | "t")
        }
        Err(_) => false,
    }
}

/// Get normalized platform string in format 'os_arch'
///
/// Returns strings like:
/// - "darwin_arm64" for macOS ARM64
/// - "linux_amd64" for Linux x86_64
/// - "windows_amd64" for Windows x86_64
pub fn get_platform_string() -> String {
    let os = match env::consts::OS {
        "macos" => "darwin",
        other => other,
    };

    let arch = match env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    format!("{os}_{arch}")
}

/// Resolve the workenv cache root.
///
/// Order: `FLAVOR_CACHE_DIR`, then the platform convention, then a
/// temp-directory fallback.
pub fn get_cache_root() -> PathBuf {
    if let Ok(cache_dir) = env::var(crate::pspf::constants::ENV_CACHE_DIR) {
        return PathBuf::from(cache_dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Caches/flavor");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join("flavor").join("cache");
        }
    }

    // XDG convention for Linux and remaining Unix-likes
    if let Ok(xdg_cache) = env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("flavor");
    }
    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".cache").join("flavor");
    }

    env::temp_dir().join("flavor").join("cache")
}

#[cfg(test)]
mod tests {
    use super::get_platform_string;

    #[test]
    fn platform_string_has_two_parts() {
        let platform = get_platform_string();
        assert_eq!(platform.split('_').count(), 2);
    }
}
