//! Environment policy engine
//!
//! Applies the manifest's `runtime.env` policy to the parent environment in
//! fixed order: `unset -> pass -> set -> map`. `pass` copies matching names
//! back from a snapshot of the parent environment, so `unset: ["*"]`
//! followed by `pass` yields exactly the allowlist. The result is the
//! child's environment in full.

use glob::Pattern;
use log::{debug, warn};
use std::collections::HashMap;

use crate::pspf::manifest::EnvPolicy;

/// Apply an environment policy. `parent` is the launcher's own environment.
pub fn apply_env_policy(
    parent: &HashMap<String, String>,
    policy: &EnvPolicy,
) -> HashMap<String, String> {
    let mut env = parent.clone();

    // 1. unset: remove named or wildcarded variables; "*" clears everything
    if let Some(ref patterns) = policy.unset {
        for pattern in patterns {
            if pattern == "*" {
                debug!("🗑️ env policy: clearing all {} variables", env.len());
                env.clear();
            } else if is_glob(pattern) {
                match Pattern::new(pattern) {
                    Ok(glob) => env.retain(|key, _| !glob.matches(key)),
                    Err(e) => warn!("⚠️ env policy: invalid unset pattern {pattern:?}: {e}"),
                }
            } else {
                env.remove(pattern);
            }
        }
    }

    // 2. pass: copy matching names from the parent snapshot (glob supported)
    if let Some(ref patterns) = policy.pass {
        for pattern in patterns {
            if is_glob(pattern) {
                match Pattern::new(pattern) {
                    Ok(glob) => {
                        for (key, value) in parent {
                            if glob.matches(key) {
                                env.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    Err(e) => warn!("⚠️ env policy: invalid pass pattern {pattern:?}: {e}"),
                }
            } else if let Some(value) = parent.get(pattern) {
                env.insert(pattern.clone(), value.clone());
            }
        }
    }

    // 3. set: insert or overwrite literals
    if let Some(ref assignments) = policy.set {
        for (key, value) in assignments {
            env.insert(key.clone(), value.clone());
        }
    }

    // 4. map: rename key A to key B, preserving the value; absent A is a no-op
    if let Some(ref renames) = policy.map {
        for (old_key, new_key) in renames {
            if let Some(value) = env.remove(old_key) {
                debug!("🔄 env policy: mapped {old_key} -> {new_key}");
                env.insert(new_key.clone(), value);
            }
        }
    }

    env
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}
