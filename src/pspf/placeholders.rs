//! Placeholder substitution
//!
//! `{workenv}` expands to the absolute workenv root; `{slot:N}` expands to
//! the absolute path of slot N's extracted artifact. A reference to a slot
//! that is out of range or has no artifact fails resolution.

use std::path::Path;

use crate::errors::{FlavorError, Result};
use crate::pspf::extraction::target_in_workenv;
use crate::pspf::manifest::Manifest;

/// Substitute `{workenv}` and `{slot:N}` in one string
pub fn substitute(text: &str, workenv_root: &Path, manifest: &Manifest) -> Result<String> {
    let workenv_str = workenv_root.to_string_lossy();
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        result.push_str(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find('}') else {
            // Unterminated brace: keep the remainder verbatim
            result.push_str(after);
            return Ok(result);
        };
        let token = &after[1..end];

        if token == "workenv" {
            result.push_str(&workenv_str);
        } else if let Some(number) = token.strip_prefix("slot:") {
            let slot: usize = number.parse().map_err(|_| {
                FlavorError::Config(format!("malformed placeholder {{{token}}}"))
            })?;
            let path = slot_artifact_path(slot, workenv_root, manifest)?;
            result.push_str(&path.to_string_lossy());
        } else {
            // Unknown tokens pass through untouched
            result.push('{');
            result.push_str(token);
            result.push('}');
        }

        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve the artifact path for `{slot:N}`
fn slot_artifact_path(
    slot: usize,
    workenv_root: &Path,
    manifest: &Manifest,
) -> Result<std::path::PathBuf> {
    let entry = manifest.slots.get(slot).ok_or_else(|| {
        FlavorError::Config(format!(
            "placeholder {{slot:{slot}}} references a missing slot ({} slots)",
            manifest.slots.len()
        ))
    })?;
    let extract_to = entry.extract_to.as_ref().ok_or_else(|| {
        FlavorError::Config(format!(
            "placeholder {{slot:{slot}}} references slot '{}' which has no extract_to",
            entry.name
        ))
    })?;
    target_in_workenv(workenv_root, extract_to)
}
