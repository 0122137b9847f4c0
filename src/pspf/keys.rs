//! Key material acquisition and persistence
//!
//! Four acquisition modes, in precedence order: explicit byte pairs,
//! deterministic derivation from a seed string, key files on disk, and
//! ephemeral per-build keys. Key files are `flavor-private.key` and
//! `flavor-public.key`, PEM-wrapped Ed25519 or raw 32 bytes.

use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{FlavorError, Result};
use crate::pspf::crypto::{generate_ephemeral_keypair, keypair_from_seed};

/// File name of the private key inside a key directory
pub const PRIVATE_KEY_FILE: &str = "flavor-private.key";
/// File name of the public key inside a key directory
pub const PUBLIC_KEY_FILE: &str = "flavor-public.key";

/// Key acquisition configuration, resolved in field order
#[derive(Debug, Default)]
pub struct KeyConfig {
    /// Explicit 32-byte private seed and public key
    pub explicit: Option<([u8; 32], [u8; 32])>,
    /// Deterministic derivation seed
    pub seed: Option<String>,
    /// Directory holding `flavor-private.key` / `flavor-public.key`
    pub key_dir: Option<PathBuf>,
}

/// Resolve the signing key pair for a build
pub fn resolve_keys(config: &KeyConfig) -> Result<(SigningKey, VerifyingKey)> {
    if let Some((private_bytes, public_bytes)) = config.explicit {
        let signing_key = SigningKey::from_bytes(&private_bytes);
        let derived = signing_key.verifying_key();
        if derived.to_bytes() != public_bytes {
            return Err(FlavorError::Crypto(
                "explicit public key does not match the private key".to_string(),
            ));
        }
        debug!("🔑 using explicit key material");
        return Ok((signing_key, derived));
    }

    if let Some(ref seed) = config.seed {
        if seed.is_empty() {
            return Err(FlavorError::Crypto("key seed is empty".to_string()));
        }
        info!("🔑 using seed-derived signing key");
        return Ok(keypair_from_seed(seed));
    }

    if let Some(ref dir) = config.key_dir {
        info!("🔑 loading keys from {}", dir.display());
        return load_keys_from_dir(dir);
    }

    warn!("⚠️ no key material configured, generating ephemeral keys");
    Ok(generate_ephemeral_keypair())
}

/// Load a key pair from a directory
pub fn load_keys_from_dir(dir: &Path) -> Result<(SigningKey, VerifyingKey)> {
    let private_bytes = read_key_file(&dir.join(PRIVATE_KEY_FILE), KeyKind::Private)?;
    let public_bytes = read_key_file(&dir.join(PUBLIC_KEY_FILE), KeyKind::Public)?;

    let signing_key = SigningKey::from_bytes(&private_bytes);
    let verifying_key = VerifyingKey::from_bytes(&public_bytes)
        .map_err(|e| FlavorError::Crypto(format!("public key is not a valid Ed25519 point: {e}")))?;

    if signing_key.verifying_key() != verifying_key {
        return Err(FlavorError::Crypto(format!(
            "key pair in {} is mismatched: the public key does not belong to the private key",
            dir.display()
        )));
    }

    debug!("✅ loaded key pair from {}", dir.display());
    Ok((signing_key, verifying_key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Private,
    Public,
}

/// Read a key file that is either PEM-wrapped or raw 32 bytes
fn read_key_file(path: &Path, kind: KeyKind) -> Result<[u8; 32]> {
    let raw = fs::read(path)
        .map_err(|e| FlavorError::io_context(format!("key file {}", path.display()), e))?;

    // Raw 32-byte form
    if raw.len() == 32 {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        return Ok(bytes);
    }

    let text = String::from_utf8(raw).map_err(|_| {
        FlavorError::Crypto(format!(
            "key file {} is neither raw 32 bytes nor PEM text",
            path.display()
        ))
    })?;

    let parsed = pem::parse(&text)
        .map_err(|e| FlavorError::Crypto(format!("key file {}: {e}", path.display())))?;

    let contents = parsed.contents();
    let bytes: &[u8] = match (kind, parsed.tag()) {
        (KeyKind::Private, "PRIVATE KEY") => {
            // PKCS#8-wrapped Ed25519: the seed sits after a fixed prefix
            if contents.len() >= 48 && contents[0..2] == [0x30, 0x2e] {
                &contents[16..48]
            } else if contents.len() == 32 {
                contents
            } else {
                return Err(FlavorError::Crypto(format!(
                    "key file {} has an unrecognised PRIVATE KEY payload",
                    path.display()
                )));
            }
        }
        (KeyKind::Private, "ED25519 PRIVATE KEY") => contents,
        (KeyKind::Public, "PUBLIC KEY") => {
            if contents.len() >= 44 && contents[0..2] == [0x30, 0x2a] {
                &contents[12..44]
            } else if contents.len() == 32 {
                contents
            } else {
                return Err(FlavorError::Crypto(format!(
                    "key file {} has an unrecognised PUBLIC KEY payload",
                    path.display()
                )));
            }
        }
        (KeyKind::Public, "ED25519 PUBLIC KEY") => contents,
        (_, tag) => {
            // Wrong key type: name the algorithm we actually found
            return Err(FlavorError::Crypto(format!(
                "key file {} holds a {tag:?} key, expected Ed25519",
                path.display()
            )));
        }
    };

    let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        FlavorError::Crypto(format!(
            "key file {} has wrong key size (expected 32 bytes)",
            path.display()
        ))
    })?;
    Ok(bytes)
}

/// Persist a key pair to a directory: private key owner-only, public key
/// world-readable.
pub fn save_keys_to_dir(
    dir: &Path,
    signing_key: &SigningKey,
    verifying_key: &VerifyingKey,
) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| FlavorError::io_context(format!("key directory {}", dir.display()), e))?;

    let private_pem = pem::encode(&pem::Pem::new(
        "ED25519 PRIVATE KEY",
        signing_key.to_bytes().to_vec(),
    ));
    let public_pem = pem::encode(&pem::Pem::new(
        "ED25519 PUBLIC KEY",
        verifying_key.to_bytes().to_vec(),
    ));

    let private_path = dir.join(PRIVATE_KEY_FILE);
    let public_path = dir.join(PUBLIC_KEY_FILE);
    fs::write(&private_path, private_pem)?;
    fs::write(&public_path, public_pem)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600))?;
        fs::set_permissions(&public_path, fs::Permissions::from_mode(0o644))?;
    }

    info!("💾 saved key pair to {}", dir.display());
    Ok(())
}
