//! Cryptographic primitives for PSPF/2025

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Generate an ephemeral Ed25519 key pair from the OS RNG
pub fn generate_ephemeral_keypair() -> (SigningKey, VerifyingKey) {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Derive a deterministic Ed25519 key pair from a seed string.
///
/// The seed string is hash-expanded with SHA-256 to the 32-byte Ed25519
/// private seed, so the same seed always yields the same key pair.
pub fn keypair_from_seed(seed: &str) -> (SigningKey, VerifyingKey) {
    let digest = Sha256::digest(seed.as_bytes());
    let seed_bytes: [u8; 32] = digest.into();
    let signing_key = SigningKey::from_bytes(&seed_bytes);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Sign a byte sequence
pub fn sign_data(data: &[u8], signing_key: &SigningKey) -> [u8; 64] {
    signing_key.sign(data).to_bytes()
}

/// Verify a detached signature
pub fn verify_signature(data: &[u8], signature: &[u8; 64], verifying_key: &VerifyingKey) -> bool {
    let signature = Signature::from_bytes(signature);
    verifying_key.verify(data, &signature).is_ok()
}
