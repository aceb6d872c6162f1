/// BLAKE3 hashing and key derivation.
///
/// BLAKE3 is used throughout the subsystem for:
/// - Process-key verification fingerprints (integrity checks without unwrap)
/// - Data-encryption-key derivation (combining the user and process tiers)

/// Hash arbitrary data with BLAKE3. Deterministic fingerprint, not secrecy.
pub fn hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Keyed hash for domain-separated operations.
/// The key must be exactly 32 bytes.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    blake3::keyed_hash(key, data).into()
}

/// Derive `length` bytes from master keying material, a salt, and an info
/// string, using BLAKE3's key-derivation mode.
///
/// Deterministic and one-way: the output reveals nothing about the master
/// material, and cannot be reproduced without all three inputs. The info
/// string should be a unique, hardcoded label identifying the usage.
pub fn derive_key(master: &[u8], salt: &[u8], info: &str, length: usize) -> Vec<u8> {
    let mut deriver = blake3::Hasher::new_derive_key(info);
    deriver.update(salt);
    deriver.update(master);
    let mut output = vec![0u8; length];
    deriver.finalize_xof().fill(&mut output);
    output
}

/// Derive a fixed 32-byte key. Convenience over `derive_key`.
pub fn derive_key32(master: &[u8], salt: &[u8], info: &str) -> [u8; 32] {
    let mut output = [0u8; 32];
    let mut deriver = blake3::Hasher::new_derive_key(info);
    deriver.update(salt);
    deriver.update(master);
    deriver.finalize_xof().fill(&mut output);
    output
}
