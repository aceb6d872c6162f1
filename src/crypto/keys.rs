/// Per-user asymmetric identity keys.
///
/// Each user owns one Ed25519 keypair, used in this subsystem for key
/// derivation rather than general-purpose signing. The public half is stored
/// in cleartext (lookup-safe); the 32-byte seed is only ever persisted
/// wrapped by the secret service, and only reconstructed in memory for the
/// duration of the call that needed it.
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{KmsError, Result};

/// An Ed25519 user keypair held in memory.
pub struct UserKeypair {
    pub verifying_key: VerifyingKey,
    signing_key: SigningKey,
}

impl UserKeypair {
    /// Generate a fresh keypair from the system RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            verifying_key,
            signing_key,
        }
    }

    /// Reconstruct a keypair from a 32-byte seed (an unwrapped private key).
    pub fn from_seed(seed: &SensitiveBytes32) -> Self {
        let signing_key = SigningKey::from_bytes(seed.as_bytes());
        let verifying_key = signing_key.verifying_key();
        Self {
            verifying_key,
            signing_key,
        }
    }

    /// The 32-byte public key, safe to persist in cleartext.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.verifying_key.to_bytes()
    }

    /// The 32-byte seed. Only for wrapping via the secret service or feeding
    /// the DEK derivation; never persisted in plaintext.
    pub fn seed(&self) -> SensitiveBytes32 {
        let mut bytes: [u8; SECRET_KEY_LENGTH] = self.signing_key.to_bytes();
        let seed = SensitiveBytes32::new(bytes);
        bytes.zeroize();
        seed
    }
}

/// Parse a hex-encoded public key as stored in the user key table.
pub fn public_key_from_hex(hex_pk: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(hex_pk)
        .map_err(|e| KmsError::Serialization(format!("Invalid public key hex: {e}")))?;
    let array: [u8; PUBLIC_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KmsError::Serialization("Public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&array)
        .map_err(|e| KmsError::Serialization(format!("Invalid public key: {e}")))
}
