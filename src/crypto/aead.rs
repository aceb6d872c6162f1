/// ChaCha20-Poly1305 AEAD for local (non-networked) encryption.
///
/// Used for payloads encrypted under a derived data-encryption key, and by
/// the in-process secrets client for key wrapping. Every call generates a
/// fresh random 96-bit nonce; nonces are never reused or counter-based.
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{KmsError, Result};

pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// Generate a random 256-bit symmetric key.
pub fn generate_key() -> SensitiveBytes32 {
    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    SensitiveBytes32::new(key)
}

/// Generate a random 96-bit nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt plaintext with ChaCha20-Poly1305.
///
/// Returns (nonce, ciphertext_with_tag).
/// The AAD (additional authenticated data) is authenticated but not
/// encrypted; decryption with different AAD fails.
pub fn encrypt(
    key: &SensitiveBytes32,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| KmsError::Encryption(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| KmsError::Encryption(e.to_string()))?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt ciphertext with ChaCha20-Poly1305.
///
/// Fails on a wrong key, tampered ciphertext, or mismatched AAD. The caller
/// never receives partial plaintext.
pub fn decrypt(
    key: &SensitiveBytes32,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| KmsError::Decryption(e.to_string()))?;

    let nonce = Nonce::from_slice(nonce);

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|e| KmsError::Decryption(e.to_string()))?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let plaintext = b"reviewer justification: exceeds expectations";
        let aad = b"process:p-1;user:1";

        let (nonce, ciphertext) = encrypt(&key, plaintext, aad).unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext, aad).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_key();
        let key2 = generate_key();

        let (nonce, ciphertext) = encrypt(&key1, b"secret", b"").unwrap();
        assert!(decrypt(&key2, &nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = generate_key();

        let (nonce, ciphertext) = encrypt(&key, b"secret", b"user:1").unwrap();
        assert!(decrypt(&key, &nonce, &ciphertext, b"user:2").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_key();

        let (nonce, mut ciphertext) = encrypt(&key, b"secret", b"").unwrap();
        for i in 0..ciphertext.len() {
            ciphertext[i] ^= 0x01;
            assert!(decrypt(&key, &nonce, &ciphertext, b"").is_err());
            ciphertext[i] ^= 0x01;
        }
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = generate_key();

        let (nonce, mut ciphertext) = encrypt(&key, b"secret", b"").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x80;
        assert!(decrypt(&key, &nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_key();
        let (nonce, ciphertext) = encrypt(&key, b"", b"").unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext, b"").unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_nonce_unique_per_call() {
        let key = generate_key();
        let (n1, _) = encrypt(&key, b"x", b"").unwrap();
        let (n2, _) = encrypt(&key, b"x", b"").unwrap();
        assert_ne!(n1, n2);
    }
}
