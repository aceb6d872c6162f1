/// In-process secret-service client.
///
/// Keeps named keys and secrets in memory and performs all crypto locally
/// via `crypto::aead`, with the serialized context as AAD. Used by tests and
/// by callers that explicitly opt out of the networked path; the key manager
/// never falls back to this automatically.
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine as _;
use rand::RngCore;

use super::{DataKey, EncryptionContext, KeyAlgorithm, SecretsClient};
use crate::crypto::aead;
use crate::crypto::sensitive::{SensitiveBytes32, SensitiveVec};
use crate::error::{KmsError, Result};

/// Ciphertext token prefix, mirroring the wire format of the real service.
const TOKEN_PREFIX: &str = "local:v1:";

#[derive(Default)]
struct Inner {
    keys: HashMap<String, SensitiveBytes32>,
    secrets: HashMap<String, HashMap<String, String>>,
    sealed: bool,
}

/// A `SecretsClient` that holds everything in process memory.
#[derive(Default)]
pub struct LocalSecretsClient {
    inner: RwLock<Inner>,
}

impl LocalSecretsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a sealed service. Every subsequent operation fails with
    /// `ServiceUnavailable` until `unseal` is called.
    pub fn seal(&self) {
        self.inner.write().unwrap().sealed = true;
    }

    pub fn unseal(&self) {
        self.inner.write().unwrap().sealed = false;
    }

    fn check_unsealed(&self) -> Result<()> {
        if self.inner.read().unwrap().sealed {
            return Err(KmsError::ServiceUnavailable(
                "local secrets client is sealed".to_string(),
            ));
        }
        Ok(())
    }

    fn key_for(&self, name: &str) -> Result<SensitiveBytes32> {
        self.inner
            .read()
            .unwrap()
            .keys
            .get(name)
            .cloned()
            .ok_or_else(|| KmsError::NotFound(format!("key '{name}'")))
    }
}

#[async_trait]
impl SecretsClient for LocalSecretsClient {
    fn name(&self) -> &str {
        "local"
    }

    async fn ensure_transit_ready(&self) -> Result<()> {
        self.check_unsealed()
    }

    async fn create_key(&self, name: &str, _algorithm: KeyAlgorithm) -> Result<()> {
        self.check_unsealed()?;
        let mut inner = self.inner.write().unwrap();
        // Re-creation of an existing key is a no-op, matching the service.
        inner
            .keys
            .entry(name.to_string())
            .or_insert_with(aead::generate_key);
        Ok(())
    }

    async fn encrypt(
        &self,
        key_name: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<String> {
        self.check_unsealed()?;
        let key = self.key_for(key_name)?;
        let aad = context.serialize();
        let (nonce, ciphertext) = aead::encrypt(&key, plaintext, aad.as_bytes())?;

        let mut blob = Vec::with_capacity(aead::NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{TOKEN_PREFIX}{}",
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    async fn decrypt(
        &self,
        key_name: &str,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<SensitiveVec> {
        self.check_unsealed()?;
        let key = self.key_for(key_name)?;

        let encoded = ciphertext
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| KmsError::Decryption("unrecognized ciphertext token".to_string()))?;
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KmsError::Decryption(format!("token decode error: {e}")))?;
        if blob.len() < aead::NONCE_LEN + aead::TAG_LEN {
            return Err(KmsError::Decryption("ciphertext token too short".to_string()));
        }

        let nonce: [u8; aead::NONCE_LEN] = blob[..aead::NONCE_LEN].try_into().unwrap();
        let aad = context.serialize();
        let plaintext = aead::decrypt(&key, &nonce, &blob[aead::NONCE_LEN..], aad.as_bytes())?;

        Ok(SensitiveVec::new(plaintext))
    }

    async fn generate_data_key(&self, key_name: &str, bits: u32) -> Result<DataKey> {
        self.check_unsealed()?;
        if bits % 8 != 0 || bits == 0 {
            return Err(KmsError::Encryption(format!(
                "data key bits must be a positive multiple of 8, got {bits}"
            )));
        }

        let mut plaintext = vec![0u8; (bits / 8) as usize];
        rand::rngs::OsRng.fill_bytes(&mut plaintext);

        let ciphertext = self
            .encrypt(key_name, &plaintext, &EncryptionContext::new())
            .await?;

        Ok(DataKey {
            plaintext: SensitiveVec::new(plaintext),
            ciphertext,
        })
    }

    async fn store_secret(&self, path: &str, data: &HashMap<String, String>) -> Result<()> {
        self.check_unsealed()?;
        self.inner
            .write()
            .unwrap()
            .secrets
            .insert(path.to_string(), data.clone());
        Ok(())
    }

    async fn get_secret(&self, path: &str) -> Result<HashMap<String, String>> {
        self.check_unsealed()?;
        self.inner
            .read()
            .unwrap()
            .secrets
            .get(path)
            .cloned()
            .ok_or_else(|| KmsError::NotFound(format!("secret at '{path}'")))
    }

    async fn health(&self) -> Result<()> {
        self.check_unsealed()
    }
}
