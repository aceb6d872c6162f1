/// Secret-service client abstraction.
///
/// The external transit-style encryption service is reached through the
/// `SecretsClient` capability trait. Any conforming implementation (real
/// service, in-process fallback, test double) can be substituted behind it.
///
/// All wrap/unwrap operations are context-bound: the serialized
/// `EncryptionContext` is passed as additional authenticated data, so a
/// ciphertext wrapped under one identity cannot be unwrapped under another
/// even if an attacker obtains the ciphertext.
pub mod local;
pub mod transit;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use base64::Engine as _;

use crate::crypto::sensitive::SensitiveVec;
use crate::error::Result;

/// Named key algorithms supported by the transit service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// 256-bit AES-GCM with a 96-bit nonce. The system key type.
    Aes256Gcm96,
    /// 256-bit ChaCha20-Poly1305.
    ChaCha20Poly1305,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm96 => "aes256-gcm96",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

/// An ordered set of string key/value pairs bound to a ciphertext as
/// additional authenticated data.
///
/// Serialization is deterministic: pairs are emitted sorted by key, so
/// insertion order never changes the authenticated bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionContext {
    pairs: BTreeMap<String, String>,
}

impl EncryptionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context binding a ciphertext to one user identity.
    pub fn for_user(user_id: i64) -> Self {
        Self::new().with("user_id", user_id.to_string())
    }

    /// Context binding a ciphertext to one process.
    pub fn for_process(process_id: &str) -> Self {
        Self::new().with("process_id", process_id)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Canonical form: `k1=v1;k2=v2;...` with keys sorted.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    /// Base64 of the canonical form, as sent on the wire.
    pub fn encode_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.serialize())
    }
}

/// A data key generated by the service for envelope encryption: the
/// plaintext form is used once then discarded, the wrapped form persisted.
pub struct DataKey {
    pub plaintext: SensitiveVec,
    pub ciphertext: String,
}

/// Capability interface over the external secret service.
#[async_trait]
pub trait SecretsClient: Send + Sync {
    /// Human-readable name of this implementation.
    fn name(&self) -> &str;

    /// Check that the transit mount exists, creating it if absent.
    /// Idempotent; concurrent provisioning from multiple processes is
    /// tolerated (duplicate-mount errors are absorbed).
    async fn ensure_transit_ready(&self) -> Result<()>;

    /// Provision a named key, non-exportable and non-derived.
    /// "Already exists" is success.
    async fn create_key(&self, name: &str, algorithm: KeyAlgorithm) -> Result<()>;

    /// Encrypt through the service. Returns an opaque ciphertext token.
    async fn encrypt(
        &self,
        key_name: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<String>;

    /// Decrypt a ciphertext token. Fails if the context does not match the
    /// one used to encrypt.
    async fn decrypt(
        &self,
        key_name: &str,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<SensitiveVec>;

    /// Generate a random data key of `bits` length, returned in both
    /// plaintext and service-wrapped form.
    async fn generate_data_key(&self, key_name: &str, bits: u32) -> Result<DataKey>;

    /// Store an opaque key/value secret at a caller-namespaced path.
    async fn store_secret(&self, path: &str, data: &HashMap<String, String>) -> Result<()>;

    /// Retrieve a secret previously stored at `path`.
    async fn get_secret(&self, path: &str) -> Result<HashMap<String, String>>;

    /// Fails if the service is unreachable, uninitialized, or sealed.
    /// A failure here means "crypto unavailable", not a generic error.
    async fn health(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_serialize_sorted() {
        let ctx = EncryptionContext::new()
            .with("zebra", "1")
            .with("alpha", "2");
        assert_eq!(ctx.serialize(), "alpha=2;zebra=1");
    }

    #[test]
    fn test_context_insertion_order_irrelevant() {
        let a = EncryptionContext::new().with("x", "1").with("y", "2");
        let b = EncryptionContext::new().with("y", "2").with("x", "1");
        assert_eq!(a.serialize(), b.serialize());
        assert_eq!(a.encode_base64(), b.encode_base64());
    }

    #[test]
    fn test_context_for_user_and_process() {
        assert_eq!(EncryptionContext::for_user(7).serialize(), "user_id=7");
        assert_eq!(
            EncryptionContext::for_process("p-1").serialize(),
            "process_id=p-1"
        );
    }

    #[test]
    fn test_empty_context() {
        let ctx = EncryptionContext::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.serialize(), "");
    }

    #[test]
    fn test_algorithm_wire_names() {
        assert_eq!(KeyAlgorithm::Aes256Gcm96.as_str(), "aes256-gcm96");
        assert_eq!(KeyAlgorithm::ChaCha20Poly1305.as_str(), "chacha20-poly1305");
    }
}
