/// Three-tier key hierarchy and DEK derivation.
///
/// Coordinates the full key-management flow:
/// 1. System key: provisioned once inside the secret service, never exported.
/// 2. User keys: Ed25519 keypairs generated locally; the seed is wrapped by
///    the secret service under the user's context before persistence.
/// 3. Process keys: random 256-bit keys wrapped under the process context,
///    versioned in storage, expired but never deleted.
///
/// A data-encryption key combines the user and process tiers through a
/// one-way derivation, so expiring either tier makes every DEK derived from
/// it permanently unrecoverable (crypto-shredding). Plaintext private or
/// symmetric key material never leaves this component except in memory.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use tracing::{debug, info};

use crate::crypto::hash;
use crate::crypto::keys::{public_key_from_hex, UserKeypair};
use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{KmsError, Result};
use crate::secrets::{EncryptionContext, KeyAlgorithm, SecretsClient};
use crate::state::models::{ProcessKeyRecord, UserKeyRecord};
use crate::state::KeyRepository;

/// Default logical name of the system master key inside the secret service.
pub const DEFAULT_SYSTEM_KEY: &str = "review-vault-system";

pub struct KeyManager {
    secrets: Arc<dyn SecretsClient>,
    repo: Arc<dyn KeyRepository>,
    system_key: String,
}

impl KeyManager {
    /// Construct the manager and bootstrap the system key.
    ///
    /// Both steps are idempotent: the transit mount and the system key are
    /// created only if absent, and concurrent bootstraps are tolerated.
    pub async fn new(
        secrets: Arc<dyn SecretsClient>,
        repo: Arc<dyn KeyRepository>,
        system_key: impl Into<String>,
    ) -> Result<Self> {
        let system_key = system_key.into();

        secrets.ensure_transit_ready().await?;
        secrets
            .create_key(&system_key, KeyAlgorithm::Aes256Gcm96)
            .await?;
        info!(system_key = %system_key, client = %secrets.name(), "key manager initialized");

        Ok(Self {
            secrets,
            repo,
            system_key,
        })
    }

    /// The logical system key name, for diagnostics and audit records.
    pub fn get_active_system_key_id(&self) -> &str {
        &self.system_key
    }

    /// Create the user's identity keypair if none exists.
    ///
    /// Generates a fresh Ed25519 keypair, wraps the seed under the user's
    /// context, and persists the row. A second call for the same user is a
    /// no-op absorbed by the storage uniqueness constraint; both calls
    /// return the same public key. Returns the 32-byte public key.
    pub async fn create_user_key(&self, user_id: i64) -> Result<[u8; 32]> {
        let keypair = UserKeypair::generate();
        let context = EncryptionContext::for_user(user_id);

        let wrapped = self
            .secrets
            .encrypt(&self.system_key, keypair.seed().as_bytes(), &context)
            .await?;

        let record = UserKeyRecord::new(
            user_id,
            hex::encode(keypair.public_key_bytes()),
            wrapped,
        );

        if self.repo.insert_user_key(record).await? {
            info!(user_id, "user key created");
            return Ok(keypair.public_key_bytes());
        }

        // Lost the race or the key already existed: the surviving row wins.
        debug!(user_id, "user key already exists");
        let existing = self
            .repo
            .get_user_key(user_id)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("user key for user {user_id}")))?;
        Ok(public_key_from_hex(&existing.public_key)?.to_bytes())
    }

    /// Unwrap and reconstruct the user's signing key.
    ///
    /// The seed is decrypted under the user's context; a ciphertext moved to
    /// another user's row fails here rather than yielding a usable key.
    pub async fn get_user_signing_key(&self, user_id: i64) -> Result<UserKeypair> {
        let record = self
            .repo
            .get_user_key(user_id)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("user key for user {user_id}")))?;

        let context = EncryptionContext::for_user(user_id);
        let seed_bytes = self
            .secrets
            .decrypt(&self.system_key, &record.encrypted_private_key, &context)
            .await?;

        let seed = SensitiveBytes32::from_slice(seed_bytes.as_bytes()).ok_or_else(|| {
            KmsError::Decryption(format!(
                "unwrapped private key for user {user_id} has unexpected length {}",
                seed_bytes.len()
            ))
        })?;

        Ok(UserKeypair::from_seed(&seed))
    }

    /// Look up the user's public key. No unwrap, no crypto-service call.
    pub async fn get_user_public_key(&self, user_id: i64) -> Result<VerifyingKey> {
        let record = self
            .repo
            .get_user_key(user_id)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("user key for user {user_id}")))?;
        public_key_from_hex(&record.public_key)
    }

    /// Provision a symmetric key for the process if no active one exists.
    ///
    /// Generates 32 random bytes, records their fingerprint, wraps the raw
    /// key under the process context, and inserts the next version. A call
    /// while an active (non-expired) key exists is a no-op.
    pub async fn create_process_key(
        &self,
        process_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now();
        let latest = self.repo.latest_process_key(process_id).await?;

        if let Some(ref record) = latest {
            if !record.is_expired(now) {
                debug!(process_id, version = record.key_version, "active process key exists");
                return Ok(());
            }
        }

        let next_version = latest.map(|r| r.key_version + 1).unwrap_or(1);
        self.provision_process_key(process_id, next_version, expires_at)
            .await
    }

    /// Load and unwrap the process's active key.
    ///
    /// Fails with `NotFound` when no row exists and with `Expired` when the
    /// latest version's expiry has passed; expired key material is never
    /// returned.
    pub async fn get_process_key(&self, process_id: &str) -> Result<SensitiveBytes32> {
        let record = self.active_process_record(process_id).await?;

        let context = EncryptionContext::for_process(process_id);
        let raw = self
            .secrets
            .decrypt(&self.system_key, &record.encrypted_key_material, &context)
            .await?;

        SensitiveBytes32::from_slice(raw.as_bytes()).ok_or_else(|| {
            KmsError::Decryption(format!(
                "unwrapped process key for '{process_id}' has unexpected length {}",
                raw.len()
            ))
        })
    }

    /// The verification fingerprint of the latest process key.
    ///
    /// Read straight from the row: integrity checks stay available even
    /// when the crypto service is not.
    pub async fn get_process_key_hash(&self, process_id: &str) -> Result<String> {
        let record = self
            .repo
            .latest_process_key(process_id)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("process key for '{process_id}'")))?;
        Ok(record.key_hash)
    }

    /// Expire the process's active key versions and provision the next one.
    ///
    /// The replacement becomes the retrievable active key; DEKs derived from
    /// the old versions are unrecoverable from this point on.
    pub async fn rotate_process_key(&self, process_id: &str) -> Result<()> {
        let now = Utc::now();
        let expired = self.repo.expire_process_keys(process_id, now).await?;

        let next_version = self
            .repo
            .latest_process_key(process_id)
            .await?
            .map(|r| r.key_version + 1)
            .unwrap_or(1);

        self.provision_process_key(process_id, next_version, None)
            .await?;
        info!(process_id, expired, version = next_version, "process key rotated");
        Ok(())
    }

    /// Derive the 32-byte data-encryption key for `(process_id, user_id)`.
    ///
    /// Combines the process key and the user's key seed through a one-way
    /// derivation labeled with both identities. Deterministic while both
    /// inputs are live; fails if either tier's lookup fails. The result is
    /// never persisted.
    pub async fn derive_data_encryption_key(
        &self,
        process_id: &str,
        user_id: i64,
    ) -> Result<SensitiveBytes32> {
        let process_key = self.get_process_key(process_id).await?;
        let user_seed = self.get_user_signing_key(user_id).await?.seed();

        let label = format!("review-vault dek v1 process:{process_id} user:{user_id}");
        let dek = hash::derive_key32(process_key.as_bytes(), user_seed.as_bytes(), &label);

        Ok(SensitiveBytes32::new(dek))
    }

    /// Cheap authorization gate: do both key rows exist?
    ///
    /// Existence only; expiry and unwrap are checked by the full derivation.
    pub async fn verify_key_access(&self, user_id: i64, process_id: &str) -> Result<bool> {
        let user_exists = self.repo.get_user_key(user_id).await?.is_some();
        let process_exists = self.repo.latest_process_key(process_id).await?.is_some();
        Ok(user_exists && process_exists)
    }

    async fn active_process_record(&self, process_id: &str) -> Result<ProcessKeyRecord> {
        let record = self
            .repo
            .latest_process_key(process_id)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("process key for '{process_id}'")))?;

        if record.is_expired(Utc::now()) {
            return Err(KmsError::Expired(format!(
                "process key for '{process_id}' (version {}) expired at {}",
                record.key_version,
                record.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default()
            )));
        }

        Ok(record)
    }

    async fn provision_process_key(
        &self,
        process_id: &str,
        version: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let raw = crate::crypto::aead::generate_key();
        let key_hash = hex::encode(hash::hash(raw.as_bytes()));

        let context = EncryptionContext::for_process(process_id);
        let wrapped = self
            .secrets
            .encrypt(&self.system_key, raw.as_bytes(), &context)
            .await?;

        let record = ProcessKeyRecord::new(
            process_id.to_string(),
            version,
            wrapped,
            key_hash,
            expires_at,
        );

        if self.repo.insert_process_key(record).await? {
            info!(process_id, version, "process key provisioned");
        } else {
            // A concurrent caller provisioned this version first.
            debug!(process_id, version, "process key version already present");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aead;
    use crate::secrets::local::LocalSecretsClient;
    use crate::state::memory::InMemoryKeyRepository;

    async fn manager_with_parts() -> (KeyManager, Arc<LocalSecretsClient>, Arc<InMemoryKeyRepository>)
    {
        let secrets = Arc::new(LocalSecretsClient::new());
        let repo = Arc::new(InMemoryKeyRepository::new());
        let manager = KeyManager::new(secrets.clone(), repo.clone(), DEFAULT_SYSTEM_KEY)
            .await
            .unwrap();
        (manager, secrets, repo)
    }

    async fn manager() -> KeyManager {
        manager_with_parts().await.0
    }

    #[tokio::test]
    async fn test_create_user_key_idempotent() {
        let (manager, _, repo) = manager_with_parts().await;

        let pk1 = manager.create_user_key(1).await.unwrap();
        let pk2 = manager.create_user_key(1).await.unwrap();
        assert_eq!(pk1, pk2);

        let row = repo.get_user_key(1).await.unwrap().unwrap();
        assert_eq!(row.public_key, hex::encode(pk1));
        assert_eq!(row.key_version, 1);
    }

    #[tokio::test]
    async fn test_signing_key_roundtrip() {
        let manager = manager().await;

        let public = manager.create_user_key(7).await.unwrap();
        let keypair = manager.get_user_signing_key(7).await.unwrap();
        assert_eq!(keypair.public_key_bytes(), public);

        let looked_up = manager.get_user_public_key(7).await.unwrap();
        assert_eq!(looked_up.to_bytes(), public);
    }

    #[tokio::test]
    async fn test_missing_user_key_not_found() {
        let manager = manager().await;
        assert!(matches!(
            manager.get_user_signing_key(99).await,
            Err(KmsError::NotFound(_))
        ));
        assert!(matches!(
            manager.get_user_public_key(99).await,
            Err(KmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_process_key_create_and_get() {
        let manager = manager().await;

        manager.create_process_key("p-1", None).await.unwrap();
        let key = manager.get_process_key("p-1").await.unwrap();

        // Fingerprint in the row matches the unwrapped key.
        let hash = manager.get_process_key_hash("p-1").await.unwrap();
        assert_eq!(hash, hex::encode(crate::crypto::hash::hash(key.as_bytes())));
    }

    #[tokio::test]
    async fn test_process_key_create_noop_when_active() {
        let manager = manager().await;

        manager.create_process_key("p-1", None).await.unwrap();
        let first = manager.get_process_key("p-1").await.unwrap();

        manager.create_process_key("p-1", None).await.unwrap();
        let second = manager.get_process_key("p-1").await.unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[tokio::test]
    async fn test_expired_process_key_rejected() {
        let manager = manager().await;

        let past = Utc::now() - chrono::Duration::minutes(5);
        manager.create_process_key("p-old", Some(past)).await.unwrap();

        assert!(matches!(
            manager.get_process_key("p-old").await,
            Err(KmsError::Expired(_))
        ));

        // The fingerprint remains readable for integrity checks.
        assert!(manager.get_process_key_hash("p-old").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_process_key_not_found() {
        let manager = manager().await;
        assert!(matches!(
            manager.get_process_key("absent").await,
            Err(KmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_yields_new_retrievable_key() {
        let (manager, _, repo) = manager_with_parts().await;

        manager.create_process_key("p-1", None).await.unwrap();
        let before = manager.get_process_key("p-1").await.unwrap();

        manager.rotate_process_key("p-1").await.unwrap();
        let after = manager.get_process_key("p-1").await.unwrap();

        assert_ne!(before.as_bytes(), after.as_bytes());
        let latest = repo.latest_process_key("p-1").await.unwrap().unwrap();
        assert_eq!(latest.key_version, 2);
        assert!(latest.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_derivation_deterministic_until_rotation() {
        let manager = manager().await;

        manager.create_user_key(1).await.unwrap();
        manager.create_process_key("p-1", None).await.unwrap();

        let dek1 = manager.derive_data_encryption_key("p-1", 1).await.unwrap();
        let dek2 = manager.derive_data_encryption_key("p-1", 1).await.unwrap();
        assert_eq!(dek1.as_bytes(), dek2.as_bytes());

        manager.rotate_process_key("p-1").await.unwrap();
        let dek3 = manager.derive_data_encryption_key("p-1", 1).await.unwrap();
        assert_ne!(dek1.as_bytes(), dek3.as_bytes());
    }

    #[tokio::test]
    async fn test_derivation_scoped_to_both_identities() {
        let manager = manager().await;

        manager.create_user_key(1).await.unwrap();
        manager.create_user_key(2).await.unwrap();
        manager.create_process_key("p-1", None).await.unwrap();
        manager.create_process_key("p-2", None).await.unwrap();

        let base = manager.derive_data_encryption_key("p-1", 1).await.unwrap();
        let other_user = manager.derive_data_encryption_key("p-1", 2).await.unwrap();
        let other_process = manager.derive_data_encryption_key("p-2", 1).await.unwrap();

        assert_ne!(base.as_bytes(), other_user.as_bytes());
        assert_ne!(base.as_bytes(), other_process.as_bytes());
    }

    #[tokio::test]
    async fn test_derivation_fails_without_either_tier() {
        let manager = manager().await;

        manager.create_user_key(1).await.unwrap();
        assert!(matches!(
            manager.derive_data_encryption_key("absent", 1).await,
            Err(KmsError::NotFound(_))
        ));

        manager.create_process_key("p-1", None).await.unwrap();
        assert!(matches!(
            manager.derive_data_encryption_key("p-1", 42).await,
            Err(KmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sealed_service_blocks_derivation_not_hash() {
        let (manager, secrets, _) = manager_with_parts().await;

        manager.create_user_key(1).await.unwrap();
        manager.create_process_key("p-1", None).await.unwrap();

        secrets.seal();
        assert!(matches!(
            manager.derive_data_encryption_key("p-1", 1).await,
            Err(KmsError::ServiceUnavailable(_))
        ));
        // The fingerprint never touches the service.
        assert!(manager.get_process_key_hash("p-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_key_access() {
        let manager = manager().await;

        assert!(!manager.verify_key_access(1, "p-1").await.unwrap());
        manager.create_user_key(1).await.unwrap();
        assert!(!manager.verify_key_access(1, "p-1").await.unwrap());
        manager.create_process_key("p-1", None).await.unwrap();
        assert!(manager.verify_key_access(1, "p-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_system_key_id() {
        let manager = manager().await;
        assert_eq!(manager.get_active_system_key_id(), DEFAULT_SYSTEM_KEY);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let manager = manager().await;

        let public = manager.create_user_key(1).await.unwrap();
        assert_eq!(public.len(), 32);

        manager.create_process_key("p-1", None).await.unwrap();

        let dek = manager.derive_data_encryption_key("p-1", 1).await.unwrap();
        assert_eq!(dek.as_bytes().len(), 32);

        // The caller uses the DEK directly for local AEAD.
        let (nonce, ciphertext) = aead::encrypt(&dek, b"hello", b"").unwrap();
        let plaintext = aead::decrypt(&dek, &nonce, &ciphertext, b"").unwrap();
        assert_eq!(plaintext, b"hello");

        manager.rotate_process_key("p-1").await.unwrap();
        let rotated = manager.derive_data_encryption_key("p-1", 1).await.unwrap();
        assert_eq!(rotated.as_bytes().len(), 32);
        assert_ne!(rotated.as_bytes(), dek.as_bytes());
    }
}
