/// Database models for the key hierarchy.
///
/// These structs map directly to the key tables and are used for both
/// reading and writing via sqlx. Key material columns only ever hold
/// wrapped (service-encrypted) blobs or lookup-safe public values.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user's asymmetric identity key. Exactly one live row per user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserKeyRecord {
    pub id: Uuid,
    pub user_id: i64,
    /// Ed25519 public key, hex-encoded. Lookup-safe cleartext.
    pub public_key: String,
    /// Private key seed wrapped by the secret service (opaque token).
    pub encrypted_private_key: String,
    pub key_version: i32,
    pub created_at: DateTime<Utc>,
}

impl UserKeyRecord {
    pub fn new(user_id: i64, public_key: String, encrypted_private_key: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            public_key,
            encrypted_private_key,
            key_version: 1,
            created_at: Utc::now(),
        }
    }
}

/// One version of a process's symmetric key.
///
/// The active key for a process is the highest version whose `expires_at`
/// is null or in the future. Rotation expires the old rows and inserts the
/// next version; nothing is deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessKeyRecord {
    pub id: Uuid,
    pub process_id: String,
    pub key_version: i32,
    /// Raw key wrapped by the secret service (opaque token).
    pub encrypted_key_material: String,
    /// BLAKE3 fingerprint of the raw key, hex-encoded. Verification only;
    /// not sufficient to reconstruct the key.
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProcessKeyRecord {
    pub fn new(
        process_id: String,
        key_version: i32,
        encrypted_key_material: String,
        key_hash: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            process_id,
            key_version,
            encrypted_key_material,
            key_hash,
            created_at: Utc::now(),
            expires_at,
        }
    }

    /// Whether this row's expiry has passed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_user_key_record_defaults() {
        let record = UserKeyRecord::new(1, "ab".into(), "local:v1:xx".into());
        assert_eq!(record.key_version, 1);
        assert_eq!(record.user_id, 1);
    }

    #[test]
    fn test_process_key_expiry() {
        let now = Utc::now();
        let mut record =
            ProcessKeyRecord::new("p-1".into(), 1, "tok".into(), "hash".into(), None);
        assert!(!record.is_expired(now));

        record.expires_at = Some(now + Duration::hours(1));
        assert!(!record.is_expired(now));

        record.expires_at = Some(now - Duration::seconds(1));
        assert!(record.is_expired(now));
    }
}
