/// PostgreSQL repository for the key tables.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds. Duplicate
/// creates are absorbed with ON CONFLICT DO NOTHING so idempotency holds
/// under concurrent callers without application-level locking.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::{ProcessKeyRecord, UserKeyRecord};
use super::KeyRepository;
use crate::error::{KmsError, Result};

fn db_err(e: sqlx::Error) -> KmsError {
    KmsError::Database(e.to_string())
}

#[derive(Clone)]
pub struct PgKeyRepository {
    pool: PgPool,
}

impl PgKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyRepository for PgKeyRepository {
    async fn insert_user_key(&self, record: UserKeyRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_keys (id, user_id, public_key, encrypted_private_key, key_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.public_key)
        .bind(&record.encrypted_private_key)
        .bind(record.key_version)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_user_key(&self, user_id: i64) -> Result<Option<UserKeyRecord>> {
        sqlx::query_as::<_, UserKeyRecord>("SELECT * FROM user_keys WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_process_key(&self, record: ProcessKeyRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO process_keys
            (id, process_id, key_version, encrypted_key_material, key_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (process_id, key_version) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.process_id)
        .bind(record.key_version)
        .bind(&record.encrypted_key_material)
        .bind(&record.key_hash)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_process_key(&self, process_id: &str) -> Result<Option<ProcessKeyRecord>> {
        sqlx::query_as::<_, ProcessKeyRecord>(
            "SELECT * FROM process_keys WHERE process_id = $1 ORDER BY key_version DESC LIMIT 1",
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn expire_process_keys(&self, process_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE process_keys
            SET expires_at = $2
            WHERE process_id = $1 AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(process_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
