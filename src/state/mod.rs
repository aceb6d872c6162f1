/// Persistence layer for the key hierarchy.
///
/// Two tables back the subsystem: one user-key row per user and versioned
/// process-key rows. Idempotent creates rely on storage-level uniqueness
/// constraints rather than application locking, so concurrent callers are
/// safe without additional synchronization.
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{KmsError, Result};
use models::{ProcessKeyRecord, UserKeyRecord};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| KmsError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| KmsError::Database(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Typed access to the two key tables.
///
/// Implementations must absorb duplicate inserts via their uniqueness
/// constraints: `insert_*` returns `false` when the row already existed,
/// never an error.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Insert a user key row. Returns `false` if a row for the user exists.
    async fn insert_user_key(&self, record: UserKeyRecord) -> Result<bool>;

    /// Load the user key row, if any.
    async fn get_user_key(&self, user_id: i64) -> Result<Option<UserKeyRecord>>;

    /// Insert a process key row. Returns `false` on a
    /// (process_id, key_version) conflict.
    async fn insert_process_key(&self, record: ProcessKeyRecord) -> Result<bool>;

    /// The highest-version row for the process, expired or not.
    async fn latest_process_key(&self, process_id: &str) -> Result<Option<ProcessKeyRecord>>;

    /// Mark every non-expired row for the process as expired at `now`.
    /// Returns the number of rows touched. Rows are never deleted.
    async fn expire_process_keys(&self, process_id: &str, now: DateTime<Utc>) -> Result<u64>;
}
