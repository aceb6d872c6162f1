/// In-memory repository for tests.
///
/// Mirrors the conflict semantics of the PostgreSQL implementation: inserts
/// that would violate a uniqueness constraint are absorbed and report
/// `false` rather than failing.
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{ProcessKeyRecord, UserKeyRecord};
use super::KeyRepository;
use crate::error::Result;

#[derive(Default)]
struct Inner {
    user_keys: HashMap<i64, UserKeyRecord>,
    /// process_id -> rows ordered by insertion (version ascending).
    process_keys: HashMap<String, Vec<ProcessKeyRecord>>,
}

#[derive(Default)]
pub struct InMemoryKeyRepository {
    inner: RwLock<Inner>,
}

impl InMemoryKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyRepository for InMemoryKeyRepository {
    async fn insert_user_key(&self, record: UserKeyRecord) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        if inner.user_keys.contains_key(&record.user_id) {
            return Ok(false);
        }
        inner.user_keys.insert(record.user_id, record);
        Ok(true)
    }

    async fn get_user_key(&self, user_id: i64) -> Result<Option<UserKeyRecord>> {
        Ok(self.inner.read().unwrap().user_keys.get(&user_id).cloned())
    }

    async fn insert_process_key(&self, record: ProcessKeyRecord) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        let rows = inner
            .process_keys
            .entry(record.process_id.clone())
            .or_default();
        if rows.iter().any(|r| r.key_version == record.key_version) {
            return Ok(false);
        }
        rows.push(record);
        rows.sort_by_key(|r| r.key_version);
        Ok(true)
    }

    async fn latest_process_key(&self, process_id: &str) -> Result<Option<ProcessKeyRecord>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .process_keys
            .get(process_id)
            .and_then(|rows| rows.last().cloned()))
    }

    async fn expire_process_keys(&self, process_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let mut touched = 0;
        if let Some(rows) = inner.process_keys.get_mut(process_id) {
            for row in rows.iter_mut() {
                let live = match row.expires_at {
                    None => true,
                    Some(at) => at > now,
                };
                if live {
                    row.expires_at = Some(now);
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_key_insert_idempotent() {
        let repo = InMemoryKeyRepository::new();
        let first = UserKeyRecord::new(1, "pk1".into(), "tok1".into());
        let second = UserKeyRecord::new(1, "pk2".into(), "tok2".into());

        assert!(repo.insert_user_key(first).await.unwrap());
        assert!(!repo.insert_user_key(second).await.unwrap());

        // The surviving row is the first one.
        let row = repo.get_user_key(1).await.unwrap().unwrap();
        assert_eq!(row.public_key, "pk1");
    }

    #[tokio::test]
    async fn test_process_key_version_conflict() {
        let repo = InMemoryKeyRepository::new();
        let v1 = ProcessKeyRecord::new("p-1".into(), 1, "t1".into(), "h1".into(), None);
        let dup = ProcessKeyRecord::new("p-1".into(), 1, "t2".into(), "h2".into(), None);
        let v2 = ProcessKeyRecord::new("p-1".into(), 2, "t3".into(), "h3".into(), None);

        assert!(repo.insert_process_key(v1).await.unwrap());
        assert!(!repo.insert_process_key(dup).await.unwrap());
        assert!(repo.insert_process_key(v2).await.unwrap());

        let latest = repo.latest_process_key("p-1").await.unwrap().unwrap();
        assert_eq!(latest.key_version, 2);
        assert_eq!(latest.key_hash, "h3");
    }

    #[tokio::test]
    async fn test_expire_only_touches_live_rows() {
        let repo = InMemoryKeyRepository::new();
        let now = Utc::now();

        let mut v1 = ProcessKeyRecord::new("p-1".into(), 1, "t1".into(), "h1".into(), None);
        v1.expires_at = Some(now - chrono::Duration::hours(1));
        let v2 = ProcessKeyRecord::new("p-1".into(), 2, "t2".into(), "h2".into(), None);

        repo.insert_process_key(v1).await.unwrap();
        repo.insert_process_key(v2).await.unwrap();

        assert_eq!(repo.expire_process_keys("p-1", now).await.unwrap(), 1);
        assert_eq!(repo.expire_process_keys("p-1", now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_process_empty() {
        let repo = InMemoryKeyRepository::new();
        assert!(repo.latest_process_key("nope").await.unwrap().is_none());
        assert_eq!(repo.expire_process_keys("nope", Utc::now()).await.unwrap(), 0);
    }
}
