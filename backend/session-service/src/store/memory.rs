use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::CredentialStore;
use crate::error::AppResult;

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory credential store for tests and offline development
///
/// TTL semantics mirror Redis SETEX: an expired entry is treated as absent
/// and dropped lazily on the next read.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries, for test assertions
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| e.expires_at.map(|t| t > now).unwrap_or(true))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Force-expire a key, for tests that need to simulate TTL lapse
    pub async fn expire_now(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Utc::now() - Duration::seconds(1));
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Utc::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) => {
                    if entry.expires_at.map(|t| t > now).unwrap_or(true) {
                        return Ok(Some(entry.value.clone()));
                    }
                }
            }
        }

        // Entry exists but has expired; drop it
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> AppResult<()> {
        let expires_at = ttl_secs.map(|secs| Utc::now() + Duration::seconds(secs as i64));
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}
