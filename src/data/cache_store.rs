use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

/// Abstract persistent key-value interface the tiered cache writes through.
/// Values are opaque text; the cache owns their encoding.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
    /// Every key starting with `prefix`, in ascending order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Process-local store. Used by tests and when no cache path is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let records = self.records.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(records.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut records = self.records.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        records.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        records.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let records = self.records.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
