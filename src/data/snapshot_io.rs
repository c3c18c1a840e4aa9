use {
    crate::data::CacheStore,
    anyhow::{Context, Result},
    async_trait::async_trait,
    std::{
        collections::BTreeMap,
        fs::File,
        io::{BufReader, BufWriter, Write},
        path::{Path, PathBuf},
    },
    tokio::sync::Mutex,
};

/// [`CacheStore`] kept in memory and written to a single bincode file after every
/// mutation. The file is replaced atomically (write to `.tmp`, then rename).
pub struct SnapshotStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, String>>,
}

impl SnapshotStore {
    /// Opens `path`, starting empty if it does not exist yet. An unreadable snapshot is
    /// moved aside to `<path>.corrupt` rather than failing the open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match load_snapshot(&path) {
            Ok(records) => records,
            Err(e) => {
                let quarantine = path.with_extension("corrupt");
                log::warn!(
                    "Cache snapshot {} unreadable ({:#}), moving it to {}",
                    path.display(),
                    e,
                    quarantine.display()
                );
                std::fs::rename(&path, &quarantine).with_context(|| {
                    format!("Failed to quarantine snapshot {}", path.display())
                })?;
                BTreeMap::new()
            }
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `records` on the blocking pool. Callers hold the records lock for the
    /// duration, so snapshots land on disk in mutation order.
    async fn persist(&self, records: &BTreeMap<String, String>) -> Result<()> {
        let path = self.path.clone();
        let snapshot = records.clone();
        tokio::task::spawn_blocking(move || save_snapshot(&path, &snapshot))
            .await
            .context("Snapshot writer task failed")?
    }
}

fn load_snapshot(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let records = bincode::deserialize_from(reader)?;
    Ok(records)
}

fn save_snapshot(path: &Path, records: &BTreeMap<String, String>) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, records)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace snapshot {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl CacheStore for SnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(key.to_string(), value);
        self.persist(&records).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.remove(key).is_some() {
            self.persist(&records).await?;
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let records = self.records.lock().await;
        Ok(records
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let store = SnapshotStore::open(&path).unwrap();
        store.set("jc:a.value", "[1,2]".into()).await.unwrap();
        store.set("jc:b.value", "{}".into()).await.unwrap();
        store.remove("jc:b.value").await.unwrap();
        drop(store);

        let reopened = SnapshotStore::open(&path).unwrap();
        assert_eq!(reopened.get("jc:a.value").await.unwrap().as_deref(), Some("[1,2]"));
        assert_eq!(reopened.list_keys("jc:").await.unwrap(), vec!["jc:a.value"]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_writes_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let store = SnapshotStore::open(&path).unwrap();

        let store_ref = &store;
        let writes = (0..16).map(|i| async move {
            store_ref.set(&format!("jc:{:02}.value", i), i.to_string()).await
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }
        store.remove("jc:03.value").await.unwrap();
        drop(store);

        let reopened = SnapshotStore::open(&path).unwrap();
        let keys = reopened.list_keys("jc:").await.unwrap();
        assert_eq!(keys.len(), 15);
        assert!(!keys.contains(&"jc:03.value".to_string()));
        assert_eq!(reopened.get("jc:15.value").await.unwrap().as_deref(), Some("15"));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        std::fs::write(&path, [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap();

        let store = SnapshotStore::open(&path).unwrap();
        assert!(store.list_keys("").await.unwrap().is_empty());
        assert!(path.with_extension("corrupt").exists());
    }
}
