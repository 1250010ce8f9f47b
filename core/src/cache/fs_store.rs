use super::{sanitize_cache_key, CacheEntry, CacheStore};
use crate::error::{KuraError, Result};
use crate::types::Digest;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

const ENTRY_EXTENSION: &str = "json";
const TEMP_PREFIX: &str = ".tmp-";

/// Cache entries as JSON envelopes under `<root>/<shard>/<key>.json`.
///
/// Writes go to a temp file in the target directory and are renamed into
/// place, so a reader in any process sees either the old or the new entry.
/// Concurrent writers from different processes are last-writer-wins.
pub struct FilesystemStore {
    root: PathBuf,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl FilesystemStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root).map_err(|e| KuraError::io(&root, e))?;
        Ok(Self {
            root,
            sweeper: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let shard = Digest::of(key.as_bytes());
        self.root
            .join(&shard.hex()[..2])
            .join(format!("{}.{}", sanitize_cache_key(key), ENTRY_EXTENSION))
    }

    /// Deletes every expired entry and returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || sweep_dir(&root))
            .await
            .map_err(|e| KuraError::store(format!("cache sweep task failed: {}", e)))?
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// store is closed or dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) {
        let store = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                match store.sweep_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "swept expired cache entries"),
                    Err(e) => tracing::warn!("cache sweep failed: {}", e),
                }
            }
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Removes every entry.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(KuraError::io(&self.root, e)),
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| KuraError::io(&self.root, e))
    }
}

#[async_trait]
impl CacheStore for FilesystemStore {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(KuraError::io(&path, e)),
        };

        let entry: CacheEntry = match serde_json::from_slice(&content) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable cache entry: {}", e);
                return Ok(None);
            }
        };

        // Expired entries read as misses; the sweeper deletes them.
        if entry.key != key || entry.is_expired() {
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(key, value.to_vec(), ttl);
        let content = serde_json::to_vec(&entry)?;
        let path = self.path_for(key);

        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .map_err(|e| KuraError::store(format!("cache write task failed: {}", e)))?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KuraError::io(&path, e)),
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        Ok(())
    }
}

/// Write-temp-then-rename within the destination directory.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| KuraError::store(format!("invalid cache path: {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| KuraError::io(parent, e))?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| KuraError::io(parent, e))?;
    temp.write_all(content)
        .map_err(|e| KuraError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| KuraError::io(temp.path(), e))?;
    temp.persist(path).map_err(|e| KuraError::io(path, e.error))?;

    Ok(())
}

fn sweep_dir(root: &Path) -> Result<usize> {
    let mut removed = 0;

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION)
            || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
        {
            continue;
        }

        if read_entry(path).is_some_and(|cached| cached.is_expired()) && remove_if_expired(path)? {
            removed += 1;
        }
    }

    Ok(removed)
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let content = std::fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Deletes the entry at `path` only if the copy being deleted is expired.
///
/// The entry is first renamed aside, so a `set` racing with the sweep either
/// lands after the rename and is untouched, or is the copy that was moved and
/// gets linked back into place unless an even newer write already exists.
fn remove_if_expired(path: &Path) -> Result<bool> {
    let Some(name) = path.file_name() else {
        return Ok(false);
    };
    let aside = path.with_file_name(format!("{}sweep-{}", TEMP_PREFIX, name.to_string_lossy()));

    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(KuraError::io(path, e)),
    }

    let expired = read_entry(&aside).map_or(true, |cached| cached.is_expired());
    if !expired {
        match std::fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => tracing::warn!(path = %path.display(), "could not restore live cache entry: {}", e),
        }
    }

    std::fs::remove_file(&aside).map_err(|e| KuraError::io(&aside, e))?;
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_then_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        let key = Digest::of(b"layer").to_string();
        store.set(&key, b"facts", None).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap(), Some(b"facts".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(store.get("nonexistent").await.unwrap().is_none());
        store.delete("nonexistent").await.unwrap();

        store.set("k", b"v", None).await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites_value_and_expiry() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        store
            .set("k", b"old", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        store.set("k", b"new", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_swept() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        store
            .set("short", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.set("long", b"v", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.path_for("short").exists());

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(!store.path_for("short").exists());
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_keeps_entry_rewritten_after_it_was_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        store
            .set("k", b"old", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let path = store.path_for("k");
        assert!(read_entry(&path).unwrap().is_expired());

        // A writer replaces the entry between the sweep's read and its delete.
        store.set("k", b"new", None).await.unwrap();
        assert!(!remove_if_expired(&path).unwrap());

        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_background_sweeper_removes_expired_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap());

        store
            .set("short", b"v", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        store.spawn_sweeper(Duration::from_millis(20));

        let path = store.path_for("short");
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while path.exists() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_stops_sweeper() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap());

        store.spawn_sweeper(Duration::from_millis(10));
        store.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        store
            .set("short", b"v", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.path_for("short").exists());
        assert!(store.sweeper.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        store.set("k", b"v", None).await.unwrap();

        let leftovers: Vec<_> = WalkDir::new(temp_dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap();

        let path = store.path_for("k");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_a_complete_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(temp_dir.path().to_path_buf()).unwrap());

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set("shared", &[i; 4096], None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = store.get("shared").await.unwrap().unwrap();
        assert_eq!(value.len(), 4096);
        assert!(value.iter().all(|b| *b == value[0]));
    }

    #[tokio::test]
    async fn test_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp_dir.path().join("fanal")).unwrap();

        store.set("k", b"v", None).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.root().exists());
    }
}
