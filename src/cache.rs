//! TTL key-value cache for upstream content fetchers.
//!
//! The [`Cache`] facade forwards to one [`CacheDriver`]; with no driver
//! configured every lookup misses and writes succeed as no-ops. Drivers may
//! evict early. Expired or unreadable records are removed lazily on read.
//!
//! ```rust,ignore
//! let forecast = cache
//!     .get_or_fetch("openweather-onecall", Duration::from_secs(600), || async {
//!         fetch_forecast().await.map(Some)
//!     })
//!     .await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::model::CacheRecord;
use crate::settings::{CacheDriverKind, CacheSettings};
use crate::store::CacheRecordStore;

/// Storage backend for [`Cache`].
#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// Driver name as used in settings.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Value>, Error>;

    async fn set(&self, key: &str, ttl: Duration, value: &Value) -> Result<bool, Error>;

    async fn delete(&self, key: &str) -> Result<bool, Error>;
}

/// Cache facade passed to content fetchers.
#[derive(Clone, Default)]
pub struct Cache {
    driver: Option<Arc<dyn CacheDriver>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("driver", &self.driver.as_ref().map(|d| d.name()))
            .finish()
    }
}

impl Cache {
    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self { driver: None }
    }

    pub fn new(driver: Arc<dyn CacheDriver>) -> Self {
        Self {
            driver: Some(driver),
        }
    }

    /// Build the cache selected in settings. `store` backs the `database`
    /// driver.
    pub async fn from_settings<S>(settings: &CacheSettings, store: Arc<S>) -> Result<Self, Error>
    where
        S: CacheRecordStore + ?Sized + 'static,
    {
        let cache = match settings.driver {
            CacheDriverKind::None => Self::disabled(),
            CacheDriverKind::Memory => Self::new(Arc::new(MemoryDriver::new())),
            CacheDriverKind::Filesystem => {
                Self::new(Arc::new(FilesystemDriver::open(settings.dir()).await?))
            }
            CacheDriverKind::Database => Self::new(Arc::new(StoreDriver::new(store))),
        };
        tracing::debug!(driver = ?settings.driver, "cache initialized");
        Ok(cache)
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        match &self.driver {
            Some(driver) => driver.get(key).await,
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, ttl: Duration, value: &Value) -> Result<bool, Error> {
        match &self.driver {
            Some(driver) => driver.set(key, ttl, value).await,
            None => Ok(true),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, Error> {
        match &self.driver {
            Some(driver) => driver.delete(key).await,
            None => Ok(true),
        }
    }

    /// Return the cached value for `key`, or run `producer` and cache its
    /// result for `ttl`.
    ///
    /// A producer returning `None` is not cached. Concurrent misses on the
    /// same key may each run the producer; the last write wins. Driver
    /// failures degrade to a miss and are logged.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Option<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Value>, E>>,
    {
        match self.get(key).await {
            Ok(Some(value)) => {
                tracing::debug!(key, "cache hit");
                return Ok(Some(value));
            }
            Ok(None) => tracing::debug!(key, "cache miss"),
            Err(e) => tracing::warn!(key, "cache read failed: {}", e),
        }

        let value = producer().await?;
        if let Some(value) = &value {
            if let Err(e) = self.set(key, ttl, value).await {
                tracing::warn!(key, "cache write failed: {}", e);
            }
        }
        Ok(value)
    }
}

/// Build a cache key from a prefix and the arguments that identify a fetch.
///
/// ```
/// use fruitstand::cache::make_key;
///
/// let a = make_key("fs-zq", &["quotes", "api-key"]);
/// assert!(a.starts_with("fs-zq-"));
/// assert_eq!(a, make_key("fs-zq", &["quotes", "api-key"]));
/// assert_ne!(a, make_key("fs-zq", &["today", "api-key"]));
/// ```
pub fn make_key(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{}-{:x}", prefix, hasher.finalize())
}

fn expiry_from(ttl: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Process-local driver.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    entries: Mutex<HashMap<String, (DateTime<Utc>, Value)>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::store("cache lock poisoned"))?;
        match entries.get(key) {
            Some((expires_at, value)) if *expires_at > Utc::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, ttl: Duration, value: &Value) -> Result<bool, Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::store("cache lock poisoned"))?;
        entries.insert(key.to_string(), (expiry_from(ttl), value.clone()));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::store("cache lock poisoned"))?;
        Ok(entries.remove(key).is_some())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    expires: DateTime<Utc>,
    data: Value,
}

/// One JSON file per key, named by the SHA-256 of the key.
#[derive(Debug, Clone)]
pub struct FilesystemDriver {
    dir: PathBuf,
}

impl FilesystemDriver {
    /// Use `dir`, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("Failed to create cache dir: {}", e)))?;
        let meta = tokio::fs::metadata(&dir).await?;
        if !meta.is_dir() {
            return Err(Error::Config(format!(
                "Filesystem cache dir is not a directory: {}",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{:x}", Sha256::digest(key.as_bytes())))
    }
}

#[async_trait]
impl CacheDriver for FilesystemDriver {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<FileRecord>(&bytes) {
            Ok(record) if record.expires > Utc::now() => return Ok(Some(record.data)),
            Ok(_) => tracing::debug!(key, "cache record expired"),
            Err(e) => tracing::debug!(key, "cache record unreadable: {}", e),
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, ttl: Duration, value: &Value) -> Result<bool, Error> {
        let record = FileRecord {
            expires: expiry_from(ttl),
            data: value.clone(),
        };
        let bytes = serde_json::to_vec(&record)?;
        tokio::fs::write(self.path_for(key), bytes).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Cache rows kept in the persistent store.
pub struct StoreDriver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> StoreDriver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> CacheDriver for StoreDriver<S>
where
    S: CacheRecordStore + ?Sized,
{
    fn name(&self) -> &'static str {
        "database"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let Some(record) = self.store.get_cache_record(key).await? else {
            return Ok(None);
        };
        if record.expires_at > Utc::now() {
            match serde_json::from_str(&record.payload) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => tracing::debug!(key, "cache record unreadable: {}", e),
            }
        }
        self.store.delete_cache_record(key).await?;
        Ok(None)
    }

    async fn set(&self, key: &str, ttl: Duration, value: &Value) -> Result<bool, Error> {
        let record = CacheRecord {
            key: key.to_string(),
            expires_at: expiry_from(ttl),
            payload: serde_json::to_string(value)?,
        };
        self.store.put_cache_record(record).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        self.store.delete_cache_record(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    async fn exercise_driver(driver: &dyn CacheDriver) {
        assert_eq!(driver.get("k").await.unwrap(), None);
        assert!(driver.set("k", MINUTE, &json!({"a": 1})).await.unwrap());
        assert_eq!(driver.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(driver.delete("k").await.unwrap());
        assert!(!driver.delete("k").await.unwrap());
        assert_eq!(driver.get("k").await.unwrap(), None);

        driver.set("gone", Duration::ZERO, &json!(1)).await.unwrap();
        assert_eq!(driver.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_driver() {
        exercise_driver(&MemoryDriver::new()).await;
    }

    #[tokio::test]
    async fn test_filesystem_driver() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::open(dir.path().join("cache")).await.unwrap();
        exercise_driver(&driver).await;
    }

    #[tokio::test]
    async fn test_store_driver() {
        let driver = StoreDriver::new(Arc::new(MemoryStore::new()));
        exercise_driver(&driver).await;
    }

    #[tokio::test]
    async fn test_filesystem_corrupt_record_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::open(dir.path()).await.unwrap();
        let path = driver.path_for("bad");
        tokio::fs::write(&path, b"not json").await.unwrap();

        assert_eq!(driver.get("bad").await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_store_expired_record_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        let driver = StoreDriver::new(store.clone());
        driver.set("old", Duration::ZERO, &json!("x")).await.unwrap();

        assert_eq!(driver.get("old").await.unwrap(), None);
        assert!(store.get_cache_record("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_or_fetch_calls_producer_once() {
        let cache = Cache::new(Arc::new(MemoryDriver::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_fetch("quote", MINUTE, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(Some(json!("be here now")))
                })
                .await
                .unwrap();
            assert_eq!(value, Some(json!("be here now")));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_does_not_cache_none() {
        let cache = Cache::new(Arc::new(MemoryDriver::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_fetch("empty", MINUTE, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Error>(None)
                })
                .await
                .unwrap();
            assert_eq!(value, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_or_fetch_propagates_producer_error() {
        let cache = Cache::disabled();
        let result = cache
            .get_or_fetch("k", MINUTE, || async {
                Err::<Option<Value>, _>(Error::Request("upstream down".to_string()))
            })
            .await;
        assert!(matches!(result, Err(Error::Request(_))));
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let cache = Cache::disabled();
        assert!(cache.set("k", MINUTE, &json!(1)).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_from_settings_selects_driver() {
        let store = Arc::new(MemoryStore::new());
        let settings = CacheSettings {
            driver: CacheDriverKind::Database,
            dir: None,
        };
        let cache = Cache::from_settings(&settings, store).await.unwrap();
        assert!(format!("{:?}", cache).contains("database"));
    }
}
