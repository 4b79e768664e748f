//! The store facade.
//!
//! `Store` ties the engine, the expiration index, the sweeper and the
//! object codec together behind one handle. It is `Send + Sync` and meant
//! to be shared through an `Arc`. Everything except [`Store::close`] and
//! [`Store::destroy`] is synchronous.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use regex::bytes::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{info, warn};

use layerkv_types::Settings;

use crate::batch::{self, BatchOp};
use crate::codec::{JsonCodec, ObjectCodec};
use crate::column_families::CF_PRIMARY;
use crate::engine::Engine;
use crate::error::{display_key, StoreError};
use crate::limits::Limits;
use crate::scan::{KeyIter, MatchingKeys, ObjectIter, ScanIter};
use crate::sweeper::{ExpirationListener, Sweeper, SweeperConfig};
use crate::ttl::TtlIndex;

/// Point-in-time store counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries in the primary key space
    pub entry_count: u64,
    /// Keys with an active expiration schedule
    pub ttl_count: u64,
    pub disk_usage_bytes: u64,
}

/// Collects open-time options for a [`Store`]
pub struct StoreBuilder<C: ObjectCodec = JsonCodec> {
    settings: Settings,
    codec: C,
    listeners: Vec<Arc<dyn ExpirationListener>>,
}

impl StoreBuilder<JsonCodec> {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            codec: JsonCodec,
            listeners: Vec::new(),
        }
    }
}

impl<C: ObjectCodec> StoreBuilder<C> {
    /// Use a different object codec
    pub fn with_codec<C2: ObjectCodec>(self, codec: C2) -> StoreBuilder<C2> {
        StoreBuilder {
            settings: self.settings,
            codec,
            listeners: self.listeners,
        }
    }

    /// Register an observer for expired entries
    pub fn listener(mut self, listener: impl ExpirationListener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Open the store.
    ///
    /// With TTL enabled this must run inside a Tokio runtime, which hosts
    /// the sweeper.
    pub fn open(self) -> Result<Store<C>, StoreError> {
        let settings = self.settings;
        settings.validate()?;

        let runtime = if settings.ttl_enabled {
            Some(Handle::try_current().map_err(|e| StoreError::Runtime(e.to_string()))?)
        } else {
            None
        };

        let path = settings.expanded_data_dir();
        std::fs::create_dir_all(&path)?;
        let engine = Arc::new(Engine::open(&path, &settings.engine)?);

        let (ttl, sweeper) = match runtime {
            Some(runtime) => {
                let index = Arc::new(TtlIndex::new(Arc::clone(&engine)));
                let config = SweeperConfig {
                    interval: Duration::from_millis(settings.sweep_interval_ms),
                    queue_capacity: settings.listener_queue_capacity,
                };
                let sweeper =
                    Sweeper::start(&runtime, Arc::clone(&index), config, self.listeners);
                (Some(index), Some(sweeper))
            }
            None => {
                if !self.listeners.is_empty() {
                    warn!("Expiration listeners registered but TTL is disabled; they will never fire");
                }
                (None, None)
            }
        };

        info!(
            path = %path.display(),
            ttl_enabled = settings.ttl_enabled,
            max_kv_len = settings.max_kv_len,
            "Store opened"
        );

        Ok(Store {
            engine,
            ttl,
            sweeper: tokio::sync::Mutex::new(sweeper),
            limits: Limits::new(settings.max_kv_len),
            codec: self.codec,
            channel_ids: DashMap::new(),
        })
    }
}

/// Persistent key/value store with expiration, batches and scans
pub struct Store<C: ObjectCodec = JsonCodec> {
    pub(crate) engine: Arc<Engine>,
    pub(crate) ttl: Option<Arc<TtlIndex>>,
    sweeper: tokio::sync::Mutex<Option<Sweeper>>,
    pub(crate) limits: Limits,
    pub(crate) codec: C,
    /// Last id handed out per channel
    pub(crate) channel_ids: DashMap<String, u64>,
}

impl Store<JsonCodec> {
    /// Open with the default codec and no listeners
    pub fn open(settings: &Settings) -> Result<Self, StoreError> {
        StoreBuilder::new(settings.clone()).open()
    }

    pub fn builder(settings: Settings) -> StoreBuilder<JsonCodec> {
        StoreBuilder::new(settings)
    }
}

impl<C: ObjectCodec> Store<C> {
    pub(crate) fn ttl_index(&self) -> Result<&TtlIndex, StoreError> {
        self.ttl.as_deref().ok_or(StoreError::TtlNotEnabled)
    }

    pub fn ttl_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Whether `key` is present. Oversize keys and engine errors read as absent.
    pub fn exists(&self, key: &[u8]) -> bool {
        if self.limits.check_key(key).is_err() {
            return false;
        }
        match self.engine.exists(key) {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %display_key(key), error = %e, "exists check failed");
                false
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.limits.check_key(key)?;
        self.engine
            .get(key)?
            .ok_or_else(|| StoreError::NotFound(display_key(key)))
    }

    /// Write `value` under `key`.
    ///
    /// With `ttl > 0` (seconds) the value and its expiration commit together.
    /// `ttl <= 0` leaves any existing schedule as it is. Without expiration
    /// support the ttl is ignored.
    pub fn put(&self, key: &[u8], value: &[u8], ttl: i64) -> Result<(), StoreError> {
        self.limits.check_entry(key, value)?;
        match &self.ttl {
            Some(index) => index.put_entry(key, value, ttl),
            None => self.engine.put(key, value),
        }
    }

    /// Delete `key` and any expiration schedule. Missing keys are not an error.
    pub fn del(&self, key: &[u8]) -> Result<(), StoreError> {
        self.limits.check_key(key)?;
        match &self.ttl {
            Some(index) => index.delete_entry(key),
            None => self.engine.delete(key),
        }
    }

    /// Set (`ttl > 0` seconds) or cancel ([`crate::CANCEL_TTL`]) expiration of an existing key
    pub fn set_ttl(&self, key: &[u8], ttl: i64) -> Result<(), StoreError> {
        self.limits.check_key(key)?;
        self.ttl_index()?.set_ttl(key, ttl)
    }

    /// Cancel expiration; `TtlNotFound` if none was scheduled
    pub fn nil_ttl(&self, key: &[u8]) -> Result<(), StoreError> {
        self.limits.check_key(key)?;
        if self.ttl_index()?.cancel(key)? {
            Ok(())
        } else {
            Err(StoreError::TtlNotFound(display_key(key)))
        }
    }

    /// Time until `key` expires
    pub fn get_ttl(&self, key: &[u8]) -> Result<Duration, StoreError> {
        self.limits.check_key(key)?;
        self.ttl_index()?.remaining(key)
    }

    /// Remove any expiration schedule for `key`
    pub fn del_ttl(&self, key: &[u8]) -> Result<(), StoreError> {
        self.limits.check_key(key)?;
        self.ttl_index()?.cancel(key)?;
        Ok(())
    }

    pub fn put_object<T: Serialize + ?Sized>(
        &self,
        key: &[u8],
        object: &T,
        ttl: i64,
    ) -> Result<(), StoreError> {
        let value = self.codec.encode(object)?;
        self.put(key, &value, ttl)
    }

    pub fn get_object<T: DeserializeOwned>(&self, key: &[u8]) -> Result<T, StoreError> {
        let value = self.get(key)?;
        self.codec.decode(&value)
    }

    /// Apply `ops` atomically; see [`BatchOp`]
    pub fn batch_apply(&self, ops: &[BatchOp]) -> Result<(), StoreError> {
        batch::apply(&self.engine, self.ttl.as_deref(), &self.limits, ops)
    }

    /// Every entry in key order
    pub fn scan(&self) -> Result<ScanIter<'_>, StoreError> {
        ScanIter::full(&self.engine)
    }

    /// Entries whose key starts with `prefix`
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<ScanIter<'_>, StoreError> {
        self.limits.check_key(prefix)?;
        ScanIter::prefix(&self.engine, prefix)
    }

    /// Entries with `min <= key <= max`
    pub fn scan_range(&self, min: &[u8], max: &[u8]) -> Result<ScanIter<'_>, StoreError> {
        self.limits.check_key(min)?;
        self.limits.check_key(max)?;
        ScanIter::range(&self.engine, min, max)
    }

    pub fn scan_objects<T: DeserializeOwned>(&self) -> Result<ObjectIter<'_, T, C>, StoreError> {
        Ok(ObjectIter::new(self.scan()?, &self.codec))
    }

    pub fn scan_prefix_objects<T: DeserializeOwned>(
        &self,
        prefix: &[u8],
    ) -> Result<ObjectIter<'_, T, C>, StoreError> {
        Ok(ObjectIter::new(self.scan_prefix(prefix)?, &self.codec))
    }

    pub fn scan_range_objects<T: DeserializeOwned>(
        &self,
        min: &[u8],
        max: &[u8],
    ) -> Result<ObjectIter<'_, T, C>, StoreError> {
        Ok(ObjectIter::new(self.scan_range(min, max)?, &self.codec))
    }

    pub fn keys(&self) -> Result<KeyIter<'_>, StoreError> {
        Ok(KeyIter::new(self.scan()?))
    }

    /// Keys where `pattern` matches anywhere in the key; anchor it to match whole keys
    pub fn keys_matching<'a>(&'a self, pattern: &'a Regex) -> Result<MatchingKeys<'a>, StoreError> {
        Ok(MatchingKeys::new(self.keys()?, pattern))
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let ttl_count = match &self.ttl {
            Some(index) => index.scheduled_count()?,
            None => 0,
        };
        Ok(StoreStats {
            entry_count: self.engine.count(CF_PRIMARY)?,
            ttl_count,
            disk_usage_bytes: self.engine.disk_usage(),
        })
    }

    pub fn compact(&self) -> Result<(), StoreError> {
        self.engine.compact()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Stop the sweeper and close the engine.
    ///
    /// The sweeper is fully stopped before the engine is marked closed.
    /// Every later operation fails with [`StoreError::Closed`]. Closing twice
    /// is a no-op.
    pub async fn close(&self) -> Result<(), StoreError> {
        if let Some(mut sweeper) = self.sweeper.lock().await.take() {
            sweeper.stop().await;
        }
        self.engine.close()
    }

    /// Close the store and delete its on-disk state
    pub async fn destroy(self) -> Result<(), StoreError> {
        self.close().await?;
        let path = self.engine.path().to_path_buf();

        let Store { engine, ttl, .. } = self;
        drop(ttl);
        if Arc::try_unwrap(engine).is_err() {
            return Err(StoreError::Runtime(
                "engine still referenced after close".to_string(),
            ));
        }

        Engine::destroy(&path)?;
        info!(path = %path.display(), "Store destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use serde::Deserialize;
    use tempfile::TempDir;

    fn test_settings(temp_dir: &TempDir, ttl_enabled: bool) -> Settings {
        Settings {
            ttl_enabled,
            max_kv_len: 64,
            sweep_interval_ms: 100,
            ..Settings::with_data_dir(temp_dir.path().join("db"))
        }
    }

    #[test]
    fn test_open_without_runtime_fails_when_ttl_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let result = Store::open(&test_settings(&temp_dir, true));
        assert!(matches!(result, Err(StoreError::Runtime(_))));
    }

    #[test]
    fn test_ttl_disabled_store_is_sync() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(&test_settings(&temp_dir, false)).unwrap();
        assert!(!store.ttl_enabled());

        store.put(b"k", b"v", 10).unwrap();
        assert_eq!(store.get(b"k").unwrap(), b"v");
        assert!(matches!(store.set_ttl(b"k", 5), Err(StoreError::TtlNotEnabled)));
        assert!(matches!(store.get_ttl(b"k"), Err(StoreError::TtlNotEnabled)));
        assert!(matches!(store.nil_ttl(b"k"), Err(StoreError::TtlNotEnabled)));
        assert!(matches!(store.del_ttl(b"k"), Err(StoreError::TtlNotEnabled)));
        assert_eq!(store.stats().unwrap().ttl_count, 0);

        store.del(b"k").unwrap();
        assert!(!store.exists(b"k"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings {
            max_kv_len: 0,
            ..test_settings(&temp_dir, false)
        };
        assert!(matches!(Store::open(&settings), Err(StoreError::Settings(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_length_limits() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(&test_settings(&temp_dir, true)).unwrap();
        let long = vec![b'x'; 65];

        assert!(matches!(
            store.put(&long, b"v", 0),
            Err(StoreError::KeyTooLong { len: 65, max: 64 })
        ));
        assert!(matches!(
            store.put(b"k", &long, 0),
            Err(StoreError::ValueTooLong { len: 65, max: 64 })
        ));
        assert!(matches!(store.get(&long), Err(StoreError::KeyTooLong { .. })));
        assert!(matches!(store.del(&long), Err(StoreError::KeyTooLong { .. })));
        assert!(matches!(store.scan_prefix(&long), Err(StoreError::KeyTooLong { .. })));
        assert!(!store.exists(&long));

        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ttl_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(&test_settings(&temp_dir, true)).unwrap();

        assert!(matches!(store.set_ttl(b"nope", 5), Err(StoreError::NotFound(_))));

        store.put(b"k", b"v", 0).unwrap();
        assert!(matches!(store.get_ttl(b"k"), Err(StoreError::TtlNotFound(_))));
        assert!(matches!(store.nil_ttl(b"k"), Err(StoreError::TtlNotFound(_))));
        store.del_ttl(b"k").unwrap();

        store.set_ttl(b"k", 30).unwrap();
        assert!(store.get_ttl(b"k").unwrap() > Duration::from_secs(29));
        // A put without ttl keeps the schedule
        store.put(b"k", b"v2", 0).unwrap();
        assert!(store.get_ttl(b"k").is_ok());

        store.nil_ttl(b"k").unwrap();
        assert!(matches!(store.get_ttl(b"k"), Err(StoreError::TtlNotFound(_))));

        store.put(b"k", b"v3", 30).unwrap();
        store.del(b"k").unwrap();
        assert_eq!(store.stats().unwrap().ttl_count, 0);

        store.close().await.unwrap();
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_objects_with_bincode() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::builder(test_settings(&temp_dir, true))
            .with_codec(BincodeCodec)
            .open()
            .unwrap();

        store.put_object(b"p", &Point { x: 1, y: -2 }, 0).unwrap();
        assert_eq!(store.get_object::<Point>(b"p").unwrap(), Point { x: 1, y: -2 });
        assert!(matches!(
            store.get_object::<Point>(b"missing"),
            Err(StoreError::NotFound(_))
        ));

        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_then_destroy() {
        let temp_dir = TempDir::new().unwrap();
        let settings = test_settings(&temp_dir, true);
        let store = Store::open(&settings).unwrap();
        store.put(b"k", b"v", 0).unwrap();

        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.get(b"k"), Err(StoreError::Closed)));
        // Closing again is fine
        store.close().await.unwrap();

        store.destroy().await.unwrap();
        assert!(!settings.expanded_data_dir().exists());
    }
}
