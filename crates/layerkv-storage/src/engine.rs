//! RocksDB adapter.
//!
//! Provides:
//! - Database open with column family setup and tuning from settings
//! - Single-key reads and writes on the primary family
//! - Atomic write batches across families
//! - Forward/reverse iterators that skip the block cache
//! - Close guard: every call after close fails with `StoreError::Closed`

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, DBCompressionType, DBIterator, Direction,
    IteratorMode, Options, ReadOptions, WriteBatch, DB,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use layerkv_types::{Compression, EngineSettings, KB, MB};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_PRIMARY};
use crate::error::StoreError;

/// Shared handle to the underlying RocksDB instance
pub struct Engine {
    db: DB,
    path: PathBuf,
    closed: AtomicBool,
}

impl Engine {
    /// Open the engine at the given path, creating it if necessary
    pub fn open(path: &Path, settings: &EngineSettings) -> Result<Self, StoreError> {
        info!("Opening engine at {:?}", path);

        let db_opts = Self::db_options(settings);
        let cf_descriptors = build_cf_descriptors(&db_opts);
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    /// Translate settings into RocksDB options
    fn db_options(settings: &EngineSettings) -> Options {
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(&Cache::new_lru_cache(settings.block_cache_mb * MB));
        block_opts.set_block_size(settings.block_size_kb * KB);
        if settings.bloom_bits_per_key > 0 {
            block_opts.set_bloom_filter(f64::from(settings.bloom_bits_per_key), false);
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(settings.write_buffer_mb * MB);
        opts.set_compression_type(compression_type(settings.compression));
        opts.set_max_open_files(settings.max_open_files);
        opts.set_target_file_size_base(settings.target_file_size_mb * MB as u64);
        opts.set_level_zero_slowdown_writes_trigger(settings.l0_slowdown_trigger);
        opts.set_level_zero_stop_writes_trigger(settings.l0_stop_trigger);
        // Limit memory usage during compaction
        opts.set_max_background_jobs(4);
        opts
    }

    fn db(&self) -> Result<&DB, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(&self.db)
    }

    /// Resolve a column family handle
    pub(crate) fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db()?
            .cf_handle(name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Read options for scans: don't let bulk reads evict the hot set
    fn scan_options() -> ReadOptions {
        let mut opts = ReadOptions::default();
        opts.fill_cache(false);
        opts
    }

    /// Get a value from a specific column family
    pub fn get_cf(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(cf_name)?;
        Ok(self.db()?.get_cf(cf, key)?)
    }

    /// Get a primary value
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_cf(CF_PRIMARY, key)
    }

    /// Check whether a primary key exists without copying its value
    pub fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        let cf = self.cf(CF_PRIMARY)?;
        let found = self
            .db()?
            .get_pinned_cf_opt(cf, key, &Self::scan_options())?
            .is_some();
        Ok(found)
    }

    /// Put a primary value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(CF_PRIMARY)?;
        self.db()?.put_cf(cf, key, value)?;
        Ok(())
    }

    /// Delete a primary value; deleting a missing key is not an error
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(CF_PRIMARY)?;
        self.db()?.delete_cf(cf, key)?;
        Ok(())
    }

    /// Commit a batch atomically
    pub fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let count = batch.len();
        self.db()?.write(batch)?;
        debug!(ops = count, "Committed write batch");
        Ok(())
    }

    /// Forward iterator over a column family, from `start` or the first key
    pub fn iter_from(
        &self,
        cf_name: &str,
        start: Option<&[u8]>,
    ) -> Result<DBIterator<'_>, StoreError> {
        let cf = self.cf(cf_name)?;
        let mode = match start {
            Some(key) => IteratorMode::From(key, Direction::Forward),
            None => IteratorMode::Start,
        };
        Ok(self.db()?.iterator_cf_opt(cf, Self::scan_options(), mode))
    }

    /// Reverse iterator over a column family, from the last key `<= start`
    pub fn iter_reverse_from(
        &self,
        cf_name: &str,
        start: &[u8],
    ) -> Result<DBIterator<'_>, StoreError> {
        let cf = self.cf(cf_name)?;
        Ok(self.db()?.iterator_cf_opt(
            cf,
            Self::scan_options(),
            IteratorMode::From(start, Direction::Reverse),
        ))
    }

    /// Count entries in a column family
    pub fn count(&self, cf_name: &str) -> Result<u64, StoreError> {
        let mut count = 0u64;
        for item in self.iter_from(cf_name, None)? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        let db = self.db()?;
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = db.cf_handle(cf_name) {
                db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Trigger manual compaction on all column families
    pub fn compact(&self) -> Result<(), StoreError> {
        let db = self.db()?;
        info!("Starting full compaction...");
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = db.cf_handle(cf_name) {
                db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
            }
        }
        info!("Compaction complete");
        Ok(())
    }

    /// Total size of files in the data directory
    pub fn disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(&self.path) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flush memtables, stop background work and reject further calls.
    ///
    /// File handles are released when the last reference is dropped.
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Ok(());
        }
        self.flush()?;
        self.closed.store(true, Ordering::SeqCst);
        self.db.cancel_all_background_work(true);
        info!("Engine at {:?} closed", self.path);
        Ok(())
    }

    /// Delete all on-disk state under `path`. The engine must already be dropped.
    pub fn destroy(path: &Path) -> Result<(), StoreError> {
        DB::destroy(&Options::default(), path)?;
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        info!("Destroyed engine state at {:?}", path);
        Ok(())
    }
}

fn compression_type(compression: Compression) -> DBCompressionType {
    match compression {
        Compression::None => DBCompressionType::None,
        Compression::Snappy => DBCompressionType::Snappy,
        Compression::Lz4 => DBCompressionType::Lz4,
        Compression::Zstd => DBCompressionType::Zstd,
    }
}
