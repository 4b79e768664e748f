//! Storage layer error types.

use layerkv_types::SettingsError;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key exceeds the configured length bound
    #[error("Key too long: {len} bytes (max {max})")]
    KeyTooLong { len: usize, max: usize },

    /// Value exceeds the configured length bound
    #[error("Value too long: {len} bytes (max {max})")]
    ValueTooLong { len: usize, max: usize },

    /// Key not present in the primary store
    #[error("Key not found: {0}")]
    NotFound(String),

    /// TTL support is disabled for this store
    #[error("TTL is not enabled")]
    TtlNotEnabled,

    /// Key has no active expiration schedule
    #[error("No TTL scheduled for key: {0}")]
    TtlNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Operation attempted after close
    #[error("Store is closed")]
    Closed,

    /// Object encoding/decoding error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// No Tokio runtime available to host the expiration sweeper
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// Render a key for error messages and logs.
pub(crate) fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
