//! Persistence layer over RocksDB.
//!
//! Provides:
//! - Namespaced and channel keys with big-endian ids that sort numerically
//! - Per-key expiration with a background sweeper and expiration listeners
//! - Atomic multi-key batches via WriteBatch
//! - Lazy full, prefix and inclusive range scans, raw or decoded to objects
//! - Key listing filtered by a byte regex
//!
//! ```no_run
//! # async fn demo() -> Result<(), layerkv_storage::StoreError> {
//! use layerkv_storage::Store;
//! use layerkv_types::Settings;
//!
//! let store = Store::open(&Settings::with_data_dir("/tmp/layerkv"))?;
//! store.put(b"greeting", b"hello", 60)?;
//! assert_eq!(store.get(b"greeting")?, b"hello");
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod channel;
pub mod codec;
pub mod column_families;
pub mod engine;
pub mod error;
pub mod keys;
pub mod limits;
pub mod scan;
pub mod store;
pub mod sweeper;
pub mod ttl;

pub use batch::BatchOp;
pub use channel::{ChannelEntry, ChannelIter};
pub use codec::{BincodeCodec, JsonCodec, ObjectCodec};
pub use error::StoreError;
pub use scan::{Entry, KeyIter, MatchingKeys, ObjectEntry, ObjectIter, ScanIter};
pub use store::{Store, StoreBuilder, StoreStats};
pub use sweeper::ExpirationListener;
pub use ttl::CANCEL_TTL;
