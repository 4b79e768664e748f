//! Column family definitions for RocksDB.
//!
//! - default: primary entries, the key space callers see
//! - ttl: key -> deadline (Unix ms, big-endian)
//! - ttl_deadlines: {deadline:be64}{key} -> empty, ordered by deadline so
//!   the sweeper only reads records that are due
//!
//! The two TTL families form the reserved key space for expiration state
//! and never show up in scans of the primary family.

use rocksdb::{ColumnFamilyDescriptor, Options, DEFAULT_COLUMN_FAMILY_NAME};

/// Column family name for primary entries
pub const CF_PRIMARY: &str = DEFAULT_COLUMN_FAMILY_NAME;

/// Column family name for key -> deadline records
pub const CF_TTL: &str = "ttl";

/// Column family name for the deadline-ordered expiration index
pub const CF_TTL_DEADLINES: &str = "ttl_deadlines";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_PRIMARY, CF_TTL, CF_TTL_DEADLINES];

/// Expiration records are small and rewritten often; keep them uncompressed.
fn ttl_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::None);
    opts
}

/// Build all column family descriptors, primary family using `primary_opts`
pub fn build_cf_descriptors(primary_opts: &Options) -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_PRIMARY, primary_opts.clone()),
        ColumnFamilyDescriptor::new(CF_TTL, ttl_options()),
        ColumnFamilyDescriptor::new(CF_TTL_DEADLINES, ttl_options()),
    ]
}
