//! Atomic multi-key writes.
//!
//! All primary mutations go into one `WriteBatch`. With expiration enabled
//! the same batch carries every schedule and cancellation, staged in input
//! order under the lock stripes of the keys involved.

use rocksdb::WriteBatch;
use tracing::debug;

use crate::column_families::CF_PRIMARY;
use crate::engine::Engine;
use crate::error::StoreError;
use crate::limits::Limits;
use crate::ttl::TtlIndex;

/// One mutation in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Write `value`; schedule expiration when `ttl > 0` (seconds)
    Put { key: Vec<u8>, value: Vec<u8>, ttl: i64 },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, ttl: i64) -> Self {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Validate and commit `ops` together with their expiration changes.
///
/// Nothing is written if any item fails validation.
pub(crate) fn apply(
    engine: &Engine,
    ttl: Option<&TtlIndex>,
    limits: &Limits,
    ops: &[BatchOp],
) -> Result<(), StoreError> {
    for op in ops {
        match op {
            BatchOp::Put { key, value, .. } => limits.check_entry(key, value)?,
            BatchOp::Delete { key } => limits.check_key(key)?,
        }
    }
    if ops.is_empty() {
        return Ok(());
    }

    let ttl_updates = match ttl {
        Some(index) => index.write_batch(ops)?,
        None => {
            let cf = engine.cf(CF_PRIMARY)?;
            let mut batch = WriteBatch::default();
            for op in ops {
                match op {
                    BatchOp::Put { key, value, .. } => batch.put_cf(cf, key, value),
                    BatchOp::Delete { key } => batch.delete_cf(cf, key),
                }
            }
            engine.write(batch)?;
            0
        }
    };
    debug!(ops = ops.len(), ttl_updates, "Applied batch");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerkv_types::EngineSettings;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_engine() -> (Arc<Engine>, TtlIndex, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::open(temp_dir.path(), &EngineSettings::default()).unwrap());
        let index = TtlIndex::new(Arc::clone(&engine));
        (engine, index, temp_dir)
    }

    #[test]
    fn test_batch_commits_all_ops() {
        let (engine, index, _temp) = create_test_engine();
        engine.put(b"old", b"x").unwrap();

        let ops = vec![
            BatchOp::put("a", "1", 0),
            BatchOp::put("b", "2", 30),
            BatchOp::delete("old"),
        ];
        apply(&engine, Some(&index), &Limits::new(64), &ops).unwrap();

        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(engine.get(b"old").unwrap(), None);
        assert!(!index.is_scheduled(b"a").unwrap());
        assert!(index.is_scheduled(b"b").unwrap());
    }

    #[test]
    fn test_oversize_item_leaves_store_unchanged() {
        let (engine, index, _temp) = create_test_engine();
        engine.put(b"keep", b"v").unwrap();

        let ops = vec![
            BatchOp::put("a", "1", 0),
            BatchOp::delete("keep"),
            BatchOp::put("b", vec![0u8; 65], 10),
        ];
        let result = apply(&engine, Some(&index), &Limits::new(64), &ops);
        assert!(matches!(result, Err(StoreError::ValueTooLong { len: 65, max: 64 })));

        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(engine.get(b"keep").unwrap(), Some(b"v".to_vec()));
        assert_eq!(index.scheduled_count().unwrap(), 0);
    }

    #[test]
    fn test_delete_cancels_schedule() {
        let (engine, index, _temp) = create_test_engine();
        engine.put(b"k", b"v").unwrap();
        index.schedule(b"k", 30).unwrap();

        apply(&engine, Some(&index), &Limits::new(64), &[BatchOp::delete("k")]).unwrap();
        assert!(!index.is_scheduled(b"k").unwrap());
    }

    #[test]
    fn test_put_then_delete_in_one_batch_leaves_no_schedule() {
        let (engine, index, _temp) = create_test_engine();
        let ops = vec![BatchOp::put("k", "v", 30), BatchOp::delete("k")];
        apply(&engine, Some(&index), &Limits::new(64), &ops).unwrap();

        assert_eq!(engine.get(b"k").unwrap(), None);
        assert_eq!(index.scheduled_count().unwrap(), 0);
    }

    #[test]
    fn test_later_op_wins_within_batch() {
        let (engine, _index, _temp) = create_test_engine();
        let ops = vec![
            BatchOp::put("k", "first", 0),
            BatchOp::put("k", "second", 0),
        ];
        apply(&engine, None, &Limits::new(64), &ops).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (engine, _index, _temp) = create_test_engine();
        apply(&engine, None, &Limits::new(64), &[]).unwrap();
        assert_eq!(engine.count(CF_PRIMARY).unwrap(), 0);
    }
}
