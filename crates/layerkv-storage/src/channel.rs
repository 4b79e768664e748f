//! Channel and namespace helpers on top of [`Store`].
//!
//! A channel groups keys under `channel + '-'`. Entries pushed with
//! [`Store::push_channel`] get an 8-byte big-endian id, so they list in
//! insertion order; named sub-keys share the same prefix.
//!
//! Sub-keys of exactly 8 bytes are indistinguishable from ids and are
//! listed by [`Store::channel_entries`] as if they were.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::batch::BatchOp;
use crate::codec::ObjectCodec;
use crate::column_families::CF_PRIMARY;
use crate::error::StoreError;
use crate::keys::{
    decode_id, encode_namespaced_id, encode_namespaced_key, namespace_prefix, ID_LEN,
};
use crate::scan::{ObjectIter, ScanIter};
use crate::store::Store;

/// An auto-id entry of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub id: u64,
    pub value: Vec<u8>,
}

/// Ascending iterator over the auto-id entries of one channel
pub struct ChannelIter<'a> {
    inner: ScanIter<'a>,
    prefix_len: usize,
}

impl Iterator for ChannelIter<'_> {
    type Item = Result<ChannelEntry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if entry.key.len() != self.prefix_len + ID_LEN {
                continue;
            }
            return Some(Ok(ChannelEntry {
                id: decode_id(&entry.key[self.prefix_len..]),
                value: entry.value,
            }));
        }
    }
}

impl<C: ObjectCodec> Store<C> {
    /// Highest id stored under `channel`, or 0
    fn last_channel_id(&self, channel: &str) -> Result<u64, StoreError> {
        let prefix = namespace_prefix(channel);
        let mut seek = prefix.clone();
        seek.extend_from_slice(&[0xff; ID_LEN]);

        for item in self.engine.iter_reverse_from(CF_PRIMARY, &seek)? {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() == prefix.len() + ID_LEN {
                return Ok(decode_id(&key[prefix.len()..]));
            }
        }
        Ok(0)
    }

    /// Append `value` to `channel` under the next id and return the id.
    ///
    /// Ids start at 1 and continue from the highest stored id after a reopen.
    pub fn push_channel(&self, channel: &str, value: &[u8], ttl: i64) -> Result<u64, StoreError> {
        let key_len = channel.len() + 1 + ID_LEN;
        if key_len > self.limits.max_kv_len {
            return Err(StoreError::KeyTooLong {
                len: key_len,
                max: self.limits.max_kv_len,
            });
        }
        self.limits.check_value(value)?;

        let id = {
            let mut last = self
                .channel_ids
                .entry(channel.to_string())
                .or_try_insert_with(|| self.last_channel_id(channel))?;
            *last += 1;
            *last
        };

        self.put(&encode_namespaced_id(channel, id), value, ttl)?;
        debug!(channel, id, "Pushed channel entry");
        Ok(id)
    }

    pub fn push_channel_object<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        object: &T,
        ttl: i64,
    ) -> Result<u64, StoreError> {
        let value = self.codec.encode(object)?;
        self.push_channel(channel, &value, ttl)
    }

    pub fn get_channel(&self, channel: &str, id: u64) -> Result<Vec<u8>, StoreError> {
        self.get(&encode_namespaced_id(channel, id))
    }

    pub fn del_channel(&self, channel: &str, id: u64) -> Result<(), StoreError> {
        self.del(&encode_namespaced_id(channel, id))
    }

    /// Auto-id entries of `channel` in id order
    pub fn channel_entries(&self, channel: &str) -> Result<ChannelIter<'_>, StoreError> {
        let prefix = namespace_prefix(channel);
        Ok(ChannelIter {
            inner: self.scan_prefix(&prefix)?,
            prefix_len: prefix.len(),
        })
    }

    pub fn put_namespaced(
        &self,
        channel: &str,
        subkey: &str,
        value: &[u8],
        ttl: i64,
    ) -> Result<(), StoreError> {
        self.put(&encode_namespaced_key(channel, subkey), value, ttl)
    }

    pub fn get_namespaced(&self, channel: &str, subkey: &str) -> Result<Vec<u8>, StoreError> {
        self.get(&encode_namespaced_key(channel, subkey))
    }

    pub fn del_namespaced(&self, channel: &str, subkey: &str) -> Result<(), StoreError> {
        self.del(&encode_namespaced_key(channel, subkey))
    }

    pub fn put_namespaced_object<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        subkey: &str,
        object: &T,
        ttl: i64,
    ) -> Result<(), StoreError> {
        self.put_object(&encode_namespaced_key(channel, subkey), object, ttl)
    }

    pub fn get_namespaced_object<T: DeserializeOwned>(
        &self,
        channel: &str,
        subkey: &str,
    ) -> Result<T, StoreError> {
        self.get_object(&encode_namespaced_key(channel, subkey))
    }

    /// Every entry under `channel`, ids and named sub-keys alike
    pub fn namespace_entries(&self, channel: &str) -> Result<ScanIter<'_>, StoreError> {
        self.scan_prefix(&namespace_prefix(channel))
    }

    pub fn namespace_objects<T: DeserializeOwned>(
        &self,
        channel: &str,
    ) -> Result<ObjectIter<'_, T, C>, StoreError> {
        self.scan_prefix_objects(&namespace_prefix(channel))
    }

    /// Delete every key under `channel` in one batch, cancelling their
    /// expirations. Returns the number of keys removed.
    pub fn drop_namespace(&self, channel: &str) -> Result<usize, StoreError> {
        let ops = self
            .namespace_entries(channel)?
            .map(|item| item.map(|entry| BatchOp::delete(entry.key)))
            .collect::<Result<Vec<_>, _>>()?;

        self.batch_apply(&ops)?;
        self.channel_ids.remove(channel);
        info!(channel, removed = ops.len(), "Dropped namespace");
        Ok(ops.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerkv_types::Settings;
    use tempfile::TempDir;

    fn create_test_store(temp_dir: &TempDir) -> Store {
        let settings = Settings {
            ttl_enabled: false,
            ..Settings::with_data_dir(temp_dir.path().join("db"))
        };
        Store::open(&settings).unwrap()
    }

    #[test]
    fn test_push_assigns_sequential_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        assert_eq!(store.push_channel("log", b"first", 0).unwrap(), 1);
        assert_eq!(store.push_channel("log", b"second", 0).unwrap(), 2);
        assert_eq!(store.push_channel("other", b"x", 0).unwrap(), 1);

        assert_eq!(store.get_channel("log", 2).unwrap(), b"second");
        store.del_channel("log", 1).unwrap();
        assert!(matches!(store.get_channel("log", 1), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_channel_entries_skip_named_subkeys() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        store.push_channel("log", b"a", 0).unwrap();
        store.put_namespaced("log", "meta", b"m", 0).unwrap();
        store.push_channel("log", b"b", 0).unwrap();

        let entries: Vec<ChannelEntry> = store
            .channel_entries("log")
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            entries,
            vec![
                ChannelEntry { id: 1, value: b"a".to_vec() },
                ChannelEntry { id: 2, value: b"b".to_vec() },
            ]
        );
        assert_eq!(store.namespace_entries("log").unwrap().count(), 3);
    }

    #[test]
    fn test_ids_seed_past_named_subkeys() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = create_test_store(&temp_dir);
            for _ in 0..3 {
                store.push_channel("q", b"v", 0).unwrap();
            }
            // Sorts after every id key
            store.put_namespaced("q", "zzzzzzzzzz", b"v", 0).unwrap();
        }
        let store = create_test_store(&temp_dir);
        assert_eq!(store.push_channel("q", b"v", 0).unwrap(), 4);
    }

    #[test]
    fn test_namespaced_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        store.put_namespaced("users", "ana", b"1", 0).unwrap();
        assert_eq!(store.get_namespaced("users", "ana").unwrap(), b"1");
        assert!(store.exists(b"users-ana"));

        store.put_namespaced_object("users", "bo", &vec![1u8, 2], 0).unwrap();
        let back: Vec<u8> = store.get_namespaced_object("users", "bo").unwrap();
        assert_eq!(back, vec![1, 2]);

        store.del_namespaced("users", "ana").unwrap();
        assert!(!store.exists(b"users-ana"));
    }

    #[test]
    fn test_drop_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let store = create_test_store(&temp_dir);

        store.push_channel("tmp", b"1", 0).unwrap();
        store.push_channel("tmp", b"2", 0).unwrap();
        store.put_namespaced("tmp", "name", b"n", 0).unwrap();
        store.put(b"tmpfile", b"keep", 0).unwrap();

        assert_eq!(store.drop_namespace("tmp").unwrap(), 3);
        assert_eq!(store.namespace_entries("tmp").unwrap().count(), 0);
        assert_eq!(store.get(b"tmpfile").unwrap(), b"keep");
        assert_eq!(store.drop_namespace("tmp").unwrap(), 0);

        // Ids restart once the channel is empty
        assert_eq!(store.push_channel("tmp", b"again", 0).unwrap(), 1);
    }

    #[test]
    fn test_push_rejects_oversize_channel() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings {
            ttl_enabled: false,
            max_kv_len: 12,
            ..Settings::with_data_dir(temp_dir.path().join("db"))
        };
        let store = Store::open(&settings).unwrap();

        assert_eq!(store.push_channel("abc", b"v", 0).unwrap(), 1);
        assert!(matches!(
            store.push_channel("abcd", b"v", 0),
            Err(StoreError::KeyTooLong { len: 13, max: 12 })
        ));
    }
}
