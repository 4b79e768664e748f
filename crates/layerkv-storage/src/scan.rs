//! Lazy scans over the primary key space.
//!
//! Each iterator owns a RocksDB iterator borrowed from the engine and stops
//! at the first key outside its bound. Dropping the iterator early releases
//! the underlying snapshot.

use std::marker::PhantomData;

use regex::bytes::Regex;
use rocksdb::DBIterator;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec::ObjectCodec;
use crate::column_families::CF_PRIMARY;
use crate::engine::Engine;
use crate::error::{display_key, StoreError};

/// A raw key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A key with its decoded value
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry<T> {
    pub key: Vec<u8>,
    pub object: T,
}

/// Where a scan stops
#[derive(Debug, Clone)]
pub(crate) enum Bound {
    Unbounded,
    Prefix(Vec<u8>),
    /// Inclusive upper key
    Through(Vec<u8>),
}

impl Bound {
    fn admits(&self, key: &[u8]) -> bool {
        match self {
            Bound::Unbounded => true,
            Bound::Prefix(prefix) => key.starts_with(prefix),
            Bound::Through(max) => key <= max.as_slice(),
        }
    }
}

/// Ascending iterator of [`Entry`] values
pub struct ScanIter<'a> {
    inner: DBIterator<'a>,
    bound: Bound,
    done: bool,
}

impl<'a> ScanIter<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        start: Option<&[u8]>,
        bound: Bound,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            inner: engine.iter_from(CF_PRIMARY, start)?,
            bound,
            done: false,
        })
    }

    pub(crate) fn full(engine: &'a Engine) -> Result<Self, StoreError> {
        Self::new(engine, None, Bound::Unbounded)
    }

    pub(crate) fn prefix(engine: &'a Engine, prefix: &[u8]) -> Result<Self, StoreError> {
        Self::new(engine, Some(prefix), Bound::Prefix(prefix.to_vec()))
    }

    pub(crate) fn range(engine: &'a Engine, min: &[u8], max: &[u8]) -> Result<Self, StoreError> {
        Self::new(engine, Some(min), Bound::Through(max.to_vec()))
    }
}

impl Iterator for ScanIter<'_> {
    type Item = Result<Entry, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next()? {
            Ok((key, value)) => {
                if !self.bound.admits(&key) {
                    self.done = true;
                    return None;
                }
                Some(Ok(Entry {
                    key: key.into_vec(),
                    value: value.into_vec(),
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Ascending iterator of keys only
pub struct KeyIter<'a> {
    inner: ScanIter<'a>,
}

impl<'a> KeyIter<'a> {
    pub(crate) fn new(inner: ScanIter<'a>) -> Self {
        Self { inner }
    }
}

impl Iterator for KeyIter<'_> {
    type Item = Result<Vec<u8>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| item.map(|entry| entry.key))
    }
}

/// Keys matching a pattern, in key order
pub struct MatchingKeys<'a> {
    inner: KeyIter<'a>,
    pattern: &'a Regex,
}

impl<'a> MatchingKeys<'a> {
    pub(crate) fn new(inner: KeyIter<'a>, pattern: &'a Regex) -> Self {
        Self { inner, pattern }
    }
}

impl Iterator for MatchingKeys<'_> {
    type Item = Result<Vec<u8>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(key) if !self.pattern.is_match(&key) => continue,
                item => return Some(item),
            }
        }
    }
}

/// Iterator that decodes each value, omitting entries that fail to decode.
///
/// Engine errors are still yielded as `Err`.
pub struct ObjectIter<'a, T, C: ObjectCodec> {
    inner: ScanIter<'a>,
    codec: &'a C,
    skipped: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, C: ObjectCodec> ObjectIter<'a, T, C> {
    pub(crate) fn new(inner: ScanIter<'a>, codec: &'a C) -> Self {
        Self {
            inner,
            codec,
            skipped: 0,
            _marker: PhantomData,
        }
    }

    /// Entries omitted so far because they did not decode
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<T: DeserializeOwned, C: ObjectCodec> Iterator for ObjectIter<'_, T, C> {
    type Item = Result<ObjectEntry<T>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            match self.codec.decode::<T>(&entry.value) {
                Ok(object) => {
                    return Some(Ok(ObjectEntry {
                        key: entry.key,
                        object,
                    }))
                }
                Err(e) => {
                    debug!(key = %display_key(&entry.key), error = %e, "Skipping undecodable value");
                    self.skipped += 1;
                }
            }
        }
    }
}

impl<T, C: ObjectCodec> Drop for ObjectIter<'_, T, C> {
    fn drop(&mut self) {
        if self.skipped > 0 {
            debug!(skipped = self.skipped, "Object scan omitted undecodable entries");
        }
    }
}
