//! Per-key expiration index.
//!
//! Each scheduled key has two records, always written and removed in the
//! same batch:
//! - `ttl`: `{key}` -> `{deadline_ms:be64}`
//! - `ttl_deadlines`: `{deadline_ms:be64}{key}` -> empty
//!
//! The second family is ordered by deadline, so a sweep reads only the
//! prefix of records that are due.
//!
//! State per key: `NoTTL -> Scheduled(deadline) -> Expired`. Every
//! transition, foreground or sweep, happens under the key's lock stripe.
//! Primary writes of a TTL-enabled store take the same stripe and commit
//! their schedule in the same batch, so a schedule never outlives its key.

use rocksdb::WriteBatch;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::batch::BatchOp;
use crate::column_families::{CF_PRIMARY, CF_TTL, CF_TTL_DEADLINES};
use crate::engine::Engine;
use crate::error::{display_key, StoreError};

/// TTL value that cancels an existing schedule in [`TtlIndex::set_ttl`]
pub const CANCEL_TTL: i64 = -1;

const LOCK_STRIPES: usize = 64;

/// Upper bound on keys expired in one sweep; the rest wait for the next tick
const SWEEP_BATCH_LIMIT: usize = 4096;

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn encode_deadline(deadline_ms: i64) -> [u8; 8] {
    (deadline_ms.max(0) as u64).to_be_bytes()
}

fn decode_deadline(bytes: &[u8]) -> Option<i64> {
    <[u8; 8]>::try_from(bytes)
        .ok()
        .map(|b| u64::from_be_bytes(b) as i64)
}

fn deadline_key(deadline_ms: i64, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + key.len());
    out.extend_from_slice(&encode_deadline(deadline_ms));
    out.extend_from_slice(key);
    out
}

/// A key removed by the sweeper, with the value it held
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Outcome of one sweep pass
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Keys expired and deleted in this pass
    pub expired: Vec<ExpiredEntry>,
    /// Index records dropped because their key or schedule was already gone
    pub stale: usize,
    /// Keys whose expiration failed; retried next pass
    pub failed: usize,
}

/// Expiration index over an [`Engine`]
pub struct TtlIndex {
    engine: Arc<Engine>,
    stripes: Vec<Mutex<()>>,
}

impl TtlIndex {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_of(key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % LOCK_STRIPES
    }

    fn lock_stripe(&self, stripe: usize) -> MutexGuard<'_, ()> {
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the stripe owning `key`
    fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.lock_stripe(Self::stripe_of(key))
    }

    fn deadline_of(&self, key: &[u8]) -> Result<Option<i64>, StoreError> {
        Ok(self
            .engine
            .get_cf(CF_TTL, key)?
            .and_then(|bytes| decode_deadline(&bytes)))
    }

    fn stage_removal(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        deadline_ms: i64,
    ) -> Result<(), StoreError> {
        batch.delete_cf(self.engine.cf(CF_TTL)?, key);
        batch.delete_cf(
            self.engine.cf(CF_TTL_DEADLINES)?,
            deadline_key(deadline_ms, key),
        );
        Ok(())
    }

    /// Stage a deadline `seconds` from now in place of `previous`
    fn stage_schedule(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        previous: Option<i64>,
        seconds: u64,
    ) -> Result<i64, StoreError> {
        let deadline = now_ms().saturating_add(seconds.saturating_mul(1000) as i64);
        if let Some(previous) = previous {
            self.stage_removal(batch, key, previous)?;
        }
        batch.put_cf(self.engine.cf(CF_TTL)?, key, encode_deadline(deadline));
        batch.put_cf(
            self.engine.cf(CF_TTL_DEADLINES)?,
            deadline_key(deadline, key),
            b"",
        );
        Ok(deadline)
    }

    /// Write a new deadline, replacing any previous one. Caller holds the stripe.
    fn schedule_locked(&self, key: &[u8], seconds: u64) -> Result<i64, StoreError> {
        let mut batch = WriteBatch::default();
        let deadline = self.stage_schedule(&mut batch, key, self.deadline_of(key)?, seconds)?;
        self.engine.write(batch)?;
        debug!(key = %display_key(key), deadline_ms = deadline, "Scheduled expiration");
        Ok(deadline)
    }

    /// Remove any schedule. Caller holds the stripe.
    fn cancel_locked(&self, key: &[u8]) -> Result<bool, StoreError> {
        let Some(deadline) = self.deadline_of(key)? else {
            return Ok(false);
        };
        let mut batch = WriteBatch::default();
        self.stage_removal(&mut batch, key, deadline)?;
        self.engine.write(batch)?;
        debug!(key = %display_key(key), "Cancelled expiration");
        Ok(true)
    }

    /// Schedule an existing `key` to expire `seconds` from now.
    ///
    /// Returns the deadline in Unix ms, or `NotFound` if the key is gone.
    pub fn schedule(&self, key: &[u8], seconds: u64) -> Result<i64, StoreError> {
        let _guard = self.lock(key);
        if !self.engine.exists(key)? {
            return Err(StoreError::NotFound(display_key(key)));
        }
        self.schedule_locked(key, seconds)
    }

    /// Write a primary entry under its stripe.
    ///
    /// With `ttl > 0` (seconds) the value and its new schedule commit in one
    /// batch; otherwise any existing schedule is left as it is.
    pub fn put_entry(&self, key: &[u8], value: &[u8], ttl: i64) -> Result<(), StoreError> {
        let _guard = self.lock(key);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.engine.cf(CF_PRIMARY)?, key, value);
        if ttl > 0 {
            let previous = self.deadline_of(key)?;
            let deadline = self.stage_schedule(&mut batch, key, previous, ttl as u64)?;
            debug!(key = %display_key(key), deadline_ms = deadline, "Scheduled expiration");
        }
        self.engine.write(batch)
    }

    /// Commit `ops` and their expiration changes as one batch.
    ///
    /// Holds the stripe of every key for the duration, taken in ascending
    /// order. Returns the number of schedules written or removed.
    pub fn write_batch(&self, ops: &[BatchOp]) -> Result<usize, StoreError> {
        let stripes: BTreeSet<usize> = ops.iter().map(|op| Self::stripe_of(op.key())).collect();
        let _guards: Vec<MutexGuard<'_, ()>> =
            stripes.into_iter().map(|stripe| self.lock_stripe(stripe)).collect();

        let primary = self.engine.cf(CF_PRIMARY)?;
        let mut batch = WriteBatch::default();
        // Deadline each key will have once the ops staged so far commit
        let mut pending: HashMap<&[u8], Option<i64>> = HashMap::new();
        let mut ttl_changes = 0usize;

        for op in ops {
            let key = op.key();
            let previous = match pending.get(key) {
                Some(deadline) => *deadline,
                None => self.deadline_of(key)?,
            };
            let next = match op {
                BatchOp::Put { value, ttl, .. } => {
                    batch.put_cf(primary, key, value);
                    if *ttl > 0 {
                        ttl_changes += 1;
                        Some(self.stage_schedule(&mut batch, key, previous, *ttl as u64)?)
                    } else {
                        previous
                    }
                }
                BatchOp::Delete { .. } => {
                    batch.delete_cf(primary, key);
                    if let Some(previous) = previous {
                        ttl_changes += 1;
                        self.stage_removal(&mut batch, key, previous)?;
                    }
                    None
                }
            };
            pending.insert(key, next);
        }

        self.engine.write(batch)?;
        Ok(ttl_changes)
    }

    /// Set or cancel the TTL of an existing key.
    ///
    /// `ttl > 0` schedules expiration `ttl` seconds from now; [`CANCEL_TTL`]
    /// removes the schedule. Anything else is `InvalidArgument`. The key must
    /// exist in the primary store, checked under the same lock the sweeper
    /// takes before deleting it.
    pub fn set_ttl(&self, key: &[u8], ttl: i64) -> Result<(), StoreError> {
        if ttl <= 0 && ttl != CANCEL_TTL {
            return Err(StoreError::InvalidArgument(format!(
                "ttl must be > 0 (or {} to cancel), got {}",
                CANCEL_TTL, ttl
            )));
        }

        let _guard = self.lock(key);
        if !self.engine.exists(key)? {
            return Err(StoreError::NotFound(display_key(key)));
        }
        if ttl == CANCEL_TTL {
            self.cancel_locked(key)?;
        } else {
            self.schedule_locked(key, ttl as u64)?;
        }
        Ok(())
    }

    /// Remove any schedule for `key`. Returns whether one existed.
    pub fn cancel(&self, key: &[u8]) -> Result<bool, StoreError> {
        let _guard = self.lock(key);
        self.cancel_locked(key)
    }

    /// Time left before `key` expires; zero if due but not yet swept
    pub fn remaining(&self, key: &[u8]) -> Result<Duration, StoreError> {
        match self.deadline_of(key)? {
            Some(deadline) => {
                let left = deadline.saturating_sub(now_ms()).max(0);
                Ok(Duration::from_millis(left as u64))
            }
            None => Err(StoreError::TtlNotFound(display_key(key))),
        }
    }

    pub fn is_scheduled(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.deadline_of(key)?.is_some())
    }

    /// Delete a primary entry together with its schedule, atomically
    pub fn delete_entry(&self, key: &[u8]) -> Result<(), StoreError> {
        let _guard = self.lock(key);
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.engine.cf(CF_PRIMARY)?, key);
        if let Some(deadline) = self.deadline_of(key)? {
            self.stage_removal(&mut batch, key, deadline)?;
        }
        self.engine.write(batch)
    }

    /// Number of keys with an active schedule
    pub fn scheduled_count(&self) -> Result<u64, StoreError> {
        self.engine.count(CF_TTL)
    }

    /// Expire every key whose deadline is `<= now`.
    ///
    /// Per-key failures are logged and counted; the key stays in the index
    /// and is retried on the next pass.
    pub fn sweep(&self, now: i64) -> Result<SweepReport, StoreError> {
        let mut due = Vec::new();
        let mut malformed = Vec::new();
        for item in self.engine.iter_from(CF_TTL_DEADLINES, None)? {
            let (index_key, _) = item?;
            let Some(deadline) = index_key.get(..8).and_then(decode_deadline) else {
                malformed.push(index_key);
                continue;
            };
            if deadline > now || due.len() >= SWEEP_BATCH_LIMIT {
                break;
            }
            due.push((deadline, index_key[8..].to_vec()));
        }

        let mut report = SweepReport::default();
        if !malformed.is_empty() {
            warn!(count = malformed.len(), "Dropping malformed expiration records");
            let cf = self.engine.cf(CF_TTL_DEADLINES)?;
            let mut batch = WriteBatch::default();
            for index_key in &malformed {
                batch.delete_cf(cf, index_key);
            }
            self.engine.write(batch)?;
            report.stale += malformed.len();
        }

        for (deadline, key) in due {
            match self.expire_one(&key, deadline) {
                Ok(Some(entry)) => report.expired.push(entry),
                Ok(None) => report.stale += 1,
                Err(StoreError::Closed) => return Err(StoreError::Closed),
                Err(e) => {
                    warn!(key = %display_key(&key), error = %e, "Failed to expire key");
                    report.failed += 1;
                }
            }
        }

        if !report.expired.is_empty() || report.failed > 0 {
            debug!(
                expired = report.expired.len(),
                stale = report.stale,
                failed = report.failed,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    fn expire_one(&self, key: &[u8], deadline: i64) -> Result<Option<ExpiredEntry>, StoreError> {
        let _guard = self.lock(key);
        let mut batch = WriteBatch::default();

        if self.deadline_of(key)? != Some(deadline) {
            // Rescheduled or cancelled since the scan; drop the orphaned index entry
            batch.delete_cf(
                self.engine.cf(CF_TTL_DEADLINES)?,
                deadline_key(deadline, key),
            );
            self.engine.write(batch)?;
            return Ok(None);
        }

        let value = self.engine.get(key)?;
        batch.delete_cf(self.engine.cf(CF_PRIMARY)?, key);
        self.stage_removal(&mut batch, key, deadline)?;
        self.engine.write(batch)?;

        Ok(value.map(|value| ExpiredEntry {
            key: key.to_vec(),
            value,
        }))
    }
}
