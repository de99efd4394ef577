//! In-memory store backed by a `DashMap` of encoded records.
//!
//! Records are kept as bincode bytes so nothing the caller holds aliases
//! stored data, the same as a real backend. Fault injection (failures and
//! latency) lets tests exercise the persistence error paths.

use super::{BikeStore, StoreError};
use crate::core::BikeId;
use crate::record::{BikeRecord, VersionedRecord};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming calls to fail with `Unavailable`.
    fail_next: usize,
    /// Delay before a put is applied.
    delay_before_write: Option<Duration>,
    /// Delay after a put is applied, before it is acknowledged.
    delay_after_write: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    records: DashMap<BikeId, (u64, Vec<u8>)>,
    faults: Mutex<Faults>,
    puts: AtomicU64,
}

/// Versioned in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls (get or put) with `Unavailable`.
    pub fn fail_next(&self, n: usize) {
        self.faults().fail_next = n;
    }

    /// Delay every put by `delay` before it is applied.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.faults().delay_before_write = delay;
    }

    /// Delay every put by `delay` after it is applied but before it returns.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.faults().delay_after_write = delay;
    }

    /// Number of successful puts so far.
    pub fn put_count(&self) -> u64 {
        self.inner.puts.load(Ordering::SeqCst)
    }

    pub fn version_of(&self, bike_id: &BikeId) -> Option<u64> {
        self.inner.records.get(bike_id).map(|entry| entry.0)
    }

    /// Write a record unconditionally, as an out-of-band writer would.
    pub fn overwrite(&self, record: &BikeRecord) -> Result<u64, StoreError> {
        let bytes = record.to_bytes()?;
        let mut entry = self
            .inner
            .records
            .entry(record.state.bike_id.clone())
            .or_insert((0, Vec::new()));
        entry.0 += 1;
        entry.1 = bytes;
        Ok(entry.0)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        // A panic while holding this lock leaves plain counters behind; keep going.
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        let mut faults = self.faults();
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BikeStore for MemoryStore {
    async fn get(&self, bike_id: &BikeId) -> Result<Option<VersionedRecord>, StoreError> {
        self.take_failure()?;

        let Some((version, bytes)) = self
            .inner
            .records
            .get(bike_id)
            .map(|entry| (entry.0, entry.1.clone()))
        else {
            return Ok(None);
        };

        let record = BikeRecord::from_bytes(&bytes)?;
        Ok(Some(VersionedRecord { version, record }))
    }

    async fn put(
        &self,
        bike_id: &BikeId,
        record: &BikeRecord,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.take_failure()?;
        let bytes = record.to_bytes()?;

        let before = self.faults().delay_before_write;
        if let Some(delay) = before {
            tokio::time::sleep(delay).await;
        }

        let version = match self.inner.records.entry(bike_id.clone()) {
            Entry::Occupied(mut entry) => {
                let found = entry.get().0;
                if expected_version != Some(found) {
                    return Err(StoreError::Conflict {
                        expected: expected_version,
                        found: Some(found),
                    });
                }
                entry.insert((found + 1, bytes));
                found + 1
            }
            Entry::Vacant(entry) => {
                if expected_version.is_some() {
                    return Err(StoreError::Conflict {
                        expected: expected_version,
                        found: None,
                    });
                }
                entry.insert((1, bytes));
                1
            }
        };
        self.inner.puts.fetch_add(1, Ordering::SeqCst);
        debug!(bike_id = %bike_id, version, "Stored bike record");

        let after = self.faults().delay_after_write;
        if let Some(delay) = after {
            tokio::time::sleep(delay).await;
        }
        Ok(version)
    }
}
