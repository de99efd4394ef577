//! Durable store interface.
//!
//! The store is the source of truth across process restarts. It is treated
//! as an opaque key-value map from bike id to [`BikeRecord`] with an
//! optimistic version token: every write names the version it was based
//! on, and the store rejects it if someone else wrote in between.

mod memory;

pub use memory::MemoryStore;

use crate::core::BikeId;
use crate::record::{BikeRecord, RecordError, VersionedRecord};
use async_trait::async_trait;
use thiserror::Error;

/// Errors a store backend can report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `expected` did not match the stored version (`None` = absent).
    #[error("version conflict: expected {expected:?}, found {found:?}")]
    Conflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Versioned key-value store for bike records.
#[async_trait]
pub trait BikeStore: Send + Sync + std::fmt::Debug + 'static {
    /// Fetch the current record and its version, `None` if never written.
    async fn get(&self, bike_id: &BikeId) -> Result<Option<VersionedRecord>, StoreError>;

    /// Write `record` if the stored version equals `expected_version`.
    ///
    /// `None` means the record must not exist yet (registration). Returns
    /// the new version.
    async fn put(
        &self,
        bike_id: &BikeId,
        record: &BikeRecord,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;
}
