//! Durable bike records.
//!
//! A record is what the store keeps for a bike: the full [`BikeState`]
//! (including the trip log, so end-trip retries stay idempotent across
//! restarts) plus a format version. Records encode to bincode for storage
//! and to JSON for diagnostics. Decoding always validates.

use crate::core::BikeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;

pub use error::RecordError;

/// Version identifier for the record format
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// Serializable durable form of one bike.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BikeRecord {
    /// Record format version
    pub format_version: u32,

    /// When this record was produced
    pub written_at: DateTime<Utc>,

    /// The bike
    pub state: BikeState,
}

/// A record together with the store's optimistic version token.
#[derive(Clone, PartialEq, Debug)]
pub struct VersionedRecord {
    pub version: u64,
    pub record: BikeRecord,
}

impl BikeRecord {
    pub fn new(state: BikeState) -> Self {
        Self {
            format_version: RECORD_FORMAT_VERSION,
            written_at: Utc::now(),
            state,
        }
    }

    /// Check the format version and the bike invariants.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.format_version != RECORD_FORMAT_VERSION {
            return Err(RecordError::UnsupportedVersion {
                found: self.format_version,
                supported: RECORD_FORMAT_VERSION,
            });
        }
        self.state
            .check_invariants()
            .map_err(RecordError::ValidationFailed)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        bincode::serialize(self).map_err(|e| RecordError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: Self = bincode::deserialize(bytes)
            .map_err(|e| RecordError::DeserializationFailed(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RecordError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_str(json)
            .map_err(|e| RecordError::DeserializationFailed(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    pub fn into_state(self) -> BikeState {
        self.state
    }
}
