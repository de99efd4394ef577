//! Error taxonomy for lifecycle operations.
//!
//! Every failure is returned as a value. No variant implies that in-memory
//! state was partially changed: an operation either commits all of its
//! effects or none.

use crate::core::{BikeId, BikeStatus, TripId};
use crate::record::RecordError;
use crate::telemetry::ReadingViolation;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by bike and fleet operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested transition is not allowed from the current status.
    #[error("bike '{bike_id}' cannot {operation} while {status}: {reason}")]
    InvalidState {
        bike_id: BikeId,
        operation: &'static str,
        status: BikeStatus,
        reason: String,
    },

    /// The store was unreachable, failed, or did not answer in time.
    #[error("persistence failed for bike '{bike_id}': {source}")]
    Persistence {
        bike_id: BikeId,
        #[source]
        source: PersistenceError,
    },

    /// The durable record changed underneath us.
    #[error("version conflict on bike '{bike_id}': expected {expected:?}, store has {found:?}")]
    Conflict {
        bike_id: BikeId,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// A trip would end before it started.
    #[error("trip {trip_id} ends at {ended_at} before its start at {started_at}")]
    ClockSkew {
        trip_id: TripId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },

    /// A telemetry reading failed validation; all violations are listed.
    #[error("telemetry for bike '{bike_id}' rejected: {}", describe(.violations))]
    InvalidReading {
        bike_id: BikeId,
        violations: Vec<ReadingViolation>,
    },

    /// A trip operation reported a position outside the valid range.
    #[error("bike '{bike_id}' cannot {operation} at an invalid position: {}", describe(.violations))]
    InvalidPosition {
        bike_id: BikeId,
        operation: &'static str,
        violations: Vec<ReadingViolation>,
    },

    #[error("bike '{0}' not found")]
    NotFound(BikeId),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Store-level failures surfaced through [`Error::Persistence`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PersistenceError {
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Whether retrying (possibly after a re-read) can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::InvalidState { .. } | Error::Persistence { .. } | Error::Conflict { .. } => {
                true
            }
            Error::ClockSkew { .. }
            | Error::InvalidReading { .. }
            | Error::InvalidPosition { .. }
            | Error::NotFound(_)
            | Error::Record(_) => false,
        }
    }

    pub(crate) fn invalid_state(
        bike_id: &BikeId,
        operation: &'static str,
        status: BikeStatus,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidState {
            bike_id: bike_id.clone(),
            operation,
            status,
            reason: reason.into(),
        }
    }
}

fn describe(violations: &[ReadingViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
