//! Telemetry readings from a bike's onboard unit.
//!
//! Readings may arrive at any time, out of order, or more than once. Each
//! carries a sequence number assigned by the onboard unit; the state machine
//! applies a reading only if its sequence is newer than the last applied one.

pub mod validation;

pub use validation::{validate_position, validate_reading, ReadingViolation};

use crate::core::{BikeStatus, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One report from a vehicle.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Monotonic per-bike sequence number; ordering key for last-writer-wins.
    pub sequence: u64,
    pub position: Position,
    /// Battery percentage, `0..=100`.
    pub battery: u8,
    pub speed_kmh: f64,
    /// Status the vehicle reports for itself, e.g. `Maintenance` on a fault.
    pub status_hint: Option<BikeStatus>,
    pub recorded_at: DateTime<Utc>,
}

impl TelemetryReading {
    /// A stationary reading recorded now, without a status hint.
    pub fn new(sequence: u64, position: Position, battery: u8) -> Self {
        Self {
            sequence,
            position,
            battery,
            speed_kmh: 0.0,
            status_hint: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_status_hint(mut self, status: BikeStatus) -> Self {
        self.status_hint = Some(status);
        self
    }

    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = speed_kmh;
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = at;
        self
    }
}

/// What happened to a reading.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum TelemetryOutcome {
    /// Sequence not newer than `last_applied`; nothing changed.
    Stale { last_applied: u64 },

    /// Position, speed and battery were taken from the reading.
    Applied {
        /// The status hint moved the bike to this status.
        status_changed_to: Option<BikeStatus>,
        /// The status hint was present but no telemetry rule allowed it.
        ignored_hint: Option<BikeStatus>,
    },
}

impl TelemetryOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, TelemetryOutcome::Stale { .. })
    }
}
