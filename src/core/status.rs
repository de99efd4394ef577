//! Operational status of a bike.
//!
//! The status is a closed set of five variants. Every branch on it in this
//! crate is an exhaustive `match`, so adding a variant is a compile error
//! everywhere the lifecycle cares about it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational status of a single bike.
///
/// # Example
///
/// ```rust
/// use kickstand::core::BikeStatus;
///
/// let status = BikeStatus::Available;
/// assert_eq!(status.name(), "Available");
/// assert!(!status.is_final());
/// assert!(BikeStatus::Deactivated.is_final());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum BikeStatus {
    /// Parked and rentable.
    Available,
    /// Rented; an active trip exists.
    InUse,
    /// Docked on a charger.
    Charging,
    /// Pulled from service for repair or inspection.
    Maintenance,
    /// Permanently retired. No transition leaves this status.
    Deactivated,
}

impl BikeStatus {
    /// Every status, in declaration order.
    pub const ALL: [BikeStatus; 5] = [
        Self::Available,
        Self::InUse,
        Self::Charging,
        Self::Maintenance,
        Self::Deactivated,
    ];

    /// Get the status name for display/logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::InUse => "InUse",
            Self::Charging => "Charging",
            Self::Maintenance => "Maintenance",
            Self::Deactivated => "Deactivated",
        }
    }

    /// Check if this is the terminal status.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Deactivated)
    }

    /// Check if entering or leaving this status belongs to trip operations.
    ///
    /// Telemetry never moves a bike into or out of `InUse`.
    pub fn is_trip_controlled(&self) -> bool {
        match self {
            Self::InUse => true,
            Self::Available | Self::Charging | Self::Maintenance | Self::Deactivated => false,
        }
    }
}

impl fmt::Display for BikeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
