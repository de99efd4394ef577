//! Status transition history tracking.
//!
//! Provides immutable, bounded tracking of a bike's status changes over
//! time. The history lives in memory only; the durable record does not
//! carry it.

use super::status::BikeStatus;
use super::transition::Trigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of a single status change.
///
/// # Example
///
/// ```rust
/// use kickstand::core::{BikeStatus, StatusTransition, Trigger};
/// use chrono::Utc;
///
/// let transition = StatusTransition {
///     from: BikeStatus::Available,
///     to: BikeStatus::InUse,
///     cause: Trigger::Trip,
///     timestamp: Utc::now(),
/// };
/// assert_eq!(transition.to, BikeStatus::InUse);
/// ```
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct StatusTransition {
    /// The status being transitioned from
    pub from: BikeStatus,
    /// The status being transitioned to
    pub to: BikeStatus,
    /// Which path performed the change
    pub cause: Trigger,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
}

/// Ordered history of status transitions, keeping at most `capacity` entries.
///
/// History is immutable - the `record` method returns a new history
/// with the transition added and the oldest entries dropped.
///
/// # Example
///
/// ```rust
/// use kickstand::core::{BikeStatus, StatusHistory, StatusTransition, Trigger};
/// use chrono::Utc;
///
/// let history = StatusHistory::with_capacity(16);
///
/// let history = history.record(StatusTransition {
///     from: BikeStatus::Available,
///     to: BikeStatus::InUse,
///     cause: Trigger::Trip,
///     timestamp: Utc::now(),
/// });
///
/// let history = history.record(StatusTransition {
///     from: BikeStatus::InUse,
///     to: BikeStatus::Available,
///     cause: Trigger::Trip,
///     timestamp: Utc::now(),
/// });
///
/// assert_eq!(history.transitions().len(), 2);
/// assert_eq!(history.last().unwrap().to, BikeStatus::Available);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusHistory {
    capacity: usize,
    transitions: Vec<StatusTransition>,
}

impl Default for StatusHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Capacity used by [`StatusHistory::default`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

impl StatusHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            transitions: Vec::new(),
        }
    }

    /// Record a transition, returning a new history.
    ///
    /// This does not mutate the existing history. When the capacity is
    /// exceeded the oldest transitions are dropped.
    pub fn record(&self, transition: StatusTransition) -> Self {
        let mut transitions = self.transitions.clone();
        transitions.push(transition);
        if transitions.len() > self.capacity {
            let excess = transitions.len() - self.capacity;
            transitions.drain(..excess);
        }
        Self {
            capacity: self.capacity,
            transitions,
        }
    }

    /// Get all retained transitions, oldest first.
    pub fn transitions(&self) -> &[StatusTransition] {
        &self.transitions
    }

    pub fn last(&self) -> Option<&StatusTransition> {
        self.transitions.last()
    }
}
