//! Guard predicates for controlling status transitions.
//!
//! Guards are pure boolean functions over a bike's state that determine
//! whether a transition rule may fire. They carry a short description so a
//! rejected transition can say which precondition failed.

use super::bike::BikeState;
use std::fmt;
use std::sync::Arc;

/// Pure predicate that determines if a transition can execute.
///
/// # Example
///
/// ```rust
/// use kickstand::core::{BikeState, Guard, Position};
///
/// let charged = Guard::new("battery at least 20%", |bike: &BikeState| bike.battery >= 20);
///
/// let mut bike = BikeState::register("bike-1", "Karlskrona", Position::new(56.18, 15.59));
/// assert!(charged.check(&bike));
///
/// bike.battery = 10;
/// assert!(!charged.check(&bike));
/// assert_eq!(charged.description(), "battery at least 20%");
/// ```
#[derive(Clone)]
pub struct Guard {
    description: String,
    predicate: Arc<dyn Fn(&BikeState) -> bool + Send + Sync>,
}

impl Guard {
    /// Create a guard from a pure predicate function.
    ///
    /// The predicate must be deterministic and thread-safe (Send + Sync).
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&BikeState) -> bool + Send + Sync + 'static,
    {
        Guard {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Guard requiring at least `percent` battery.
    pub fn min_battery(percent: u8) -> Self {
        Self::new(format!("battery at least {percent}%"), move |bike| {
            bike.battery >= percent
        })
    }

    /// Check if the guard allows a transition from this bike state.
    pub fn check(&self, bike: &BikeState) -> bool {
        (self.predicate)(bike)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
