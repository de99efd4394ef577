//! Core bike lifecycle types and logic.
//!
//! This module contains the pure functional core of the engine:
//! - Status definitions and the explicit transition table
//! - Guard predicates for transition control
//! - Bike state with pure, all-or-nothing transition functions
//! - Trips, positions and immutable status history
//!
//! Nothing in this module performs I/O or takes locks; the async shell in
//! [`crate::machine`] does that.

mod bike;
mod guard;
mod history;
mod ids;
mod position;
mod status;
mod transition;
mod trip;

pub use bike::{BikeState, Forced, ReadingStep, TripEnd};
pub use guard::Guard;
pub use history::{StatusHistory, StatusTransition, DEFAULT_HISTORY_CAPACITY};
pub use ids::{BikeId, OwnerId, TripId, UserId};
pub use position::Position;
pub use status::BikeStatus;
pub use transition::{Denial, TransitionRule, TransitionTable, Trigger};
pub use trip::{ActiveTrip, TripLog, TripSummary};
