//! Trips: the active rental and the summaries of finished ones.

use super::ids::{BikeId, TripId, UserId};
use super::position::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// The rental currently in progress on a bike.
///
/// `start_position` and `start_time` are captured once when the trip starts
/// and never change afterwards.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ActiveTrip {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub start_position: Position,
    pub start_time: DateTime<Utc>,
}

impl ActiveTrip {
    /// Elapsed time of the trip at `now`. Zero if `now` precedes the start.
    pub fn session_time(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Record of a finished trip, handed to billing/logging collaborators.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: TripId,
    pub bike_id: BikeId,
    pub user_id: UserId,
    pub start_position: Position,
    pub end_position: Position,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
    /// Straight-line distance between start and end.
    pub distance_km: f64,
}

/// Bounded log of the most recent trip summaries of one bike, oldest first.
///
/// The log is what makes `end_trip` idempotent: a retried call finds its
/// summary here by trip id.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct TripLog {
    entries: VecDeque<TripSummary>,
}

impl TripLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a summary, evicting the oldest entries beyond `capacity`.
    ///
    /// A capacity of zero is treated as one: the latest trip is always kept.
    pub fn push(&mut self, summary: TripSummary, capacity: usize) {
        self.entries.push_back(summary);
        while self.entries.len() > capacity.max(1) {
            self.entries.pop_front();
        }
    }

    pub fn find(&self, trip_id: &TripId) -> Option<&TripSummary> {
        self.entries.iter().rev().find(|s| &s.trip_id == trip_id)
    }

    pub fn last(&self) -> Option<&TripSummary> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TripSummary> {
        self.entries.iter()
    }
}
