//! Pure bike state and its transitions.
//!
//! Every function here takes `&self` and returns a new `BikeState` (or an
//! error) without touching the original, so the async shell in
//! [`crate::machine`] can persist the candidate state first and only then
//! commit it.

use super::ids::{BikeId, OwnerId, TripId, UserId};
use super::position::Position;
use super::status::BikeStatus;
use super::transition::{TransitionTable, Trigger};
use super::trip::{ActiveTrip, TripLog, TripSummary};
use crate::error::{Error, Result};
use crate::telemetry::{validation, TelemetryReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything known about one bike at one point in time.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BikeState {
    pub bike_id: BikeId,
    pub owner_id: OwnerId,
    pub status: BikeStatus,
    pub position: Position,
    pub battery: u8,
    pub speed_kmh: f64,
    pub active_trip: Option<ActiveTrip>,
    pub trip_log: TripLog,
    pub last_telemetry_seq: Option<u64>,
}

/// Result of [`BikeState::finish_trip`].
#[derive(Clone, PartialEq, Debug)]
pub enum TripEnd {
    Ended {
        next: BikeState,
        summary: TripSummary,
    },
    /// The trip was ended earlier; this is its original summary.
    AlreadyEnded(TripSummary),
}

/// Result of [`BikeState::apply_reading`].
#[derive(Clone, PartialEq, Debug)]
pub enum ReadingStep {
    Stale {
        last_applied: u64,
    },
    Apply {
        next: BikeState,
        status_changed_to: Option<BikeStatus>,
        ignored_hint: Option<BikeStatus>,
    },
}

/// Result of [`BikeState::forced`].
#[derive(Clone, PartialEq, Debug)]
pub struct Forced {
    pub next: BikeState,
    pub previous: BikeStatus,
    /// Summary of the trip closed because the bike was forced out of `InUse`.
    pub closed_trip: Option<TripSummary>,
}

impl BikeState {
    /// A freshly registered bike: available, fully charged, at the depot.
    pub fn register(
        bike_id: impl Into<BikeId>,
        owner_id: impl Into<OwnerId>,
        depot: Position,
    ) -> Self {
        Self {
            bike_id: bike_id.into(),
            owner_id: owner_id.into(),
            status: BikeStatus::Available,
            position: depot,
            battery: 100,
            speed_kmh: 0.0,
            active_trip: None,
            trip_log: TripLog::new(),
            last_telemetry_seq: None,
        }
    }

    /// Verify the structural invariants, describing the first one broken.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        match (self.status, &self.active_trip) {
            (BikeStatus::InUse, None) => return Err("InUse bike has no active trip".into()),
            (BikeStatus::InUse, Some(_)) => {}
            (
                BikeStatus::Available
                | BikeStatus::Charging
                | BikeStatus::Maintenance
                | BikeStatus::Deactivated,
                Some(trip),
            ) => {
                return Err(format!(
                    "{} bike carries active trip {}",
                    self.status, trip.trip_id
                ))
            }
            (_, None) => {}
        }
        if self.battery > 100 {
            return Err(format!("battery {}% above 100%", self.battery));
        }
        if !self.position.is_valid() {
            return Err(format!("position {:?} out of range", self.position));
        }
        if let Some(trip) = &self.active_trip {
            if !trip.start_position.is_valid() {
                return Err(format!(
                    "trip {} start position {:?} out of range",
                    trip.trip_id, trip.start_position
                ));
            }
        }
        Ok(())
    }

    /// Start a trip for `user_id`. Returns the next state and the new trip.
    pub fn begin_trip(
        &self,
        table: &TransitionTable,
        user_id: UserId,
        at_position: Position,
        at_time: DateTime<Utc>,
    ) -> Result<(BikeState, ActiveTrip)> {
        self.check_position("start trip", &at_position)?;
        if let Some(active) = &self.active_trip {
            return Err(Error::invalid_state(
                &self.bike_id,
                "start trip",
                self.status,
                format!("trip {} is already active", active.trip_id),
            ));
        }
        table
            .check(self, BikeStatus::InUse, Trigger::Trip)
            .map_err(|denial| {
                Error::invalid_state(
                    &self.bike_id,
                    "start trip",
                    self.status,
                    denial.describe(self.status, BikeStatus::InUse),
                )
            })?;

        let trip = ActiveTrip {
            trip_id: TripId::generate(),
            user_id,
            start_position: Position {
                latitude: at_position.latitude,
                longitude: at_position.longitude,
            },
            start_time: at_time,
        };

        let mut next = self.clone();
        next.status = BikeStatus::InUse;
        next.active_trip = Some(trip.clone());
        Ok((next, trip))
    }

    /// End trip `trip_id`, or return its summary if it already ended.
    pub fn finish_trip(
        &self,
        table: &TransitionTable,
        trip_id: TripId,
        at_position: Position,
        at_time: DateTime<Utc>,
        log_capacity: usize,
    ) -> Result<TripEnd> {
        if let Some(summary) = self.trip_log.find(&trip_id) {
            return Ok(TripEnd::AlreadyEnded(summary.clone()));
        }
        self.check_position("end trip", &at_position)?;

        let trip = match &self.active_trip {
            Some(trip) if trip.trip_id == trip_id => trip,
            Some(other) => {
                return Err(Error::invalid_state(
                    &self.bike_id,
                    "end trip",
                    self.status,
                    format!("trip {trip_id} is not active, trip {} is", other.trip_id),
                ))
            }
            None => {
                return Err(Error::invalid_state(
                    &self.bike_id,
                    "end trip",
                    self.status,
                    format!("no trip is active and trip {trip_id} is unknown"),
                ))
            }
        };
        table
            .check(self, BikeStatus::Available, Trigger::Trip)
            .map_err(|denial| {
                Error::invalid_state(
                    &self.bike_id,
                    "end trip",
                    self.status,
                    denial.describe(self.status, BikeStatus::Available),
                )
            })?;

        let summary = self.summarize(trip, at_position, at_time)?;

        let mut next = self.clone();
        next.status = BikeStatus::Available;
        next.active_trip = None;
        next.position = at_position;
        next.trip_log.push(summary.clone(), log_capacity);
        Ok(TripEnd::Ended { next, summary })
    }

    /// Fold a telemetry reading into the state.
    ///
    /// Position, speed and battery come from the reading; while a trip is
    /// active the battery can only go down. A status hint is honoured only
    /// when the table has a telemetry rule for it.
    pub fn apply_reading(
        &self,
        table: &TransitionTable,
        reading: &TelemetryReading,
    ) -> Result<ReadingStep> {
        if let Some(last_applied) = self.last_telemetry_seq {
            if reading.sequence <= last_applied {
                return Ok(ReadingStep::Stale { last_applied });
            }
        }

        let violations = validation::violations(reading);
        if !violations.is_empty() {
            return Err(Error::InvalidReading {
                bike_id: self.bike_id.clone(),
                violations,
            });
        }

        let mut next = self.clone();
        next.last_telemetry_seq = Some(reading.sequence);
        next.position = reading.position;
        next.speed_kmh = reading.speed_kmh;
        next.battery = match self.status {
            BikeStatus::InUse => self.battery.min(reading.battery),
            BikeStatus::Available
            | BikeStatus::Charging
            | BikeStatus::Maintenance
            | BikeStatus::Deactivated => reading.battery,
        };

        let mut status_changed_to = None;
        let mut ignored_hint = None;
        if let Some(hint) = reading.status_hint.filter(|h| *h != self.status) {
            if table.check(&next, hint, Trigger::Telemetry).is_ok() {
                next.status = hint;
                status_changed_to = Some(hint);
            } else {
                ignored_hint = Some(hint);
            }
        }

        Ok(ReadingStep::Apply {
            next,
            status_changed_to,
            ignored_hint,
        })
    }

    /// Reassign ownership.
    pub fn with_owner(&self, owner_id: OwnerId) -> Result<BikeState> {
        if self.status.is_final() {
            return Err(Error::invalid_state(
                &self.bike_id,
                "change owner",
                self.status,
                "deactivated bikes are read-only",
            ));
        }
        let mut next = self.clone();
        next.owner_id = owner_id;
        Ok(next)
    }

    /// Set the status without consulting the transition table.
    ///
    /// Still refuses what would break an invariant: leaving `Deactivated`,
    /// or entering `InUse` without a trip. Forcing a bike out of `InUse`
    /// closes its trip at the current position.
    pub fn forced(
        &self,
        status: BikeStatus,
        at_time: DateTime<Utc>,
        log_capacity: usize,
    ) -> Result<Forced> {
        let previous = self.status;
        if previous.is_final() && status != previous {
            return Err(Error::invalid_state(
                &self.bike_id,
                "force status",
                previous,
                "deactivated bikes accept no further transitions",
            ));
        }
        if status == BikeStatus::InUse && previous != BikeStatus::InUse {
            return Err(Error::invalid_state(
                &self.bike_id,
                "force status",
                previous,
                "a bike cannot be forced into use without a trip",
            ));
        }

        let mut next = self.clone();
        let mut closed_trip = None;
        if let (Some(trip), true) = (&self.active_trip, status != BikeStatus::InUse) {
            let summary = self.summarize(trip, self.position, at_time)?;
            next.active_trip = None;
            next.trip_log.push(summary.clone(), log_capacity);
            closed_trip = Some(summary);
        }
        next.status = status;

        Ok(Forced {
            next,
            previous,
            closed_trip,
        })
    }

    fn check_position(&self, operation: &'static str, position: &Position) -> Result<()> {
        let violations = validation::position_violations(position);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidPosition {
                bike_id: self.bike_id.clone(),
                operation,
                violations,
            })
        }
    }

    fn summarize(
        &self,
        trip: &ActiveTrip,
        end_position: Position,
        end_time: DateTime<Utc>,
    ) -> Result<TripSummary> {
        let duration = end_time
            .signed_duration_since(trip.start_time)
            .to_std()
            .map_err(|_| Error::ClockSkew {
                trip_id: trip.trip_id,
                started_at: trip.start_time,
                ended_at: end_time,
            })?;

        Ok(TripSummary {
            trip_id: trip.trip_id,
            bike_id: self.bike_id.clone(),
            user_id: trip.user_id.clone(),
            start_position: trip.start_position,
            end_position,
            start_time: trip.start_time,
            end_time,
            duration,
            distance_km: trip.start_position.distance_km(&end_position),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn bike() -> BikeState {
        BikeState::register("b1", "Karlskrona", Position::new(56.18181, 15.59235))
    }

    fn table() -> TransitionTable {
        TransitionTable::standard(5)
    }

    #[test]
    fn registered_bike_is_available_and_consistent() {
        let bike = bike();
        assert_eq!(bike.status, BikeStatus::Available);
        assert_eq!(bike.battery, 100);
        assert!(bike.check_invariants().is_ok());
    }

    #[test]
    fn begin_trip_captures_latitude_and_longitude_independently() {
        let (next, trip) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();

        assert_eq!(trip.start_position.latitude, 56.0);
        assert_eq!(trip.start_position.longitude, 15.0);
        assert_eq!(next.status, BikeStatus::InUse);
        assert_eq!(next.active_trip, Some(trip));
        assert!(next.check_invariants().is_ok());
    }

    #[test]
    fn begin_trip_leaves_original_untouched() {
        let original = bike();
        let _ = original
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();
        assert_eq!(original, bike());
    }

    #[test]
    fn begin_trip_rejects_second_trip() {
        let (in_use, first) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();

        let err = in_use
            .begin_trip(&table(), UserId::from("u2"), Position::new(56.0, 15.0), t(1))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidState {
                status: BikeStatus::InUse,
                ..
            }
        ));
        assert_eq!(in_use.active_trip.unwrap().trip_id, first.trip_id);
    }

    #[test]
    fn begin_trip_rejects_low_battery() {
        let mut low = bike();
        low.battery = 3;

        let err = low
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap_err();

        match err {
            Error::InvalidState { reason, .. } => assert!(reason.contains("battery")),
            other => panic!("Expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn finish_trip_summarizes_and_logs() {
        let (in_use, trip) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();

        let end = in_use
            .finish_trip(&table(), trip.trip_id, Position::new(56.1, 15.1), t(600), 8)
            .unwrap();

        let TripEnd::Ended { next, summary } = end else {
            panic!("Expected Ended");
        };
        assert_eq!(summary.duration, Duration::from_secs(600));
        assert_eq!(summary.start_position, Position::new(56.0, 15.0));
        assert_eq!(summary.end_position, Position::new(56.1, 15.1));
        assert!(summary.distance_km > 10.0 && summary.distance_km < 15.0);
        assert_eq!(next.status, BikeStatus::Available);
        assert!(next.active_trip.is_none());
        assert_eq!(next.position, Position::new(56.1, 15.1));
        assert_eq!(next.trip_log.find(&trip.trip_id), Some(&summary));
        assert_eq!(next.battery, in_use.battery);
    }

    #[test]
    fn finish_trip_twice_returns_original_summary() {
        let (in_use, trip) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();
        let TripEnd::Ended { next, summary } = in_use
            .finish_trip(&table(), trip.trip_id, Position::new(56.1, 15.1), t(600), 8)
            .unwrap()
        else {
            panic!("Expected Ended");
        };

        let retry = next
            .finish_trip(&table(), trip.trip_id, Position::new(50.0, 10.0), t(900), 8)
            .unwrap();

        assert_eq!(retry, TripEnd::AlreadyEnded(summary));
    }

    #[test]
    fn finish_trip_before_start_is_clock_skew() {
        let (in_use, trip) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(100))
            .unwrap();

        let err = in_use
            .finish_trip(&table(), trip.trip_id, Position::new(56.1, 15.1), t(50), 8)
            .unwrap_err();

        assert!(matches!(err, Error::ClockSkew { .. }));
    }

    #[test]
    fn begin_trip_rejects_out_of_range_position() {
        let err = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(95.0, 15.0), t(0))
            .unwrap_err();

        match err {
            Error::InvalidPosition { violations, .. } => assert_eq!(violations.len(), 1),
            other => panic!("Expected InvalidPosition, got {other:?}"),
        }
    }

    #[test]
    fn finish_trip_rejects_unusable_position() {
        let (in_use, trip) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();

        let err = in_use
            .finish_trip(
                &table(),
                trip.trip_id,
                Position::new(200.0, f64::NAN),
                t(600),
                8,
            )
            .unwrap_err();

        match err {
            Error::InvalidPosition { violations, .. } => assert_eq!(violations.len(), 2),
            other => panic!("Expected InvalidPosition, got {other:?}"),
        }
        assert_eq!(in_use.status, BikeStatus::InUse);
    }

    #[test]
    fn invariants_cover_trip_start_position() {
        let (mut in_use, _) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();
        if let Some(trip) = in_use.active_trip.as_mut() {
            trip.start_position = Position::new(56.0, f64::NAN);
        }

        assert!(in_use.check_invariants().is_err());
    }

    #[test]
    fn finish_unknown_trip_is_invalid_state() {
        let err = bike()
            .finish_trip(&table(), TripId::generate(), Position::new(56.1, 15.1), t(0), 8)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn stale_reading_is_reported() {
        let step = bike()
            .apply_reading(&table(), &TelemetryReading::new(5, Position::new(56.0, 15.0), 90))
            .unwrap();
        let ReadingStep::Apply { next, .. } = step else {
            panic!("Expected Apply");
        };

        let stale = next
            .apply_reading(&table(), &TelemetryReading::new(4, Position::new(50.0, 10.0), 10))
            .unwrap();
        assert_eq!(stale, ReadingStep::Stale { last_applied: 5 });

        let duplicate = next
            .apply_reading(&table(), &TelemetryReading::new(5, Position::new(50.0, 10.0), 10))
            .unwrap();
        assert_eq!(duplicate, ReadingStep::Stale { last_applied: 5 });
    }

    #[test]
    fn battery_never_rises_during_trip() {
        let mut in_use = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap()
            .0;
        in_use.battery = 80;

        let ReadingStep::Apply { next, .. } = in_use
            .apply_reading(&table(), &TelemetryReading::new(1, Position::new(56.0, 15.0), 85))
            .unwrap()
        else {
            panic!("Expected Apply");
        };

        assert_eq!(next.battery, 80);
    }

    #[test]
    fn maintenance_hint_ignored_during_trip() {
        let in_use = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap()
            .0;
        let reading = TelemetryReading::new(1, Position::new(56.0, 15.0), 90)
            .with_status_hint(BikeStatus::Maintenance);

        let ReadingStep::Apply {
            next,
            status_changed_to,
            ignored_hint,
        } = in_use.apply_reading(&table(), &reading).unwrap()
        else {
            panic!("Expected Apply");
        };

        assert_eq!(next.status, BikeStatus::InUse);
        assert_eq!(status_changed_to, None);
        assert_eq!(ignored_hint, Some(BikeStatus::Maintenance));
        assert!(next.check_invariants().is_ok());
    }

    #[test]
    fn charging_hint_applies_when_available() {
        let reading = TelemetryReading::new(1, Position::new(56.0, 15.0), 40)
            .with_status_hint(BikeStatus::Charging);

        let ReadingStep::Apply {
            next,
            status_changed_to,
            ..
        } = bike().apply_reading(&table(), &reading).unwrap()
        else {
            panic!("Expected Apply");
        };

        assert_eq!(next.status, BikeStatus::Charging);
        assert_eq!(status_changed_to, Some(BikeStatus::Charging));
    }

    #[test]
    fn invalid_reading_is_rejected() {
        let reading = TelemetryReading::new(1, Position::new(56.0, 15.0), 101);
        let err = bike().apply_reading(&table(), &reading).unwrap_err();
        assert!(matches!(err, Error::InvalidReading { ref violations, .. } if violations.len() == 1));
    }

    #[test]
    fn forced_out_of_use_closes_trip() {
        let (in_use, trip) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();

        let forced = in_use.forced(BikeStatus::Maintenance, t(120), 8).unwrap();

        assert_eq!(forced.previous, BikeStatus::InUse);
        assert_eq!(forced.next.status, BikeStatus::Maintenance);
        assert!(forced.next.active_trip.is_none());
        let closed = forced.closed_trip.unwrap();
        assert_eq!(closed.trip_id, trip.trip_id);
        assert_eq!(closed.duration, Duration::from_secs(120));
        assert!(forced.next.check_invariants().is_ok());
    }

    #[test]
    fn forced_into_use_is_rejected() {
        let err = bike().forced(BikeStatus::InUse, t(0), 8).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn deactivated_is_terminal_even_when_forced() {
        let deactivated = bike().forced(BikeStatus::Deactivated, t(0), 8).unwrap().next;

        for status in [
            BikeStatus::Available,
            BikeStatus::Charging,
            BikeStatus::Maintenance,
        ] {
            assert!(deactivated.forced(status, t(1), 8).is_err());
        }
        assert!(deactivated.with_owner(OwnerId::from("someone")).is_err());
    }

    #[test]
    fn invariant_check_catches_trip_without_in_use() {
        let (mut broken, _) = bike()
            .begin_trip(&table(), UserId::from("u1"), Position::new(56.0, 15.0), t(0))
            .unwrap();
        broken.status = BikeStatus::Charging;
        assert!(broken.check_invariants().is_err());
    }
}
