//! Property-based tests for the pure lifecycle core.
//!
//! These tests use proptest to drive random operation sequences through
//! `BikeState` and check that the invariants hold after every step.

use chrono::{DateTime, Duration, TimeZone, Utc};
use kickstand::core::{
    BikeState, BikeStatus, Guard, Position, ReadingStep, TransitionTable, TripEnd, TripId, UserId,
};
use kickstand::TelemetryReading;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Start { user: u8, secs: i64 },
    EndActive { secs: i64 },
    EndUnknown,
    Telemetry { seq: u64, battery: u8, hint: Option<BikeStatus> },
    Force { status: BikeStatus, secs: i64 },
}

prop_compose! {
    fn arbitrary_status()(variant in 0..5usize) -> BikeStatus {
        BikeStatus::ALL[variant]
    }
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4u8, 0..10_000i64).prop_map(|(user, secs)| Op::Start { user, secs }),
        (0..10_000i64).prop_map(|secs| Op::EndActive { secs }),
        Just(Op::EndUnknown),
        (0..50u64, 0..=100u8, prop::option::of(arbitrary_status()))
            .prop_map(|(seq, battery, hint)| Op::Telemetry { seq, battery, hint }),
        (arbitrary_status(), 0..10_000i64).prop_map(|(status, secs)| Op::Force { status, secs }),
    ]
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

fn fresh() -> BikeState {
    BikeState::register("b1", "Karlskrona", Position::new(56.18181, 15.59235))
}

/// Apply `op`, returning the next state if the operation succeeded.
fn step(state: &BikeState, table: &TransitionTable, op: &Op) -> Option<BikeState> {
    match op {
        Op::Start { user, secs } => state
            .begin_trip(
                table,
                UserId::new(format!("u{user}")),
                Position::new(56.0, 15.0),
                at(*secs),
            )
            .ok()
            .map(|(next, _)| next),
        Op::EndActive { secs } => {
            let trip_id = state.active_trip.as_ref()?.trip_id;
            match state.finish_trip(table, trip_id, Position::new(56.1, 15.1), at(*secs), 4) {
                Ok(TripEnd::Ended { next, .. }) => Some(next),
                _ => None,
            }
        }
        Op::EndUnknown => {
            let result =
                state.finish_trip(table, TripId::generate(), Position::new(0.0, 0.0), at(0), 4);
            assert!(result.is_err());
            None
        }
        Op::Telemetry { seq, battery, hint } => {
            let mut reading = TelemetryReading::new(*seq, Position::new(56.05, 15.05), *battery);
            reading.status_hint = *hint;
            match state.apply_reading(table, &reading).ok()? {
                ReadingStep::Apply { next, .. } => Some(next),
                ReadingStep::Stale { .. } => None,
            }
        }
        Op::Force { status, secs } => state.forced(*status, at(*secs), 4).ok().map(|f| f.next),
    }
}

proptest! {
    #[test]
    fn invariants_hold_after_every_operation(ops in prop::collection::vec(arbitrary_op(), 1..40)) {
        let table = TransitionTable::standard(5);
        let mut state = fresh();

        for op in &ops {
            if let Some(next) = step(&state, &table, op) {
                state = next;
            }
            prop_assert!(state.check_invariants().is_ok(), "{:?}", state.check_invariants());
            prop_assert_eq!(state.status == BikeStatus::InUse, state.active_trip.is_some());
        }
    }

    #[test]
    fn deactivated_is_absorbing(ops in prop::collection::vec(arbitrary_op(), 1..30)) {
        let table = TransitionTable::standard(5);
        let mut state = fresh().forced(BikeStatus::Deactivated, at(0), 4).unwrap().next;

        for op in &ops {
            if let Some(next) = step(&state, &table, op) {
                state = next;
            }
            prop_assert_eq!(state.status, BikeStatus::Deactivated);
        }
    }

    #[test]
    fn stale_telemetry_changes_nothing(
        applied in 1..1_000u64,
        behind in 0..1_000u64,
        battery in 0..=100u8,
        hint in prop::option::of(arbitrary_status()),
    ) {
        let table = TransitionTable::standard(5);
        let state = match fresh()
            .apply_reading(&table, &TelemetryReading::new(applied, Position::new(56.0, 15.0), 70))
            .unwrap()
        {
            ReadingStep::Apply { next, .. } => next,
            ReadingStep::Stale { .. } => unreachable!(),
        };

        let mut reading =
            TelemetryReading::new(applied.saturating_sub(behind), Position::new(10.0, 10.0), battery);
        reading.status_hint = hint;

        let stale = state.apply_reading(&table, &reading).unwrap();
        prop_assert_eq!(stale, ReadingStep::Stale { last_applied: applied });
    }

    #[test]
    fn battery_never_rises_during_trip(readings in prop::collection::vec(0..=100u8, 1..20)) {
        let table = TransitionTable::standard(0);
        let (mut state, _) = fresh()
            .begin_trip(&table, UserId::from("u1"), Position::new(56.0, 15.0), at(0))
            .unwrap();

        for (i, battery) in readings.iter().enumerate() {
            let before = state.battery;
            let reading = TelemetryReading::new(i as u64 + 1, Position::new(56.0, 15.0), *battery);
            if let ReadingStep::Apply { next, .. } = state.apply_reading(&table, &reading).unwrap() {
                state = next;
            }
            prop_assert!(state.battery <= before);
            prop_assert_eq!(state.status, BikeStatus::InUse);
        }
    }

    #[test]
    fn start_position_fields_are_independent(lat in -90.0..90.0f64, lon in -180.0..180.0f64) {
        let table = TransitionTable::standard(5);
        let (state, trip) = fresh()
            .begin_trip(&table, UserId::from("u1"), Position::new(lat, lon), at(0))
            .unwrap();

        prop_assert_eq!(trip.start_position.latitude, lat);
        prop_assert_eq!(trip.start_position.longitude, lon);
        prop_assert_eq!(state.active_trip.unwrap().start_position, Position::new(lat, lon));
    }

    #[test]
    fn trip_duration_matches_clock(start in 0..100_000i64, length in 0..100_000i64) {
        let table = TransitionTable::standard(5);
        let (state, trip) = fresh()
            .begin_trip(&table, UserId::from("u1"), Position::new(56.0, 15.0), at(start))
            .unwrap();

        match state
            .finish_trip(&table, trip.trip_id, Position::new(56.1, 15.1), at(start + length), 4)
            .unwrap()
        {
            TripEnd::Ended { summary, .. } => {
                prop_assert_eq!(summary.duration.as_secs() as i64, length);
            }
            TripEnd::AlreadyEnded(_) => prop_assert!(false, "fresh trip reported as ended"),
        }
    }

    #[test]
    fn guard_is_deterministic(battery in 0..=100u8, threshold in 0..=100u8) {
        let guard = Guard::min_battery(threshold);
        let mut state = fresh();
        state.battery = battery;

        prop_assert_eq!(guard.check(&state), guard.check(&state));
        prop_assert_eq!(guard.check(&state), battery >= threshold);
    }

    #[test]
    fn status_roundtrip_serialization(status in arbitrary_status()) {
        let json = serde_json::to_string(&status).unwrap();
        let deserialized: BikeStatus = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(status, deserialized);
    }
}
