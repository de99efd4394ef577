//! The explicit transition table for bike statuses.

use super::bike::BikeState;
use super::guard::Guard;
use super::status::BikeStatus;
use serde::{Deserialize, Serialize};

/// Which path asked for a status change.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Trigger {
    /// `start_trip` / `end_trip`
    Trip,
    /// A status hint carried by a telemetry reading
    Telemetry,
    /// An administrative override; never matched against the table
    Admin,
    /// A change written to the store by someone else, picked up on re-read
    Resync,
}

/// A permitted status change.
#[derive(Clone, Debug)]
pub struct TransitionRule {
    pub from: BikeStatus,
    pub to: BikeStatus,
    pub trigger: Trigger,
    pub guard: Option<Guard>,
}

impl TransitionRule {
    /// Check if this rule can fire for the bike (pure).
    pub fn can_execute(&self, bike: &BikeState) -> bool {
        if bike.status != self.from {
            return false;
        }

        self.guard.as_ref().map_or(true, |g| g.check(bike))
    }
}

/// Why the table refused a transition.
#[derive(Clone, PartialEq, Debug)]
pub enum Denial {
    /// No rule exists for this `(from, to, trigger)`.
    NotPermitted,
    /// A rule exists but its guard failed.
    GuardBlocked { guard: String },
}

impl Denial {
    pub fn describe(&self, from: BikeStatus, to: BikeStatus) -> String {
        match self {
            Denial::NotPermitted => format!("{from} -> {to} is not a permitted transition"),
            Denial::GuardBlocked { guard } => {
                format!("{from} -> {to} blocked by guard: {guard}")
            }
        }
    }
}

/// Closed set of transition rules consulted by every non-administrative
/// status change.
///
/// # Example
///
/// ```rust
/// use kickstand::core::{BikeState, BikeStatus, Position, TransitionTable, Trigger};
///
/// let table = TransitionTable::standard(5);
/// let bike = BikeState::register("bike-1", "Karlskrona", Position::new(56.18, 15.59));
///
/// assert!(table.check(&bike, BikeStatus::InUse, Trigger::Trip).is_ok());
/// assert!(table.check(&bike, BikeStatus::InUse, Trigger::Telemetry).is_err());
/// ```
#[derive(Clone, Debug, Default)]
pub struct TransitionTable {
    rules: Vec<TransitionRule>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fleet's lifecycle:
    ///
    /// - `Available <-> InUse` by trip operations; starting is guarded by
    ///   `min_start_battery`
    /// - `Available <-> Charging` and `Available <-> Maintenance` by telemetry
    /// - `Available | Charging | Maintenance -> Deactivated` by telemetry
    pub fn standard(min_start_battery: u8) -> Self {
        use BikeStatus::*;

        Self::new()
            .guarded(
                Available,
                InUse,
                Trigger::Trip,
                Guard::min_battery(min_start_battery),
            )
            .allow(InUse, Available, Trigger::Trip)
            .allow(Available, Charging, Trigger::Telemetry)
            .allow(Charging, Available, Trigger::Telemetry)
            .allow(Available, Maintenance, Trigger::Telemetry)
            .allow(Maintenance, Available, Trigger::Telemetry)
            .allow(Available, Deactivated, Trigger::Telemetry)
            .allow(Charging, Deactivated, Trigger::Telemetry)
            .allow(Maintenance, Deactivated, Trigger::Telemetry)
    }

    /// Add an unconditional rule.
    pub fn allow(self, from: BikeStatus, to: BikeStatus, trigger: Trigger) -> Self {
        self.with_rule(TransitionRule {
            from,
            to,
            trigger,
            guard: None,
        })
    }

    /// Add a rule that fires only when `guard` passes.
    pub fn guarded(self, from: BikeStatus, to: BikeStatus, trigger: Trigger, guard: Guard) -> Self {
        self.with_rule(TransitionRule {
            from,
            to,
            trigger,
            guard: Some(guard),
        })
    }

    /// Add a rule. Ignored when it leaves a final status, when telemetry
    /// would move a bike into or out of `InUse`, or when its trigger is an
    /// override or re-read, which bypass the table.
    pub fn with_rule(mut self, rule: TransitionRule) -> Self {
        let admissible = match rule.trigger {
            Trigger::Trip => true,
            Trigger::Telemetry => {
                !rule.from.is_trip_controlled() && !rule.to.is_trip_controlled()
            }
            Trigger::Admin | Trigger::Resync => false,
        };
        if admissible && !rule.from.is_final() {
            self.rules.push(rule);
        }
        self
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    /// Look up the rule for `(from, to, trigger)`.
    pub fn rule(&self, from: BikeStatus, to: BikeStatus, trigger: Trigger) -> Option<&TransitionRule> {
        self.rules
            .iter()
            .find(|r| r.from == from && r.to == to && r.trigger == trigger)
    }

    /// Check whether `bike` may move to `to` via `trigger` (pure).
    pub fn check(&self, bike: &BikeState, to: BikeStatus, trigger: Trigger) -> Result<(), Denial> {
        let rule = self
            .rule(bike.status, to, trigger)
            .ok_or(Denial::NotPermitted)?;

        if rule.can_execute(bike) {
            Ok(())
        } else {
            Err(Denial::GuardBlocked {
                guard: rule
                    .guard
                    .as_ref()
                    .map(|g| g.description().to_string())
                    .unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;
    use BikeStatus::*;

    fn bike_in(status: BikeStatus) -> BikeState {
        let mut bike = BikeState::register("b1", "owner", Position::new(56.0, 15.0));
        bike.status = status;
        bike
    }

    #[test]
    fn trip_cycle_is_permitted() {
        let table = TransitionTable::standard(5);

        assert!(table.check(&bike_in(Available), InUse, Trigger::Trip).is_ok());
        assert!(table.check(&bike_in(InUse), Available, Trigger::Trip).is_ok());
    }

    #[test]
    fn telemetry_cannot_drive_trip_transitions() {
        let table = TransitionTable::standard(5);

        for status in BikeStatus::ALL {
            assert_eq!(
                table.check(&bike_in(status), InUse, Trigger::Telemetry),
                Err(Denial::NotPermitted)
            );
        }
        assert_eq!(
            table.check(&bike_in(InUse), Available, Trigger::Telemetry),
            Err(Denial::NotPermitted)
        );
    }

    #[test]
    fn nothing_leaves_deactivated() {
        let table = TransitionTable::standard(0);

        for to in BikeStatus::ALL {
            for trigger in [Trigger::Trip, Trigger::Telemetry] {
                assert!(table.check(&bike_in(Deactivated), to, trigger).is_err());
            }
        }
    }

    #[test]
    fn rules_from_final_status_are_dropped() {
        let table = TransitionTable::new().allow(Deactivated, Available, Trigger::Telemetry);
        assert!(table.rules().is_empty());
    }

    #[test]
    fn telemetry_rules_touching_in_use_are_dropped() {
        let table = TransitionTable::new()
            .allow(Available, InUse, Trigger::Telemetry)
            .allow(InUse, Maintenance, Trigger::Telemetry);
        assert!(table.rules().is_empty());
    }

    #[test]
    fn admin_rules_are_dropped() {
        let table = TransitionTable::new().allow(Available, Charging, Trigger::Admin);
        assert!(table.rules().is_empty());
    }

    #[test]
    fn low_battery_blocks_trip_start() {
        let table = TransitionTable::standard(20);
        let mut bike = bike_in(Available);
        bike.battery = 10;

        match table.check(&bike, InUse, Trigger::Trip) {
            Err(Denial::GuardBlocked { guard }) => assert_eq!(guard, "battery at least 20%"),
            other => panic!("Expected GuardBlocked, got {other:?}"),
        }
    }

    #[test]
    fn service_statuses_round_trip_through_available() {
        let table = TransitionTable::standard(5);

        for service in [Charging, Maintenance] {
            assert!(table.check(&bike_in(Available), service, Trigger::Telemetry).is_ok());
            assert!(table.check(&bike_in(service), Available, Trigger::Telemetry).is_ok());
            assert!(table.check(&bike_in(service), Deactivated, Trigger::Telemetry).is_ok());
        }
        assert!(table.check(&bike_in(Charging), Maintenance, Trigger::Telemetry).is_err());
    }

    #[test]
    fn denial_describes_transition() {
        let text = Denial::NotPermitted.describe(InUse, Charging);
        assert_eq!(text, "InUse -> Charging is not a permitted transition");
    }
}
