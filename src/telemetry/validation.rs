//! Reading validation using `Validation`.
//!
//! All checks run on every reading and every violation is reported, so an
//! onboard unit with several broken sensors is diagnosed in one pass.

use super::TelemetryReading;
use crate::core::Position;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// A single reason a reading was rejected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadingViolation {
    #[error("battery {battery}% is above 100%")]
    BatteryOutOfRange { battery: u8 },

    #[error("latitude {latitude} is outside [-90, 90]")]
    LatitudeOutOfRange { latitude: f64 },

    #[error("longitude {longitude} is outside [-180, 180]")]
    LongitudeOutOfRange { longitude: f64 },

    #[error("speed {speed_kmh} km/h is negative or not finite")]
    InvalidSpeed { speed_kmh: f64 },
}

type Check = Validation<(), NonEmptyVec<ReadingViolation>>;

fn check(ok: bool, violation: impl FnOnce() -> ReadingViolation) -> Check {
    if ok {
        Validation::success(())
    } else {
        Validation::fail(violation())
    }
}

fn position_checks(position: &Position) -> [Check; 2] {
    [
        check(
            position.latitude.is_finite() && (-90.0..=90.0).contains(&position.latitude),
            || ReadingViolation::LatitudeOutOfRange {
                latitude: position.latitude,
            },
        ),
        check(
            position.longitude.is_finite() && (-180.0..=180.0).contains(&position.longitude),
            || ReadingViolation::LongitudeOutOfRange {
                longitude: position.longitude,
            },
        ),
    ]
}

/// Run every check against the reading, accumulating ALL violations.
pub fn validate_reading(reading: &TelemetryReading) -> Check {
    let TelemetryReading {
        position,
        battery,
        speed_kmh,
        ..
    } = reading;

    let mut checks = vec![check(*battery <= 100, || {
        ReadingViolation::BatteryOutOfRange { battery: *battery }
    })];
    checks.extend(position_checks(position));
    checks.push(check(speed_kmh.is_finite() && *speed_kmh >= 0.0, || {
        ReadingViolation::InvalidSpeed {
            speed_kmh: *speed_kmh,
        }
    }));

    Validation::all_vec(checks).map(|_| ())
}

/// Check a position reported by a trip operation.
pub fn validate_position(position: &Position) -> Check {
    Validation::all_vec(Vec::from(position_checks(position))).map(|_| ())
}

/// Flatten a validation result into the list of violations, empty if valid.
pub(crate) fn violations(reading: &TelemetryReading) -> Vec<ReadingViolation> {
    flatten(validate_reading(reading))
}

pub(crate) fn position_violations(position: &Position) -> Vec<ReadingViolation> {
    flatten(validate_position(position))
}

fn flatten(result: Check) -> Vec<ReadingViolation> {
    match result {
        Validation::Success(_) => Vec::new(),
        Validation::Failure(errors) => errors.iter().cloned().collect(),
    }
}
