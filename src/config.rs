//! Engine configuration.
//!
//! Deserialized from an optional TOML file merged with `KICKSTAND__*`
//! environment variables via the `config` crate. Every field has a default,
//! so an empty source yields [`EngineConfig::default`].

use crate::core::{Position, TransitionTable};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for state machines and the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on each store call, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Upper bound on each trip-collector delivery, in milliseconds.
    #[serde(default = "default_collector_timeout_ms")]
    pub collector_timeout_ms: u64,
    /// Minimum battery percentage required to start a trip.
    #[serde(default = "default_min_start_battery")]
    pub min_start_battery: u8,
    /// Trip summaries kept per bike for idempotent `end_trip`.
    #[serde(default = "default_trip_log_capacity")]
    pub trip_log_capacity: usize,
    /// Status transitions kept in memory per bike.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Owner assigned at registration when none is given.
    #[serde(default = "default_owner")]
    pub default_owner: String,
    /// Where newly registered bikes are placed.
    #[serde(default = "default_depot")]
    pub depot: Position,
    /// Bound of the telemetry ingestion channel.
    #[serde(default = "default_telemetry_channel_capacity")]
    pub telemetry_channel_capacity: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            collector_timeout_ms: default_collector_timeout_ms(),
            min_start_battery: default_min_start_battery(),
            trip_log_capacity: default_trip_log_capacity(),
            history_capacity: default_history_capacity(),
            default_owner: default_owner(),
            depot: default_depot(),
            telemetry_channel_capacity: default_telemetry_channel_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path` (TOML, optional) and the environment.
    ///
    /// Environment variables use the `KICKSTAND` prefix and `__` as the
    /// nesting separator, e.g. `KICKSTAND__STORE_TIMEOUT_MS=250` or
    /// `KICKSTAND__LOGGING__LEVEL=debug`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix("KICKSTAND")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector_timeout_ms)
    }

    /// The transition table these settings describe.
    pub fn transition_table(&self) -> TransitionTable {
        TransitionTable::standard(self.min_start_battery)
    }
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_collector_timeout_ms() -> u64 {
    1_000
}

fn default_min_start_battery() -> u8 {
    5
}

fn default_trip_log_capacity() -> usize {
    32
}

fn default_history_capacity() -> usize {
    crate::core::DEFAULT_HISTORY_CAPACITY
}

fn default_owner() -> String {
    "Karlskrona".to_string()
}

fn default_depot() -> Position {
    Position::new(56.181810, 15.592350)
}

fn default_telemetry_channel_capacity() -> usize {
    1_024
}
