//! Kickstand: trip lifecycle and state-consistency engine for shared bikes
//!
//! Kickstand follows a "pure core, imperative shell" layout. The core
//! computes every transition as a pure function from one bike state to the
//! next; the shell serializes operations per bike, writes each candidate
//! state through to a versioned store, and only then commits it.
//!
//! # Core Concepts
//!
//! - **BikeStatus**: closed set of five statuses; `Deactivated` is terminal
//! - **TransitionTable**: explicit rules, optionally guarded, saying which
//!   path (trips or telemetry) may move a bike between statuses
//! - **BikeStateMachine**: one lock per bike, write-through persistence,
//!   lock-free snapshots
//! - **Fleet**: registry of machines plus the telemetry ingestion worker
//!
//! # Example
//!
//! ```rust
//! use kickstand::core::{BikeId, BikeStatus, Position};
//! use kickstand::{EngineConfig, Fleet, MemoryCollector, MemoryStore};
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let fleet = Fleet::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryCollector::new()),
//! );
//! let bike = BikeId::from("bike-1");
//! fleet.register(bike.clone(), None).await.unwrap();
//!
//! let start = Utc::now();
//! let trip = fleet
//!     .start_trip(&bike, "u1", Position::new(56.0, 15.0), start)
//!     .await
//!     .unwrap();
//! let summary = fleet
//!     .end_trip(&bike, trip, Position::new(56.1, 15.1), start + Duration::seconds(600))
//!     .await
//!     .unwrap();
//!
//! assert_eq!(summary.duration.as_secs(), 600);
//! assert_eq!(fleet.snapshot(&bike).await.unwrap().status, BikeStatus::Available);
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod machine;
pub mod record;
pub mod store;
pub mod telemetry;

// Re-export commonly used types
pub use collector::{MemoryCollector, TripCollector};
pub use config::EngineConfig;
pub use core::{BikeId, BikeStatus, Position, TripId, TripSummary};
pub use error::{Error, PersistenceError, Result};
pub use fleet::Fleet;
pub use machine::{BikeSnapshot, BikeStateMachine, MachineEnv};
pub use store::{BikeStore, MemoryStore};
pub use telemetry::{TelemetryOutcome, TelemetryReading};
