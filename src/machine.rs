//! Per-bike state machine: the async shell around [`BikeState`].
//!
//! Each machine serializes every mutation of its bike behind one
//! `tokio::sync::Mutex`. A mutation computes the candidate next state with
//! the pure functions in [`crate::core`], writes it through to the store
//! with the version it was based on, and only then swaps it in and
//! publishes a new snapshot. A failed or timed-out write leaves the
//! in-memory state untouched.
//!
//! Snapshots are published on a `watch` channel, so readers never wait for
//! the mutation lock.

use crate::collector::{SummaryCourier, TripCollector};
use crate::config::EngineConfig;
use crate::core::{
    ActiveTrip, BikeId, BikeState, BikeStatus, OwnerId, Position, ReadingStep, StatusHistory,
    StatusTransition, TransitionTable, Trigger, TripEnd, TripId, TripSummary, UserId,
};
use crate::error::{Error, PersistenceError, Result};
use crate::record::{BikeRecord, VersionedRecord};
use crate::store::{BikeStore, StoreError};
use crate::telemetry::{TelemetryOutcome, TelemetryReading};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Immutable point-in-time copy of one bike.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct BikeSnapshot {
    pub bike_id: BikeId,
    pub owner_id: OwnerId,
    pub status: BikeStatus,
    pub position: Position,
    pub battery: u8,
    pub speed_kmh: f64,
    pub active_trip: Option<ActiveTrip>,
    pub last_trip: Option<TripSummary>,
    pub last_telemetry_seq: Option<u64>,
    /// Store version this snapshot was committed as.
    pub version: u64,
}

impl BikeSnapshot {
    fn capture(state: &BikeState, version: u64) -> Self {
        Self {
            bike_id: state.bike_id.clone(),
            owner_id: state.owner_id.clone(),
            status: state.status,
            position: state.position,
            battery: state.battery,
            speed_kmh: state.speed_kmh,
            active_trip: state.active_trip.clone(),
            last_trip: state.trip_log.last().cloned(),
            last_telemetry_seq: state.last_telemetry_seq,
            version,
        }
    }

    /// Elapsed time of the active trip at `now`, `None` when not in use.
    pub fn session_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.active_trip.as_ref().map(|trip| trip.session_time(now))
    }
}

/// Collaborators and settings shared by every machine of a fleet.
#[derive(Clone, Debug)]
pub struct MachineEnv {
    pub store: Arc<dyn BikeStore>,
    pub courier: Arc<SummaryCourier>,
    pub table: Arc<TransitionTable>,
    pub store_timeout: Duration,
    pub trip_log_capacity: usize,
    pub history_capacity: usize,
}

impl MachineEnv {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn BikeStore>,
        collector: Arc<dyn TripCollector>,
    ) -> Self {
        Self {
            store,
            courier: Arc::new(SummaryCourier::new(collector, config.collector_timeout())),
            table: Arc::new(config.transition_table()),
            store_timeout: config.store_timeout(),
            trip_log_capacity: config.trip_log_capacity,
            history_capacity: config.history_capacity,
        }
    }

    async fn fetch(&self, bike_id: &BikeId) -> Result<Option<VersionedRecord>> {
        tokio::time::timeout(self.store_timeout, self.store.get(bike_id))
            .await
            .map_err(|_| self.timed_out(bike_id))?
            .map_err(|e| store_error(bike_id, e))
    }

    async fn persist(
        &self,
        bike_id: &BikeId,
        record: &BikeRecord,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        tokio::time::timeout(
            self.store_timeout,
            self.store.put(bike_id, record, expected_version),
        )
        .await
        .map_err(|_| self.timed_out(bike_id))?
        .map_err(|e| store_error(bike_id, e))
    }

    fn timed_out(&self, bike_id: &BikeId) -> Error {
        Error::Persistence {
            bike_id: bike_id.clone(),
            source: PersistenceError::Timeout(self.store_timeout),
        }
    }
}

fn store_error(bike_id: &BikeId, error: StoreError) -> Error {
    match error {
        StoreError::Conflict { expected, found } => Error::Conflict {
            bike_id: bike_id.clone(),
            expected,
            found,
        },
        StoreError::Unavailable(message) => Error::Persistence {
            bike_id: bike_id.clone(),
            source: PersistenceError::Unavailable(message),
        },
        StoreError::Record(e) => Error::Record(e),
    }
}

#[derive(Debug)]
struct Inner {
    state: BikeState,
    version: u64,
    history: StatusHistory,
    /// A write was started and its outcome is unknown (timed out, or the
    /// caller dropped the future). Resolved by re-reading the store.
    unsettled: bool,
}

/// Lifecycle engine for one bike.
#[derive(Debug)]
pub struct BikeStateMachine {
    bike_id: BikeId,
    env: MachineEnv,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<BikeSnapshot>,
}

impl BikeStateMachine {
    /// Create the durable record for a new bike and a machine around it.
    ///
    /// Fails with `Conflict` if the store already holds this bike.
    pub async fn register(env: MachineEnv, state: BikeState) -> Result<Self> {
        state
            .check_invariants()
            .map_err(crate::record::RecordError::ValidationFailed)?;

        let bike_id = state.bike_id.clone();
        let version = env
            .persist(&bike_id, &BikeRecord::new(state.clone()), None)
            .await?;
        info!(bike_id = %bike_id, owner_id = %state.owner_id, "Registered bike");

        Ok(Self::assemble(env, state, version))
    }

    /// Build a machine from the bike's durable record.
    pub async fn load(env: MachineEnv, bike_id: &BikeId) -> Result<Self> {
        let VersionedRecord { version, record } = env
            .fetch(bike_id)
            .await?
            .ok_or_else(|| Error::NotFound(bike_id.clone()))?;
        debug!(bike_id = %bike_id, version, "Loaded bike");

        Ok(Self::assemble(env, record.into_state(), version))
    }

    fn assemble(env: MachineEnv, state: BikeState, version: u64) -> Self {
        let (snapshot, _) = watch::channel(BikeSnapshot::capture(&state, version));
        Self {
            bike_id: state.bike_id.clone(),
            inner: Mutex::new(Inner {
                history: StatusHistory::with_capacity(env.history_capacity),
                state,
                version,
                unsettled: false,
            }),
            env,
            snapshot,
        }
    }

    pub fn bike_id(&self) -> &BikeId {
        &self.bike_id
    }

    /// Rent the bike to `user_id`.
    pub async fn start_trip(
        &self,
        user_id: impl Into<UserId>,
        at_position: Position,
        at_time: DateTime<Utc>,
    ) -> Result<TripId> {
        let mut inner = self.lock_settled().await?;
        let (next, trip) =
            inner
                .state
                .begin_trip(&self.env.table, user_id.into(), at_position, at_time)?;

        self.commit(&mut inner, next, Trigger::Trip, at_time).await?;
        info!(
            bike_id = %self.bike_id,
            trip_id = %trip.trip_id,
            user_id = %trip.user_id,
            "Trip started"
        );
        Ok(trip.trip_id)
    }

    /// Return the bike, ending `trip_id`.
    ///
    /// Retrying with a trip id that already ended returns the original
    /// summary without changing anything.
    pub async fn end_trip(
        &self,
        trip_id: TripId,
        at_position: Position,
        at_time: DateTime<Utc>,
    ) -> Result<TripSummary> {
        let summary = {
            let mut inner = self.lock_settled().await?;
            let end = inner
                .state
                .finish_trip(
                    &self.env.table,
                    trip_id,
                    at_position,
                    at_time,
                    self.env.trip_log_capacity,
                )
                .inspect_err(|e| {
                    if let Error::ClockSkew { .. } = e {
                        warn!(bike_id = %self.bike_id, error = %e, "Rejected trip end");
                    }
                })?;

            match end {
                TripEnd::AlreadyEnded(summary) => {
                    debug!(bike_id = %self.bike_id, trip_id = %trip_id, "Trip already ended, returning recorded summary");
                    summary
                }
                TripEnd::Ended { next, summary } => {
                    self.commit(&mut inner, next, Trigger::Trip, at_time).await?;
                    info!(
                        bike_id = %self.bike_id,
                        trip_id = %trip_id,
                        duration_secs = summary.duration.as_secs(),
                        distance_km = summary.distance_km,
                        "Trip ended"
                    );
                    summary
                }
            }
        };

        self.env.courier.dispatch(&summary).await;
        Ok(summary)
    }

    /// Fold a telemetry reading into the bike.
    pub async fn apply_telemetry(&self, reading: &TelemetryReading) -> Result<TelemetryOutcome> {
        let mut inner = self.lock_settled().await?;

        match inner.state.apply_reading(&self.env.table, reading)? {
            ReadingStep::Stale { last_applied } => {
                debug!(
                    bike_id = %self.bike_id,
                    sequence = reading.sequence,
                    last_applied,
                    "Discarding stale telemetry"
                );
                Ok(TelemetryOutcome::Stale { last_applied })
            }
            ReadingStep::Apply {
                next,
                status_changed_to,
                ignored_hint,
            } => {
                if let Some(hint) = ignored_hint {
                    info!(
                        bike_id = %self.bike_id,
                        status = %inner.state.status,
                        hint = %hint,
                        "Ignoring telemetry status hint"
                    );
                }
                self.commit(&mut inner, next, Trigger::Telemetry, reading.recorded_at)
                    .await?;
                Ok(TelemetryOutcome::Applied {
                    status_changed_to,
                    ignored_hint,
                })
            }
        }
    }

    /// Reassign the bike to another owner.
    pub async fn set_owner(&self, owner_id: impl Into<OwnerId>) -> Result<()> {
        let mut inner = self.lock_settled().await?;
        let next = inner.state.with_owner(owner_id.into())?;
        let owner_id = next.owner_id.clone();

        self.commit(&mut inner, next, Trigger::Admin, Utc::now())
            .await?;
        info!(bike_id = %self.bike_id, owner_id = %owner_id, "Owner changed");
        Ok(())
    }

    /// Set the status, bypassing the transition table.
    ///
    /// Returns the summary of the trip closed when the bike is forced out
    /// of `InUse`.
    pub async fn force_status(
        &self,
        status: BikeStatus,
        at_time: DateTime<Utc>,
    ) -> Result<Option<TripSummary>> {
        let closed_trip = {
            let mut inner = self.lock_settled().await?;
            let forced = inner
                .state
                .forced(status, at_time, self.env.trip_log_capacity)?;

            self.commit(&mut inner, forced.next, Trigger::Admin, at_time)
                .await?;
            warn!(
                bike_id = %self.bike_id,
                previous = %forced.previous,
                status = %status,
                closed_trip = ?forced.closed_trip.as_ref().map(|s| s.trip_id),
                "Administrative status override"
            );
            forced.closed_trip
        };

        if let Some(summary) = &closed_trip {
            self.env.courier.dispatch(summary).await;
        }
        Ok(closed_trip)
    }

    /// Replace in-memory state with the durable record.
    pub async fn reload(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.resync(&mut inner).await
    }

    /// Current point-in-time copy. Never waits on a mutation in progress.
    pub fn as_snapshot(&self) -> BikeSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every committed change.
    pub fn subscribe(&self) -> watch::Receiver<BikeSnapshot> {
        self.snapshot.subscribe()
    }

    pub async fn history(&self) -> StatusHistory {
        self.inner.lock().await.history.clone()
    }

    async fn lock_settled(&self) -> Result<tokio::sync::MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock().await;
        if inner.unsettled {
            debug!(bike_id = %self.bike_id, "Previous write unresolved, re-reading store");
            self.resync(&mut inner).await?;
        }
        Ok(inner)
    }

    async fn resync(&self, inner: &mut Inner) -> Result<()> {
        let VersionedRecord { version, record } = self
            .env
            .fetch(&self.bike_id)
            .await?
            .ok_or_else(|| Error::NotFound(self.bike_id.clone()))?;

        if version != inner.version {
            info!(
                bike_id = %self.bike_id,
                from_version = inner.version,
                to_version = version,
                "Adopted stored record"
            );
        }
        self.install(inner, record.into_state(), version, Trigger::Resync, Utc::now());
        Ok(())
    }

    /// Write `next` through to the store, then make it current.
    async fn commit(
        &self,
        inner: &mut Inner,
        next: BikeState,
        cause: Trigger,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let record = BikeRecord::new(next);

        inner.unsettled = true;
        match self
            .env
            .persist(&self.bike_id, &record, Some(inner.version))
            .await
        {
            Ok(version) => {
                self.install(inner, record.into_state(), version, cause, at);
                Ok(())
            }
            Err(e) => {
                // Only a timeout leaves the outcome unknown.
                inner.unsettled = matches!(
                    e,
                    Error::Persistence {
                        source: PersistenceError::Timeout(_),
                        ..
                    }
                );
                warn!(bike_id = %self.bike_id, error = %e, "Write-through failed, state unchanged");
                Err(e)
            }
        }
    }

    fn install(
        &self,
        inner: &mut Inner,
        state: BikeState,
        version: u64,
        cause: Trigger,
        at: DateTime<Utc>,
    ) {
        if state.status != inner.state.status {
            inner.history = inner.history.record(StatusTransition {
                from: inner.state.status,
                to: state.status,
                cause,
                timestamp: at,
            });
        }
        inner.state = state;
        inner.version = version;
        inner.unsettled = false;
        self.snapshot
            .send_replace(BikeSnapshot::capture(&inner.state, version));
    }
}
