//! Registry of bike state machines.
//!
//! The fleet owns one [`BikeStateMachine`] per bike, created on
//! registration or loaded from the store on first use. Different bikes
//! never share a lock; operations on the same bike all go through that
//! bike's machine.

use crate::collector::TripCollector;
use crate::config::EngineConfig;
use crate::core::{BikeId, BikeState, BikeStatus, OwnerId, Position, TripId, TripSummary, UserId};
use crate::error::Result;
use crate::machine::{BikeSnapshot, BikeStateMachine, MachineEnv};
use crate::store::BikeStore;
use crate::telemetry::{TelemetryOutcome, TelemetryReading};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A telemetry message addressed to one bike.
pub type TelemetryEnvelope = (BikeId, TelemetryReading);

#[derive(Debug)]
pub struct Fleet {
    config: EngineConfig,
    env: MachineEnv,
    bikes: DashMap<BikeId, Arc<BikeStateMachine>>,
}

impl Fleet {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn BikeStore>,
        collector: Arc<dyn TripCollector>,
    ) -> Self {
        let env = MachineEnv::new(&config, store, collector);
        Self {
            config,
            env,
            bikes: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a new bike at the depot. `owner` defaults to the configured
    /// default owner.
    pub async fn register(
        &self,
        bike_id: impl Into<BikeId>,
        owner: Option<OwnerId>,
    ) -> Result<Arc<BikeStateMachine>> {
        let owner = owner.unwrap_or_else(|| OwnerId::new(self.config.default_owner.clone()));
        let state = BikeState::register(bike_id, owner, self.config.depot);

        let machine = BikeStateMachine::register(self.env.clone(), state).await?;
        Ok(self.adopt(machine))
    }

    /// Load a bike from the store, refreshing it if already held.
    pub async fn load(&self, bike_id: &BikeId) -> Result<Arc<BikeStateMachine>> {
        if let Some(machine) = self.cached(bike_id) {
            machine.reload().await?;
            return Ok(machine);
        }
        let machine = BikeStateMachine::load(self.env.clone(), bike_id).await?;
        Ok(self.adopt(machine))
    }

    /// The machine for `bike_id`, loading it on first use.
    pub async fn bike(&self, bike_id: &BikeId) -> Result<Arc<BikeStateMachine>> {
        match self.cached(bike_id) {
            Some(machine) => Ok(machine),
            None => {
                let machine = BikeStateMachine::load(self.env.clone(), bike_id).await?;
                Ok(self.adopt(machine))
            }
        }
    }

    /// Ids of the bikes currently held in memory.
    pub fn bike_ids(&self) -> Vec<BikeId> {
        self.bikes.iter().map(|entry| entry.key().clone()).collect()
    }

    pub async fn start_trip(
        &self,
        bike_id: &BikeId,
        user_id: impl Into<UserId>,
        at_position: Position,
        at_time: DateTime<Utc>,
    ) -> Result<TripId> {
        self.bike(bike_id)
            .await?
            .start_trip(user_id, at_position, at_time)
            .await
    }

    pub async fn end_trip(
        &self,
        bike_id: &BikeId,
        trip_id: TripId,
        at_position: Position,
        at_time: DateTime<Utc>,
    ) -> Result<TripSummary> {
        self.bike(bike_id)
            .await?
            .end_trip(trip_id, at_position, at_time)
            .await
    }

    pub async fn apply_telemetry(
        &self,
        bike_id: &BikeId,
        reading: &TelemetryReading,
    ) -> Result<TelemetryOutcome> {
        self.bike(bike_id).await?.apply_telemetry(reading).await
    }

    pub async fn snapshot(&self, bike_id: &BikeId) -> Result<BikeSnapshot> {
        Ok(self.bike(bike_id).await?.as_snapshot())
    }

    pub async fn set_owner(&self, bike_id: &BikeId, owner_id: impl Into<OwnerId>) -> Result<()> {
        self.bike(bike_id).await?.set_owner(owner_id).await
    }

    pub async fn force_status(
        &self,
        bike_id: &BikeId,
        status: BikeStatus,
        at_time: DateTime<Utc>,
    ) -> Result<Option<TripSummary>> {
        self.bike(bike_id)
            .await?
            .force_status(status, at_time)
            .await
    }

    /// Retry summaries the collector has not accepted yet.
    pub async fn redeliver_pending(&self) -> usize {
        let delivered = self.env.courier.redeliver().await;
        if delivered > 0 {
            info!(delivered, "Redelivered trip summaries");
        }
        delivered
    }

    /// Summaries the collector has not accepted yet.
    pub fn pending_summaries(&self) -> Vec<TripSummary> {
        self.env.courier.pending()
    }

    /// Bounded channel sized by `telemetry_channel_capacity`.
    pub fn telemetry_channel(
        &self,
    ) -> (
        mpsc::Sender<TelemetryEnvelope>,
        mpsc::Receiver<TelemetryEnvelope>,
    ) {
        mpsc::channel(self.config.telemetry_channel_capacity.max(1))
    }

    /// Consume readings until every sender is dropped.
    ///
    /// A failing reading is logged and skipped; it never stops the worker.
    pub fn spawn_telemetry_worker(
        self: &Arc<Self>,
        mut readings: mpsc::Receiver<TelemetryEnvelope>,
    ) -> JoinHandle<()> {
        let fleet = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((bike_id, reading)) = readings.recv().await {
                match fleet.apply_telemetry(&bike_id, &reading).await {
                    Ok(outcome) => {
                        debug!(bike_id = %bike_id, sequence = reading.sequence, ?outcome, "Telemetry processed")
                    }
                    Err(e) => warn!(
                        bike_id = %bike_id,
                        sequence = reading.sequence,
                        error = %e,
                        "Telemetry rejected"
                    ),
                }
            }
            debug!("Telemetry channel closed, worker stopping");
        })
    }

    fn cached(&self, bike_id: &BikeId) -> Option<Arc<BikeStateMachine>> {
        self.bikes.get(bike_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Keep `machine` unless another one for the same bike got in first.
    fn adopt(&self, machine: BikeStateMachine) -> Arc<BikeStateMachine> {
        let entry = self
            .bikes
            .entry(machine.bike_id().clone())
            .or_insert_with(|| Arc::new(machine));
        Arc::clone(entry.value())
    }
}
