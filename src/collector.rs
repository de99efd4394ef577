//! Delivery of trip summaries to billing/logging collaborators.
//!
//! Delivery is at-least-once: a summary may reach the collector more than
//! once (a retried `end_trip`, a redelivery from the outbox), so collectors
//! deduplicate by trip id. Summaries the collector did not accept wait in
//! the outbox until [`SummaryCourier::redeliver`] succeeds.

use crate::core::{TripId, TripSummary};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector unavailable: {0}")]
    Unavailable(String),

    #[error("collector did not answer within {0:?}")]
    Timeout(Duration),
}

/// Receiver of finished trips.
#[async_trait]
pub trait TripCollector: Send + Sync + std::fmt::Debug + 'static {
    async fn deliver(&self, summary: &TripSummary) -> Result<(), CollectorError>;
}

/// Collector that keeps one summary per trip id in memory.
#[derive(Debug, Default)]
pub struct MemoryCollector {
    received: DashMap<TripId, TripSummary>,
    attempts: AtomicU64,
    fail_next: AtomicUsize,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` deliveries.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn get(&self, trip_id: &TripId) -> Option<TripSummary> {
        self.received.get(trip_id).map(|entry| entry.clone())
    }

    /// Distinct trips received.
    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// Every delivery call, duplicates and failures included.
    pub fn delivery_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TripCollector for MemoryCollector {
    async fn deliver(&self, summary: &TripSummary) -> Result<(), CollectorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let rejected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(CollectorError::Unavailable("injected failure".into()));
        }

        if self
            .received
            .insert(summary.trip_id, summary.clone())
            .is_some()
        {
            debug!(trip_id = %summary.trip_id, "Duplicate trip summary ignored");
        }
        Ok(())
    }
}

/// Hands summaries to a collector and keeps the ones it has not accepted.
///
/// A summary enters the outbox before the collector is called and leaves it
/// once delivered, so a caller that abandons a dispatch midway still leaves
/// the summary pending.
#[derive(Debug)]
pub struct SummaryCourier {
    collector: Arc<dyn TripCollector>,
    timeout: Duration,
    outbox: Mutex<Vec<TripSummary>>,
}

impl SummaryCourier {
    pub fn new(collector: Arc<dyn TripCollector>, timeout: Duration) -> Self {
        Self {
            collector,
            timeout,
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Deliver one summary, leaving it in the outbox unless the collector
    /// accepts it.
    ///
    /// Returns whether the collector accepted it.
    pub async fn dispatch(&self, summary: &TripSummary) -> bool {
        self.park(summary);
        match self.try_deliver(summary).await {
            Ok(()) => {
                self.unpark(&summary.trip_id);
                debug!(trip_id = %summary.trip_id, bike_id = %summary.bike_id, "Trip summary delivered");
                true
            }
            Err(e) => {
                warn!(
                    trip_id = %summary.trip_id,
                    bike_id = %summary.bike_id,
                    error = %e,
                    "Trip summary delivery failed, keeping it in the outbox"
                );
                false
            }
        }
    }

    /// Retry every parked summary. Returns how many were delivered.
    pub async fn redeliver(&self) -> usize {
        let pending = self.pending();
        let mut delivered = 0;

        for summary in pending {
            match self.try_deliver(&summary).await {
                Ok(()) => {
                    self.unpark(&summary.trip_id);
                    delivered += 1;
                }
                Err(e) => debug!(trip_id = %summary.trip_id, error = %e, "Redelivery failed"),
            }
        }
        delivered
    }

    /// Summaries not yet accepted by the collector, oldest first.
    pub fn pending(&self) -> Vec<TripSummary> {
        self.outbox().clone()
    }

    fn park(&self, summary: &TripSummary) {
        let mut outbox = self.outbox();
        if !outbox.iter().any(|s| s.trip_id == summary.trip_id) {
            outbox.push(summary.clone());
        }
    }

    fn unpark(&self, trip_id: &TripId) {
        self.outbox().retain(|s| s.trip_id != *trip_id);
    }

    fn outbox(&self) -> MutexGuard<'_, Vec<TripSummary>> {
        // The outbox is only pushed to and filtered; a poisoned one is still usable.
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn try_deliver(&self, summary: &TripSummary) -> Result<(), CollectorError> {
        tokio::time::timeout(self.timeout, self.collector.deliver(summary))
            .await
            .map_err(|_| CollectorError::Timeout(self.timeout))?
    }
}
