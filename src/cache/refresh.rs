//! Preemptive cache refresh.
//!
//! # Responsibilities
//! - Periodically recompute registered keys before requests find them stale
//! - Store refreshed artifacts under a time-bounded validity
//!
//! # Design Decisions
//! - One tokio task per key; producers run on the blocking pool
//! - A run still in progress for a key makes overlapping runs skip, never queue
//! - A failed or panicking producer leaves the previous entry in place
//! - First run is jittered to spread refreshes registered together

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::cache::coordinator::{CacheCoordinator, CacheError};
use crate::cache::key::CacheKey;
use crate::cache::store::Artifact;
use crate::cache::validity::ValidityDescriptor;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Error returned by a refresh producer.
pub type ProducerError = Box<dyn std::error::Error + Send + Sync>;

/// Recomputes an artifact and the validity it was computed under.
pub type Producer = Arc<dyn Fn() -> Result<(ValidityDescriptor, Artifact), ProducerError> + Send + Sync>;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Errors from a refresh run or from scheduling one.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("producer failed: {0}")]
    Producer(String),

    #[error("producer panicked")]
    Panicked,

    #[error("refreshed artifact not stored: {0}")]
    Store(#[from] CacheError),

    #[error("refresh scheduler is shut down")]
    ShutDown,
}

/// Result of one refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// A run for the same key was still in progress.
    Skipped,
}

/// Marks a key as being refreshed; cleared on drop.
struct RunningGuard {
    running: Arc<DashMap<CacheKey, ()>>,
    key: CacheKey,
}

impl RunningGuard {
    fn acquire(running: &Arc<DashMap<CacheKey, ()>>, key: &CacheKey) -> Option<Self> {
        match running.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    running: Arc::clone(running),
                    key: key.clone(),
                })
            }
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.remove(&self.key);
    }
}

/// Shared state a refresh task works against.
#[derive(Clone)]
struct RefreshWorker {
    coordinator: Arc<dyn CacheCoordinator>,
    running: Arc<DashMap<CacheKey, ()>>,
}

impl RefreshWorker {
    async fn refresh_once(
        &self,
        key: &CacheKey,
        producer: Producer,
        ttl: Duration,
    ) -> Result<RefreshOutcome, RefreshError> {
        let Some(_guard) = RunningGuard::acquire(&self.running, key) else {
            tracing::debug!(key = %key, "Refresh still running, skipping");
            metrics::record_refresh_run("skipped");
            return Ok(RefreshOutcome::Skipped);
        };

        match tokio::task::spawn_blocking(move || producer()).await {
            Ok(Ok((validity, artifact))) => {
                let bounded = ValidityDescriptor::Aggregate(vec![validity, ValidityDescriptor::expires_in(ttl)]);
                if let Err(e) = self.coordinator.store(key.clone(), bounded, artifact) {
                    tracing::warn!(key = %key, error = %e, "Refreshed artifact not stored");
                    metrics::record_refresh_run("failed");
                    return Err(e.into());
                }
                tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Cache entry refreshed");
                metrics::record_refresh_run("ok");
                Ok(RefreshOutcome::Refreshed)
            }
            Ok(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Refresh failed, keeping previous entry");
                metrics::record_refresh_run("failed");
                Err(RefreshError::Producer(e.to_string()))
            }
            Err(join_error) => {
                tracing::error!(key = %key, error = %join_error, "Refresh producer panicked, keeping previous entry");
                metrics::record_refresh_run("failed");
                Err(RefreshError::Panicked)
            }
        }
    }
}

/// Runs periodic refresh jobs against a cache coordinator.
pub struct RefreshScheduler {
    worker: RefreshWorker,
    jobs: DashMap<CacheKey, JoinHandle<()>>,
    shutdown: Arc<Shutdown>,
    jitter_ratio: f64,
}

impl RefreshScheduler {
    pub fn new(coordinator: Arc<dyn CacheCoordinator>, shutdown: Arc<Shutdown>, jitter_ratio: f64) -> Self {
        Self {
            worker: RefreshWorker {
                coordinator,
                running: Arc::new(DashMap::new()),
            },
            jobs: DashMap::new(),
            shutdown,
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Refresh a key right now. Skips if a run for the key is in progress.
    pub async fn refresh_once(
        &self,
        key: &CacheKey,
        producer: Producer,
        ttl: Duration,
    ) -> Result<RefreshOutcome, RefreshError> {
        self.worker.refresh_once(key, producer, ttl).await
    }

    /// Refresh `key` every `ttl`, replacing any job already scheduled for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, key: CacheKey, producer: Producer, ttl: Duration) -> Result<(), RefreshError> {
        // Subscribe before checking so a concurrent trigger is never missed.
        let mut shutdown = self.shutdown.subscribe();
        if self.shutdown.is_triggered() {
            return Err(RefreshError::ShutDown);
        }

        let period = ttl.max(MIN_PERIOD);
        let delay = self.initial_delay(period);
        let worker = self.worker.clone();
        let job_key = key.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Failures are logged by the worker; the job keeps going.
                        let _ = worker.refresh_once(&job_key, Arc::clone(&producer), period).await;
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!(key = %job_key, "Refresh job stopping");
                        break;
                    }
                }
            }
        });

        tracing::info!(key = %key, ttl_ms = period.as_millis() as u64, "Scheduled cache refresh");
        if let Some(previous) = self.jobs.insert(key, handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop the job for a key. Returns false when none was scheduled.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        match self.jobs.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop every job. Returns how many were scheduled.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<CacheKey> = self.jobs.iter().map(|r| r.key().clone()).collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    /// Number of scheduled jobs that have not finished.
    pub fn active_jobs(&self) -> usize {
        self.jobs.iter().filter(|r| !r.value().is_finished()).count()
    }

    fn initial_delay(&self, period: Duration) -> Duration {
        let max_jitter_ms = (period.as_millis() as f64 * self.jitter_ratio) as u64;
        if max_jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_jitter_ms))
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for job in self.jobs.iter() {
            job.value().abort();
        }
    }
}
