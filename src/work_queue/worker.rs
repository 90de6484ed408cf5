//! Worker loop: claim a batch, process each item, report each outcome.
//!
//! The worker holds no authoritative state. Everything it learns goes to the
//! store immediately; the counters in [`WorkerSummary`] are diagnostics for
//! this session only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::handler::{run_handler, JobHandler};
use super::identity::worker_identity;
use super::signal::StopSignal;
use super::{WorkQueueError, WorkStore};
use crate::config::{JobConfig, WorkerSettings};
use crate::models::{ClaimToken, ItemOutcome, ReportResult, RunScope, WorkItem};

/// Backoff applied to store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failures after which the worker gives up.
    pub max_failures: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_failures: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `failures` (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Configuration for one worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub scope: RunScope,
    pub batch_size: u32,
    pub lease_duration: Duration,
    pub poll_interval: Duration,
    /// Items processed at once within a batch.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl WorkerConfig {
    pub fn new(scope: RunScope) -> Self {
        Self {
            scope,
            batch_size: 10,
            lease_duration: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }

    /// Build from the job type's static config and the shared worker settings.
    pub fn from_settings(scope: RunScope, job: &JobConfig, worker: &WorkerSettings) -> Self {
        Self {
            scope,
            batch_size: job.batch_size,
            lease_duration: job.lease_duration(),
            poll_interval: Duration::from_millis(worker.poll_interval_ms),
            concurrency: job.concurrency,
            retry: RetryPolicy {
                initial: Duration::from_millis(worker.store_retry_initial_ms),
                max: Duration::from_millis(worker.store_retry_max_ms),
                max_failures: worker.max_store_failures,
            },
        }
    }
}

/// Lifecycle state of a worker.
///
/// With `concurrency > 1`, `Processing` and `Reporting` reflect the most
/// recent item transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Polling,
    Processing,
    Reporting,
    Draining,
    Stopped,
}

/// Events emitted while a worker runs.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    StateChanged {
        state: WorkerState,
    },
    /// This worker's sweep recovered expired claims.
    LeasesRecovered {
        requeued: u64,
        failed: u64,
    },
    BatchClaimed {
        count: usize,
    },
    ItemStarted {
        item_id: i64,
        url: String,
        attempt: u32,
    },
    ItemCompleted {
        item_id: i64,
        url: String,
    },
    ItemFailed {
        item_id: i64,
        url: String,
        error: String,
        /// Whether the item went back to `pending`.
        requeued: bool,
    },
    /// The claim was lost before the report landed.
    ItemStale {
        item_id: i64,
        url: String,
    },
    /// Claimed items given back on stop.
    ClaimsReleased {
        requeued: u64,
        failed: u64,
    },
    StoreError {
        error: String,
        consecutive: u32,
        retry_in: Duration,
    },
}

/// Session-local counters, returned when the worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub owner: String,
    pub claimed: u64,
    pub completed: u64,
    pub requeued: u64,
    pub failed: u64,
    pub stale: u64,
    pub released: u64,
    pub leases_recovered: u64,
    pub store_errors: u64,
}

#[derive(Default)]
struct Counters {
    claimed: AtomicU64,
    completed: AtomicU64,
    requeued: AtomicU64,
    failed: AtomicU64,
    stale: AtomicU64,
    released: AtomicU64,
    leases_recovered: AtomicU64,
    store_errors: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self, owner: &str) -> WorkerSummary {
        WorkerSummary {
            owner: owner.to_string(),
            claimed: self.claimed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            leases_recovered: self.leases_recovered.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

enum ItemDisposition {
    Reported,
    /// Stop was raised before the handler ran.
    Unstarted(ClaimToken),
}

/// Drains one `(run_id, job_type)` with an injected handler.
pub struct Worker {
    store: Arc<dyn WorkStore>,
    handler: Box<dyn JobHandler>,
    config: WorkerConfig,
    owner: String,
    stop: StopSignal,
    events: Option<mpsc::Sender<WorkerEvent>>,
    state: watch::Sender<WorkerState>,
    counters: Counters,
}

impl Worker {
    pub fn new(
        store: Arc<dyn WorkStore>,
        handler: Box<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            store,
            handler,
            config,
            owner: worker_identity(),
            stop: StopSignal::new(),
            events: None,
            state,
            counters: Counters::default(),
        }
    }

    /// Override the generated owner id.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Share a stop signal with the caller.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Send progress events to a channel.
    pub fn with_events(mut self, events: mpsc::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until the scope is drained, stop is raised, or the store stays
    /// unreachable for `max_failures` consecutive attempts.
    ///
    /// The handler's `teardown` runs on every exit path once `setup` has
    /// been reached. A zero batch size is rejected before that.
    pub async fn run(mut self) -> Result<WorkerSummary, WorkQueueError> {
        if self.config.batch_size == 0 {
            return Err(WorkQueueError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        self.set_state(WorkerState::Starting).await;
        tracing::info!(
            "Worker {} starting on {} (batch {}, lease {:?}, concurrency {})",
            self.owner,
            self.config.scope,
            self.config.batch_size,
            self.config.lease_duration,
            self.config.concurrency
        );

        let result = match self.handler.setup().await {
            Ok(()) => self.run_loop().await,
            Err(e) => Err(WorkQueueError::HandlerSetup {
                job_type: self.config.scope.job_type.clone(),
                message: format!("{e:#}"),
            }),
        };

        self.handler.teardown().await;
        self.set_state(WorkerState::Stopped).await;

        let summary = self.counters.snapshot(&self.owner);
        match &result {
            Ok(()) => tracing::info!(
                "Worker {} stopped: {} completed, {} requeued, {} failed",
                self.owner,
                summary.completed,
                summary.requeued,
                summary.failed
            ),
            Err(e) => tracing::error!("Worker {} stopped with error: {}", self.owner, e),
        }
        result.map(|_| summary)
    }

    async fn run_loop(&self) -> Result<(), WorkQueueError> {
        let mut failures = 0u32;

        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }

            self.set_state(WorkerState::Polling).await;
            let batch = match self.poll().await {
                Ok(batch) => {
                    failures = 0;
                    batch
                }
                Err(e) => {
                    let delay = self.note_store_failure(&mut failures, e).await?;
                    if self.sleep_or_stop(delay).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                self.set_state(WorkerState::Draining).await;
                match self.store.stats(&self.config.scope).await {
                    Ok(stats) if stats.is_drained() => {
                        tracing::info!("{} drained", self.config.scope);
                        return Ok(());
                    }
                    Ok(stats) => {
                        failures = 0;
                        tracing::debug!(
                            "Nothing claimable, {} still held by other workers",
                            stats.claimed
                        );
                    }
                    Err(e) => {
                        let delay = self.note_store_failure(&mut failures, e).await?;
                        if self.sleep_or_stop(delay).await {
                            return Ok(());
                        }
                        continue;
                    }
                }
                if self.sleep_or_stop(self.config.poll_interval).await {
                    return Ok(());
                }
                continue;
            }

            self.process_batch(batch).await?;
        }
    }

    /// Sweep this scope's expired leases, then claim a batch.
    async fn poll(&self) -> Result<Vec<WorkItem>, WorkQueueError> {
        let sweep = self
            .store
            .release_expired_leases(self.config.lease_duration, Some(&self.config.scope))
            .await?;
        if sweep.total() > 0 {
            Counters::add(&self.counters.leases_recovered, sweep.total());
            self.emit(WorkerEvent::LeasesRecovered {
                requeued: sweep.requeued,
                failed: sweep.failed,
            })
            .await;
        }

        let batch = self
            .store
            .claim_batch(&self.config.scope, &self.owner, self.config.batch_size)
            .await?;
        if !batch.is_empty() {
            Counters::add(&self.counters.claimed, batch.len() as u64);
            self.emit(WorkerEvent::BatchClaimed { count: batch.len() })
                .await;
        }
        Ok(batch)
    }

    /// Process and report every item of a batch before returning.
    async fn process_batch(&self, batch: Vec<WorkItem>) -> Result<(), WorkQueueError> {
        let concurrency = self.config.concurrency.max(1);
        let mut results = futures::stream::iter(batch)
            .map(|item| self.handle_item(item))
            .buffer_unordered(concurrency);

        let mut unstarted = Vec::new();
        while let Some(result) = results.next().await {
            if let ItemDisposition::Unstarted(claim) = result? {
                unstarted.push(claim);
            }
        }
        drop(results);

        if !unstarted.is_empty() {
            self.release_unstarted(&unstarted).await?;
        }
        Ok(())
    }

    async fn handle_item(&self, item: WorkItem) -> Result<ItemDisposition, WorkQueueError> {
        if self.stop.is_stopped() {
            return Ok(ItemDisposition::Unstarted(item.claim_token()));
        }

        self.set_state(WorkerState::Processing).await;
        tracing::debug!(
            "Processing item {} ({}), attempt {}/{}",
            item.id,
            item.payload.url,
            item.attempt_count,
            item.max_attempts
        );
        self.emit(WorkerEvent::ItemStarted {
            item_id: item.id,
            url: item.payload.url.clone(),
            attempt: item.attempt_count,
        })
        .await;

        let outcome = run_handler(self.handler.as_ref(), &item.payload).await;

        self.set_state(WorkerState::Reporting).await;
        let result = self.report(&item, &outcome).await?;

        let url = item.payload.url;
        match (result, outcome) {
            (ReportResult::Completed, _) => {
                Counters::add(&self.counters.completed, 1);
                self.emit(WorkerEvent::ItemCompleted {
                    item_id: item.id,
                    url,
                })
                .await;
            }
            (ReportResult::Requeued, ItemOutcome::Failed { error }) => {
                Counters::add(&self.counters.requeued, 1);
                tracing::warn!("Item {} failed, will retry: {}", item.id, error);
                self.emit(WorkerEvent::ItemFailed {
                    item_id: item.id,
                    url,
                    error,
                    requeued: true,
                })
                .await;
            }
            (ReportResult::Failed, ItemOutcome::Failed { error }) => {
                Counters::add(&self.counters.failed, 1);
                tracing::warn!("Item {} failed permanently: {}", item.id, error);
                self.emit(WorkerEvent::ItemFailed {
                    item_id: item.id,
                    url,
                    error,
                    requeued: false,
                })
                .await;
            }
            (ReportResult::StaleClaim, _) => {
                Counters::add(&self.counters.stale, 1);
                self.emit(WorkerEvent::ItemStale {
                    item_id: item.id,
                    url,
                })
                .await;
            }
            // The store only answers Requeued/Failed to a failure report.
            (ReportResult::Requeued | ReportResult::Failed, ItemOutcome::Completed) => {}
        }

        Ok(ItemDisposition::Reported)
    }

    /// Report one outcome, retrying store errors with backoff.
    async fn report(
        &self,
        item: &WorkItem,
        outcome: &ItemOutcome,
    ) -> Result<ReportResult, WorkQueueError> {
        let mut failures = 0u32;
        loop {
            match self
                .store
                .report_outcome(item.claim_token(), &self.owner, outcome)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let delay = self.note_store_failure(&mut failures, e).await?;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn release_unstarted(&self, claims: &[ClaimToken]) -> Result<(), WorkQueueError> {
        let mut failures = 0u32;
        let sweep = loop {
            match self.store.release_claims(&self.owner, claims).await {
                Ok(sweep) => break sweep,
                Err(e) => {
                    let delay = self.note_store_failure(&mut failures, e).await?;
                    tokio::time::sleep(delay).await;
                }
            }
        };

        Counters::add(&self.counters.released, sweep.total());
        tracing::info!(
            "Released {} unstarted claims ({} requeued, {} failed)",
            sweep.total(),
            sweep.requeued,
            sweep.failed
        );
        self.emit(WorkerEvent::ClaimsReleased {
            requeued: sweep.requeued,
            failed: sweep.failed,
        })
        .await;
        Ok(())
    }

    /// Count a store failure and return the delay before the next try, or
    /// give up once the policy's limit is reached.
    async fn note_store_failure(
        &self,
        failures: &mut u32,
        error: WorkQueueError,
    ) -> Result<Duration, WorkQueueError> {
        *failures += 1;
        Counters::add(&self.counters.store_errors, 1);

        if *failures >= self.config.retry.max_failures {
            return Err(WorkQueueError::StoreUnavailable {
                attempts: *failures,
                last_error: error.to_string(),
            });
        }

        let delay = self.config.retry.delay(*failures);
        tracing::warn!(
            "Store error ({} consecutive), retrying in {:?}: {}",
            failures,
            delay,
            error
        );
        self.emit(WorkerEvent::StoreError {
            error: error.to_string(),
            consecutive: *failures,
            retry_in: delay,
        })
        .await;
        Ok(delay)
    }

    /// Sleep, waking early on stop. Returns `true` if stopped.
    async fn sleep_or_stop(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.stop.is_stopped(),
            _ = self.stop.stopped() => true,
        }
    }

    async fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            self.emit(WorkerEvent::StateChanged { state }).await;
        }
    }

    async fn emit(&self, event: WorkerEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }
}
