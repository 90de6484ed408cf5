//! Work queue abstraction for the claim/process/report lifecycle.
//!
//! Workers only ever see the [`WorkStore`] trait, so the loop is the same
//! whether the backlog lives in SQLite, PostgreSQL, or a test double.

mod db_store;
mod error;
pub mod handler;
mod identity;
mod signal;
pub mod worker;

pub use error::WorkQueueError;
pub use handler::{run_handler, HandlerKind, HandlerRegistry, JobHandler};
pub use identity::worker_identity;
pub use signal::StopSignal;
pub use worker::{
    RetryPolicy, Worker, WorkerConfig, WorkerEvent, WorkerState, WorkerSummary,
};

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{
    ClaimToken, EnqueueOptions, EnqueueResult, ItemOutcome, LeaseSweep, Payload, QueueStats,
    ReportResult, RunScope, WorkItem,
};

/// Shared durable backlog of work items.
///
/// Owns every state transition. Implementations keep no in-process state
/// and must be safe to call from many processes at once.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Insert payloads as pending items, skipping known content keys.
    async fn enqueue(
        &self,
        scope: &RunScope,
        payloads: &[Payload],
        options: EnqueueOptions,
    ) -> Result<EnqueueResult, WorkQueueError>;

    /// Atomically claim up to `batch_size` pending items for `owner`.
    async fn claim_batch(
        &self,
        scope: &RunScope,
        owner: &str,
        batch_size: u32,
    ) -> Result<Vec<WorkItem>, WorkQueueError>;

    /// Record an item's outcome if `owner` still holds the claim named by `claim`.
    async fn report_outcome(
        &self,
        claim: ClaimToken,
        owner: &str,
        outcome: &ItemOutcome,
    ) -> Result<ReportResult, WorkQueueError>;

    /// Recover claims older than `lease_duration`, optionally within one scope.
    async fn release_expired_leases(
        &self,
        lease_duration: Duration,
        scope: Option<&RunScope>,
    ) -> Result<LeaseSweep, WorkQueueError>;

    /// Give back claims `owner` took but never started.
    async fn release_claims(
        &self,
        owner: &str,
        claims: &[ClaimToken],
    ) -> Result<LeaseSweep, WorkQueueError>;

    async fn stats(&self, scope: &RunScope) -> Result<QueueStats, WorkQueueError>;
}
