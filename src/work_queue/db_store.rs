//! Database-backed work store.
//!
//! Wraps `DieselWorkStore` methods; no new queries.

use std::time::Duration;

use async_trait::async_trait;

use super::{WorkQueueError, WorkStore};
use crate::models::{
    ClaimToken, EnqueueOptions, EnqueueResult, ItemOutcome, LeaseSweep, Payload, QueueStats,
    ReportResult, RunScope, WorkItem,
};
use crate::repository::DieselWorkStore;

#[async_trait]
impl WorkStore for DieselWorkStore {
    async fn enqueue(
        &self,
        scope: &RunScope,
        payloads: &[Payload],
        options: EnqueueOptions,
    ) -> Result<EnqueueResult, WorkQueueError> {
        Ok(DieselWorkStore::enqueue(self, scope, payloads, options).await?)
    }

    async fn claim_batch(
        &self,
        scope: &RunScope,
        owner: &str,
        batch_size: u32,
    ) -> Result<Vec<WorkItem>, WorkQueueError> {
        Ok(DieselWorkStore::claim_batch(self, scope, owner, batch_size).await?)
    }

    async fn report_outcome(
        &self,
        claim: ClaimToken,
        owner: &str,
        outcome: &ItemOutcome,
    ) -> Result<ReportResult, WorkQueueError> {
        Ok(DieselWorkStore::report_outcome(self, claim, owner, outcome).await?)
    }

    async fn release_expired_leases(
        &self,
        lease_duration: Duration,
        scope: Option<&RunScope>,
    ) -> Result<LeaseSweep, WorkQueueError> {
        Ok(DieselWorkStore::release_expired_leases(self, lease_duration, scope).await?)
    }

    async fn release_claims(
        &self,
        owner: &str,
        claims: &[ClaimToken],
    ) -> Result<LeaseSweep, WorkQueueError> {
        Ok(DieselWorkStore::release_claims(self, owner, claims).await?)
    }

    async fn stats(&self, scope: &RunScope) -> Result<QueueStats, WorkQueueError> {
        Ok(DieselWorkStore::stats(self, scope).await?)
    }
}
