//! Atomic batch claiming.

use chrono::Utc;
use diesel::sql_types::{BigInt, Text};
use diesel_async::RunQueryDsl;

use super::DieselWorkStore;
use crate::models::{RunScope, WorkItem};
use crate::repository::models::WorkItemRecord;
use crate::repository::pool::DieselError;
use crate::repository::util::format_timestamp;
use crate::with_conn_split;

// Select-and-mark in one statement. The outer `status` check keeps a row that
// changed between subquery and update from being claimed twice.
const SQLITE_CLAIM: &str = r#"
    UPDATE work_items
    SET status = 'claimed', owner = ?, claimed_at = ?, attempt_count = attempt_count + 1
    WHERE status = 'pending' AND id IN (
        SELECT id FROM work_items
        WHERE run_id = ? AND job_type = ? AND status = 'pending'
        ORDER BY priority DESC, created_at ASC, id ASC
        LIMIT ?
    )
    RETURNING *
"#;

#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
const POSTGRES_CLAIM: &str = r#"
    UPDATE work_items
    SET status = 'claimed', owner = $1, claimed_at = $2, attempt_count = attempt_count + 1
    WHERE status = 'pending' AND id IN (
        SELECT id FROM work_items
        WHERE run_id = $3 AND job_type = $4 AND status = 'pending'
        ORDER BY priority DESC, created_at ASC, id ASC
        LIMIT $5
        FOR UPDATE SKIP LOCKED
    )
    RETURNING *
"#;

impl DieselWorkStore {
    /// Atomically claim up to `batch_size` pending items for `owner`.
    ///
    /// Claimed items get `status = claimed`, the owner and claim time, and an
    /// incremented attempt count. Highest priority first, then oldest. Two
    /// concurrent callers never receive the same item.
    pub async fn claim_batch(
        &self,
        scope: &RunScope,
        owner: &str,
        batch_size: u32,
    ) -> Result<Vec<WorkItem>, DieselError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let now = format_timestamp(Utc::now());
        let limit = batch_size as i64;

        let mut records: Vec<WorkItemRecord> = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(SQLITE_CLAIM)
                    .bind::<Text, _>(owner)
                    .bind::<Text, _>(&now)
                    .bind::<Text, _>(&scope.run_id)
                    .bind::<Text, _>(&scope.job_type)
                    .bind::<BigInt, _>(limit)
                    .load(&mut conn)
                    .await?
            },
            postgres: conn => {
                diesel::sql_query(POSTGRES_CLAIM)
                    .bind::<Text, _>(owner)
                    .bind::<Text, _>(&now)
                    .bind::<Text, _>(&scope.run_id)
                    .bind::<Text, _>(&scope.job_type)
                    .bind::<BigInt, _>(limit)
                    .load(&mut conn)
                    .await?
            }
        );

        // RETURNING order is unspecified.
        records.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        if !records.is_empty() {
            tracing::debug!("{} claimed {} items from {}", owner, records.len(), scope);
        }

        Ok(records.into_iter().map(WorkItem::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::super::test_support::*;
    use crate::models::{EnqueueOptions, ItemStatus, Payload};

    #[tokio::test]
    async fn test_claim_from_empty_queue() {
        let (store, _dir) = setup_store().await;
        let claimed = store.claim_batch(&scope(), "w1", 10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_claim_sets_lease_fields() {
        let (store, _dir) = setup_store().await;
        seed(&store, 3, 3).await;

        let claimed = store.claim_batch(&scope(), "w1", 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        for item in &claimed {
            assert_eq!(item.status, ItemStatus::Claimed);
            assert_eq!(item.owner.as_deref(), Some("w1"));
            assert!(item.claimed_at.is_some());
            assert_eq!(item.attempt_count, 1);
        }

        let stats = store.stats(&scope()).await.unwrap();
        assert_eq!(stats.claimed, 2);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_age() {
        let (store, _dir) = setup_store().await;
        let scope = scope();
        store
            .enqueue(
                &scope,
                &[Payload::new("https://example.gov/old-low")],
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        store
            .enqueue(
                &scope,
                &[Payload::new("https://example.gov/new-high")],
                EnqueueOptions {
                    max_attempts: 3,
                    priority: 10,
                },
            )
            .await
            .unwrap();
        store
            .enqueue(
                &scope,
                &[Payload::new("https://example.gov/new-low")],
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let claimed = store.claim_batch(&scope, "w1", 3).await.unwrap();
        let urls: Vec<_> = claimed.iter().map(|i| i.payload.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.gov/new-high",
                "https://example.gov/old-low",
                "https://example.gov/new-low",
            ]
        );
    }

    #[tokio::test]
    async fn test_claim_respects_scope() {
        let (store, _dir) = setup_store().await;
        seed(&store, 2, 3).await;

        let other = crate::models::RunScope::new("run-1", "other-job");
        assert!(store.claim_batch(&other, "w1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_batch_claims_nothing() {
        let (store, _dir) = setup_store().await;
        seed(&store, 2, 3).await;
        assert!(store.claim_batch(&scope(), "w1", 0).await.unwrap().is_empty());
        assert_eq!(store.stats(&scope()).await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let (store, _dir) = setup_store().await;
        seed(&store, 40, 3).await;

        let mut handles = Vec::new();
        for w in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let owner = format!("w{w}");
                let mut ids = Vec::new();
                loop {
                    let batch = store.claim_batch(&scope(), &owner, 3).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    ids.extend(batch.into_iter().map(|i| i.id));
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 40);
        assert_eq!(unique.len(), 40);
    }
}
