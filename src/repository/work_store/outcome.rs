//! Outcome reporting and early claim release.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::{DieselWorkStore, RELEASED_ERROR};
use crate::models::{ClaimToken, ItemOutcome, ItemStatus, LeaseSweep, ReportResult};
use crate::repository::pool::DieselError;
use crate::repository::util::format_timestamp;
use crate::schema::work_items;
use crate::with_conn;

impl DieselWorkStore {
    /// Record the result of processing a claimed item.
    ///
    /// Only applies while `owner` still holds the exact claim named by
    /// `claim`. A report for a lease that was recovered and claimed again,
    /// by another worker or by the same owner on a later attempt, returns
    /// [`ReportResult::StaleClaim`] and changes nothing.
    pub async fn report_outcome(
        &self,
        claim: ClaimToken,
        owner: &str,
        outcome: &ItemOutcome,
    ) -> Result<ReportResult, DieselError> {
        let now = format_timestamp(Utc::now());
        let claimed = ItemStatus::Claimed.as_str();
        let attempt = claim.attempt_column();

        let result = with_conn!(self.pool, conn => {
            match outcome {
                ItemOutcome::Completed => {
                    let updated = diesel::update(
                        work_items::table
                            .filter(work_items::id.eq(claim.item_id))
                            .filter(work_items::owner.eq(owner))
                            .filter(work_items::status.eq(claimed))
                            .filter(work_items::attempt_count.eq(attempt)),
                    )
                    .set((
                        work_items::status.eq(ItemStatus::Completed.as_str()),
                        work_items::owner.eq(None::<String>),
                        work_items::claimed_at.eq(None::<String>),
                        work_items::completed_at.eq(Some(now.as_str())),
                    ))
                    .execute(&mut conn)
                    .await?;

                    if updated > 0 {
                        ReportResult::Completed
                    } else {
                        ReportResult::StaleClaim
                    }
                }
                ItemOutcome::Failed { error } => {
                    let requeued = diesel::update(
                        work_items::table
                            .filter(work_items::id.eq(claim.item_id))
                            .filter(work_items::owner.eq(owner))
                            .filter(work_items::status.eq(claimed))
                            .filter(work_items::attempt_count.eq(attempt))
                            .filter(work_items::attempt_count.lt(work_items::max_attempts)),
                    )
                    .set((
                        work_items::status.eq(ItemStatus::Pending.as_str()),
                        work_items::owner.eq(None::<String>),
                        work_items::claimed_at.eq(None::<String>),
                        work_items::last_error.eq(Some(error.as_str())),
                    ))
                    .execute(&mut conn)
                    .await?;

                    if requeued > 0 {
                        ReportResult::Requeued
                    } else {
                        let failed = diesel::update(
                            work_items::table
                                .filter(work_items::id.eq(claim.item_id))
                                .filter(work_items::owner.eq(owner))
                                .filter(work_items::status.eq(claimed))
                                .filter(work_items::attempt_count.eq(attempt))
                                .filter(work_items::attempt_count.ge(work_items::max_attempts)),
                        )
                        .set((
                            work_items::status.eq(ItemStatus::Failed.as_str()),
                            work_items::owner.eq(None::<String>),
                            work_items::claimed_at.eq(None::<String>),
                            work_items::last_error.eq(Some(error.as_str())),
                            work_items::completed_at.eq(Some(now.as_str())),
                        ))
                        .execute(&mut conn)
                        .await?;

                        if failed > 0 {
                            ReportResult::Failed
                        } else {
                            ReportResult::StaleClaim
                        }
                    }
                }
            }
        });

        if result == ReportResult::StaleClaim {
            tracing::warn!(
                "Ignoring stale report for item {} attempt {} from {}: claim no longer held",
                claim.item_id,
                claim.attempt,
                owner
            );
        }

        Ok(result)
    }

    /// Give back claimed items that were never started.
    ///
    /// Applies the same budget rule as lease expiry: items with attempts
    /// left return to `pending`, the rest become `failed`. Claims no longer
    /// held by `owner` under the given token are left alone. All releases
    /// commit together.
    pub async fn release_claims(
        &self,
        owner: &str,
        claims: &[ClaimToken],
    ) -> Result<LeaseSweep, DieselError> {
        if claims.is_empty() {
            return Ok(LeaseSweep::default());
        }
        let now = format_timestamp(Utc::now());
        let owner = owner.to_string();
        let claims = claims.to_vec();

        let sweep = with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                let owner = owner.clone();
                let claims = claims.clone();
                let now = now.clone();
                Box::pin(async move {
                    let claimed = ItemStatus::Claimed.as_str();
                    let mut sweep = LeaseSweep::default();
                    for claim in &claims {
                        let attempt = claim.attempt_column();
                        let requeued = diesel::update(
                            work_items::table
                                .filter(work_items::id.eq(claim.item_id))
                                .filter(work_items::owner.eq(owner.as_str()))
                                .filter(work_items::status.eq(claimed))
                                .filter(work_items::attempt_count.eq(attempt))
                                .filter(work_items::attempt_count.lt(work_items::max_attempts)),
                        )
                        .set((
                            work_items::status.eq(ItemStatus::Pending.as_str()),
                            work_items::owner.eq(None::<String>),
                            work_items::claimed_at.eq(None::<String>),
                        ))
                        .execute(conn)
                        .await?;
                        if requeued > 0 {
                            sweep.requeued += 1;
                            continue;
                        }

                        let failed = diesel::update(
                            work_items::table
                                .filter(work_items::id.eq(claim.item_id))
                                .filter(work_items::owner.eq(owner.as_str()))
                                .filter(work_items::status.eq(claimed))
                                .filter(work_items::attempt_count.eq(attempt)),
                        )
                        .set((
                            work_items::status.eq(ItemStatus::Failed.as_str()),
                            work_items::owner.eq(None::<String>),
                            work_items::claimed_at.eq(None::<String>),
                            work_items::last_error.eq(Some(RELEASED_ERROR)),
                            work_items::completed_at.eq(Some(now.as_str())),
                        ))
                        .execute(conn)
                        .await?;
                        sweep.failed += failed as u64;
                    }
                    Ok::<_, DieselError>(sweep)
                })
            })
            .await?
        });

        tracing::debug!(
            "{} released {} claims ({} requeued, {} failed)",
            owner,
            sweep.total(),
            sweep.requeued,
            sweep.failed
        );
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::RELEASED_ERROR;
    use crate::models::{ItemOutcome, ItemStatus, ReportResult};

    #[tokio::test]
    async fn test_report_completed() {
        let (store, _dir) = setup_store().await;
        seed(&store, 1, 3).await;
        let item = store.claim_batch(&scope(), "w1", 1).await.unwrap().remove(0);

        let result = store
            .report_outcome(item.claim_token(), "w1", &ItemOutcome::Completed)
            .await
            .unwrap();
        assert_eq!(result, ReportResult::Completed);

        let item = store.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert!(item.status.is_terminal());
        assert!(item.owner.is_none());
        assert!(item.claimed_at.is_none());
        assert!(item.completed_at.is_some());
        assert_eq!(item.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_report_from_wrong_owner_is_stale() {
        let (store, _dir) = setup_store().await;
        seed(&store, 1, 3).await;
        let item = store.claim_batch(&scope(), "w1", 1).await.unwrap().remove(0);

        let result = store
            .report_outcome(item.claim_token(), "w2", &ItemOutcome::Completed)
            .await
            .unwrap();
        assert_eq!(result, ReportResult::StaleClaim);

        let item = store.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Claimed);
        assert_eq!(item.owner.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_failure_requeues_until_budget_spent() {
        let (store, _dir) = setup_store().await;
        seed(&store, 1, 2).await;

        let item = store.claim_batch(&scope(), "w1", 1).await.unwrap().remove(0);
        let result = store
            .report_outcome(item.claim_token(), "w1", &ItemOutcome::failed("HTTP 503"))
            .await
            .unwrap();
        assert_eq!(result, ReportResult::Requeued);

        let requeued = store.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, ItemStatus::Pending);
        assert_eq!(requeued.last_error.as_deref(), Some("HTTP 503"));
        assert!(requeued.owner.is_none());

        let item = store.claim_batch(&scope(), "w2", 1).await.unwrap().remove(0);
        assert_eq!(item.attempt_count, 2);
        let result = store
            .report_outcome(item.claim_token(), "w2", &ItemOutcome::failed("HTTP 404"))
            .await
            .unwrap();
        assert_eq!(result, ReportResult::Failed);

        let failed = store.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ItemStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 404"));
        assert!(failed.completed_at.is_some());

        assert!(store.claim_batch(&scope(), "w3", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_after_completion_is_stale() {
        let (store, _dir) = setup_store().await;
        seed(&store, 1, 3).await;
        let item = store.claim_batch(&scope(), "w1", 1).await.unwrap().remove(0);
        store
            .report_outcome(item.claim_token(), "w1", &ItemOutcome::Completed)
            .await
            .unwrap();

        let again = store
            .report_outcome(item.claim_token(), "w1", &ItemOutcome::failed("late"))
            .await
            .unwrap();
        assert_eq!(again, ReportResult::StaleClaim);
        let item = store.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert!(item.last_error.is_none());
    }

    #[tokio::test]
    async fn test_release_claims() {
        let (store, _dir) = setup_store().await;
        seed(&store, 3, 1).await;
        seed_more(&store).await;

        let claimed = store.claim_batch(&scope(), "w1", 10).await.unwrap();
        assert_eq!(claimed.len(), 4);
        let tokens: Vec<_> = claimed.iter().map(|i| i.claim_token()).collect();

        // Wrong owner: nothing happens.
        let sweep = store.release_claims("w2", &tokens).await.unwrap();
        assert_eq!(sweep.total(), 0);

        let sweep = store.release_claims("w1", &tokens).await.unwrap();
        // max_attempts = 1 items are spent; the one with budget 3 returns.
        assert_eq!(sweep.requeued, 1);
        assert_eq!(sweep.failed, 3);

        let failed = store.failures(&scope(), 10).await.unwrap();
        assert_eq!(failed.len(), 3);
        assert!(failed
            .iter()
            .all(|i| i.last_error.as_deref() == Some(RELEASED_ERROR)));
        assert!(failed.iter().all(|i| i.status.is_terminal()));
    }

    async fn seed_more(store: &crate::repository::DieselWorkStore) {
        store
            .enqueue(
                &scope(),
                &[crate::models::Payload::new("https://example.gov/extra")],
                crate::models::EnqueueOptions {
                    max_attempts: 3,
                    priority: 0,
                },
            )
            .await
            .unwrap();
    }
}
