//! Idempotent insertion of work items.

use std::collections::HashSet;

use chrono::Utc;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::DieselWorkStore;
use crate::models::{EnqueueOptions, EnqueueResult, ItemStatus, Payload, RunScope};
use crate::repository::models::NewWorkItem;
use crate::repository::pool::DieselError;
use crate::repository::util::format_timestamp;
use crate::schema::work_items;
use crate::with_conn;

impl DieselWorkStore {
    /// Insert payloads as pending items, skipping any whose content key
    /// already exists for the same run and job type.
    ///
    /// Duplicates inside `payloads` count as skipped too. The batch is
    /// written in one transaction.
    pub async fn enqueue(
        &self,
        scope: &RunScope,
        payloads: &[Payload],
        options: EnqueueOptions,
    ) -> Result<EnqueueResult, DieselError> {
        let now = format_timestamp(Utc::now());
        let mut seen = HashSet::with_capacity(payloads.len());
        let mut skipped = 0u64;
        let mut rows = Vec::with_capacity(payloads.len());

        for payload in payloads {
            let content_key = payload.content_key();
            if !seen.insert(content_key.clone()) {
                skipped += 1;
                continue;
            }
            rows.push(NewWorkItem {
                run_id: scope.run_id.clone(),
                job_type: scope.job_type.clone(),
                payload: payload.to_json(),
                content_key,
                status: ItemStatus::Pending.as_str().to_string(),
                attempt_count: 0,
                max_attempts: options.max_attempts.min(i32::MAX as u32) as i32,
                priority: options.priority,
                created_at: now.clone(),
            });
        }

        if rows.is_empty() {
            return Ok(EnqueueResult {
                inserted: 0,
                skipped,
            });
        }

        let inserted: u64 = with_conn!(self.pool, conn => {
            conn.transaction(|conn| {
                let rows = rows.clone();
                Box::pin(async move {
                    let mut inserted = 0u64;
                    for row in &rows {
                        inserted += diesel::insert_into(work_items::table)
                            .values(row)
                            .on_conflict_do_nothing()
                            .execute(conn)
                            .await? as u64;
                    }
                    Ok::<_, DieselError>(inserted)
                })
            })
            .await?
        });

        skipped += rows.len() as u64 - inserted;
        tracing::debug!(
            "Enqueued {} items into {} ({} skipped)",
            inserted,
            scope,
            skipped
        );

        Ok(EnqueueResult { inserted, skipped })
    }
}
