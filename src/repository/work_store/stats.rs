//! Progress counts and item inspection.

use std::collections::HashMap;

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::DieselWorkStore;
use crate::models::{ItemStatus, QueueStats, RunScope, WorkItem};
use crate::repository::models::WorkItemRecord;
use crate::repository::pool::DieselError;
use crate::schema::work_items;
use crate::with_conn;

impl DieselWorkStore {
    /// Per-status counts for one run and job type.
    pub async fn stats(&self, scope: &RunScope) -> Result<QueueStats, DieselError> {
        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn => {
            work_items::table
                .filter(work_items::run_id.eq(&scope.run_id))
                .filter(work_items::job_type.eq(&scope.job_type))
                .group_by(work_items::status)
                .select((work_items::status, count_star()))
                .load(&mut conn)
                .await?
        });

        let counts: HashMap<String, u64> = rows
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect();
        Ok(QueueStats::from_counts(&counts))
    }

    /// Items that ended in `failed`, oldest first.
    pub async fn failures(
        &self,
        scope: &RunScope,
        limit: u32,
    ) -> Result<Vec<WorkItem>, DieselError> {
        let limit = limit as i64;
        with_conn!(self.pool, conn => {
            work_items::table
                .filter(work_items::run_id.eq(&scope.run_id))
                .filter(work_items::job_type.eq(&scope.job_type))
                .filter(work_items::status.eq(ItemStatus::Failed.as_str()))
                .order(work_items::id.asc())
                .limit(limit)
                .load::<WorkItemRecord>(&mut conn)
                .await
                .map(|records| records.into_iter().map(WorkItem::from).collect())
        })
    }

    /// Fetch a single item by id.
    pub async fn get_item(&self, item_id: i64) -> Result<Option<WorkItem>, DieselError> {
        with_conn!(self.pool, conn => {
            work_items::table
                .find(item_id)
                .first::<WorkItemRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(WorkItem::from))
        })
    }

    /// All items of a run and job type, in insertion order.
    pub async fn list_items(&self, scope: &RunScope) -> Result<Vec<WorkItem>, DieselError> {
        with_conn!(self.pool, conn => {
            work_items::table
                .filter(work_items::run_id.eq(&scope.run_id))
                .filter(work_items::job_type.eq(&scope.job_type))
                .order(work_items::id.asc())
                .load::<WorkItemRecord>(&mut conn)
                .await
                .map(|records| records.into_iter().map(WorkItem::from).collect())
        })
    }
}
