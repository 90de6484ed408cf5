//! Run registry.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::DieselWorkStore;
use crate::models::{Run, RunScope};
use crate::repository::models::{NewRun, RunRecord};
use crate::repository::pool::DieselError;
use crate::repository::util::format_timestamp;
use crate::schema::runs;
use crate::with_conn;

impl DieselWorkStore {
    /// Register a run. Returns `false` if it already exists.
    pub async fn create_run(&self, run: &Run) -> Result<bool, DieselError> {
        let created_at = format_timestamp(run.created_at);
        let new_run = NewRun {
            run_id: &run.run_id,
            job_type: &run.job_type,
            mode: run.mode.as_str(),
            created_at: &created_at,
        };

        let inserted = with_conn!(self.pool, conn => {
            diesel::insert_into(runs::table)
                .values(&new_run)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await?
        });
        Ok(inserted > 0)
    }

    pub async fn get_run(&self, scope: &RunScope) -> Result<Option<Run>, DieselError> {
        with_conn!(self.pool, conn => {
            runs::table
                .find((&scope.run_id, &scope.job_type))
                .first::<RunRecord>(&mut conn)
                .await
                .optional()
                .map(|r| r.map(Run::from))
        })
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, DieselError> {
        let limit = limit as i64;
        with_conn!(self.pool, conn => {
            runs::table
                .order((runs::created_at.desc(), runs::run_id.desc()))
                .limit(limit)
                .load::<RunRecord>(&mut conn)
                .await
                .map(|records| records.into_iter().map(Run::from).collect())
        })
    }
}
