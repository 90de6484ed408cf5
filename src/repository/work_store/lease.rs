//! Recovery of expired leases.

use std::time::Duration;

use chrono::Utc;
use diesel::sql_types::{Nullable, Text};
use diesel_async::RunQueryDsl;

use super::{DieselWorkStore, LEASE_EXPIRED_ERROR};
use crate::models::{ItemStatus, LeaseSweep, RunScope};
use crate::repository::pool::{Backend, DieselError};
use crate::repository::util::{format_timestamp, to_diesel_error};
use crate::with_conn;

// Every SET expression sees the pre-update row, so both CASE branches agree
// on the attempt budget.
const SQLITE_SWEEP: &str = r#"
    UPDATE work_items
    SET status = CASE WHEN attempt_count < max_attempts THEN 'pending' ELSE 'failed' END,
        last_error = CASE WHEN attempt_count < max_attempts THEN last_error ELSE ?1 END,
        completed_at = CASE WHEN attempt_count < max_attempts THEN NULL ELSE ?2 END,
        owner = NULL,
        claimed_at = NULL
    WHERE status = 'claimed' AND claimed_at < ?3
      AND (?4 IS NULL OR run_id = ?4)
      AND (?5 IS NULL OR job_type = ?5)
    RETURNING status
"#;

const POSTGRES_SWEEP: &str = r#"
    UPDATE work_items
    SET status = CASE WHEN attempt_count < max_attempts THEN 'pending' ELSE 'failed' END,
        last_error = CASE WHEN attempt_count < max_attempts THEN last_error ELSE $1 END,
        completed_at = CASE WHEN attempt_count < max_attempts THEN NULL ELSE $2 END,
        owner = NULL,
        claimed_at = NULL
    WHERE status = 'claimed' AND claimed_at < $3
      AND ($4::text IS NULL OR run_id = $4)
      AND ($5::text IS NULL OR job_type = $5)
    RETURNING status
"#;

#[derive(diesel::QueryableByName)]
struct StatusRow {
    #[diesel(sql_type = Text)]
    status: String,
}

impl DieselWorkStore {
    /// Return claims older than `lease_duration` to the pool.
    ///
    /// Items with attempts left go back to `pending`; items that have used
    /// their whole budget become `failed` with a "lease expired" error.
    /// With a scope, only that run and job type are swept, so job types with
    /// different lease lengths do not expire each other's claims.
    pub async fn release_expired_leases(
        &self,
        lease_duration: Duration,
        scope: Option<&RunScope>,
    ) -> Result<LeaseSweep, DieselError> {
        let lease = chrono::Duration::from_std(lease_duration).map_err(to_diesel_error)?;
        let now = Utc::now();
        let cutoff = format_timestamp(now - lease);
        let now = format_timestamp(now);
        let sql = match self.pool.backend() {
            Backend::Sqlite => SQLITE_SWEEP,
            Backend::Postgres => POSTGRES_SWEEP,
        };

        let rows: Vec<StatusRow> = with_conn!(self.pool, conn => {
            diesel::sql_query(sql)
                .bind::<Text, _>(LEASE_EXPIRED_ERROR)
                .bind::<Text, _>(&now)
                .bind::<Text, _>(&cutoff)
                .bind::<Nullable<Text>, _>(scope.map(|s| s.run_id.as_str()))
                .bind::<Nullable<Text>, _>(scope.map(|s| s.job_type.as_str()))
                .load(&mut conn)
                .await?
        });

        let mut sweep = LeaseSweep::default();
        for row in rows {
            if row.status == ItemStatus::Failed.as_str() {
                sweep.failed += 1;
            } else {
                sweep.requeued += 1;
            }
        }

        if sweep.total() > 0 {
            tracing::info!(
                "Recovered {} expired leases ({} requeued, {} failed)",
                sweep.total(),
                sweep.requeued,
                sweep.failed
            );
        }
        Ok(sweep)
    }
}
