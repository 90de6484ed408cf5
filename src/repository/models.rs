//! Diesel ORM models for database tables.
//!
//! Records mirror the table layout exactly; conversion into domain models
//! happens here so the rest of the crate never sees raw column strings.

use diesel::prelude::*;

use super::util::{parse_datetime, parse_datetime_opt};
use crate::models::{ExecutionMode, ItemStatus, Payload, Run, WorkItem};
use crate::schema;

/// Work item record from the database.
///
/// Derives `QueryableByName` as well so raw `UPDATE ... RETURNING` queries can
/// load it directly.
#[derive(Queryable, QueryableByName, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::work_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkItemRecord {
    pub id: i64,
    pub run_id: String,
    pub job_type: String,
    pub payload: String,
    pub content_key: String,
    pub status: String,
    pub owner: Option<String>,
    pub claimed_at: Option<String>,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// New work item for insertion.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::work_items)]
pub struct NewWorkItem {
    pub run_id: String,
    pub job_type: String,
    pub payload: String,
    pub content_key: String,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub created_at: String,
}

/// Run record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::runs)]
#[diesel(primary_key(run_id, job_type))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RunRecord {
    pub run_id: String,
    pub job_type: String,
    pub mode: String,
    pub created_at: String,
}

/// New run for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::runs)]
pub struct NewRun<'a> {
    pub run_id: &'a str,
    pub job_type: &'a str,
    pub mode: &'a str,
    pub created_at: &'a str,
}

impl From<WorkItemRecord> for WorkItem {
    fn from(record: WorkItemRecord) -> Self {
        WorkItem {
            id: record.id,
            payload: Payload::from_stored(&record.payload),
            status: ItemStatus::from_str(&record.status).unwrap_or(ItemStatus::Pending),
            claimed_at: parse_datetime_opt(record.claimed_at.as_deref()),
            attempt_count: record.attempt_count.max(0) as u32,
            max_attempts: record.max_attempts.max(0) as u32,
            created_at: parse_datetime(&record.created_at),
            completed_at: parse_datetime_opt(record.completed_at.as_deref()),
            run_id: record.run_id,
            job_type: record.job_type,
            content_key: record.content_key,
            owner: record.owner,
            priority: record.priority,
            last_error: record.last_error,
        }
    }
}

impl From<RunRecord> for Run {
    fn from(record: RunRecord) -> Self {
        Run {
            mode: ExecutionMode::from_str(&record.mode).unwrap_or_default(),
            created_at: parse_datetime(&record.created_at),
            run_id: record.run_id,
            job_type: record.job_type,
        }
    }
}
