//! Data models for the fetch queue.

mod run;
mod work_item;

pub use run::{ExecutionMode, Run, RunScope};
pub use work_item::{
    ClaimToken, EnqueueOptions, EnqueueResult, ItemOutcome, ItemStatus, LeaseSweep, Payload,
    PayloadError, QueueStats, ReportResult, WorkItem,
};
