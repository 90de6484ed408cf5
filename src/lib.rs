//! fetchqueue - crash-tolerant distributed URL job queue.
//!
//! Many independent worker processes pull units of fetch work from a shared
//! SQLite or PostgreSQL backlog without colliding. Failed work is retried up
//! to a per-item budget and work abandoned by a crashed worker is recovered
//! once its lease expires. The [`orchestrator`] creates runs, seeds the
//! backlog and reports progress.

pub mod config;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod schema;
pub mod work_queue;

pub use config::{Config, JobConfig, LoadOptions, Settings, WorkerSettings};
pub use models::{
    EnqueueOptions, EnqueueResult, ExecutionMode, ItemOutcome, ItemStatus, LeaseSweep, Payload,
    QueueStats, ReportResult, Run, RunScope, WorkItem,
};
pub use orchestrator::{LocalRunReport, Orchestrator, RunReceipt, StartedRun};
pub use repository::{DbContext, DieselWorkStore};
pub use work_queue::{
    HandlerKind, HandlerRegistry, JobHandler, StopSignal, Worker, WorkerConfig, WorkerEvent,
    WorkerState, WorkerSummary, WorkQueueError, WorkStore,
};
