//! Control plane: start runs, seed the store, report progress.
//!
//! Execution mode is static per job type. Local runs never touch the store;
//! distributed runs only enqueue and leave processing to independent workers.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::config::{Config, JobConfig};
use crate::models::{
    ExecutionMode, ItemOutcome, LeaseSweep, Payload, QueueStats, Run, RunScope, WorkItem,
};
use crate::repository::DieselWorkStore;
use crate::work_queue::{run_handler, HandlerRegistry, JobHandler, WorkQueueError};

/// Result of starting a distributed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReceipt {
    pub run_id: String,
    pub job_type: String,
    pub enqueued: u64,
    pub skipped: u64,
    pub mode: ExecutionMode,
}

/// A payload that failed every local attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFailure {
    pub url: String,
    pub attempts: u32,
    pub error: String,
}

/// Result of a run executed in-process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalRunReport {
    pub run_id: String,
    pub job_type: String,
    pub completed: u64,
    pub failed: u64,
    /// Duplicate payloads dropped before processing.
    pub skipped: u64,
    pub failures: Vec<LocalFailure>,
}

/// What `start_run` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StartedRun {
    Local(LocalRunReport),
    Distributed(RunReceipt),
}

impl StartedRun {
    pub fn run_id(&self) -> &str {
        match self {
            StartedRun::Local(report) => &report.run_id,
            StartedRun::Distributed(receipt) => &receipt.run_id,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            StartedRun::Local(_) => ExecutionMode::Local,
            StartedRun::Distributed(_) => ExecutionMode::Distributed,
        }
    }
}

/// Creates runs and answers progress queries.
pub struct Orchestrator {
    config: Config,
    store: DieselWorkStore,
    registry: HandlerRegistry,
}

impl Orchestrator {
    /// Orchestrator with the built-in handlers of every configured job type.
    pub fn new(config: Config, store: DieselWorkStore) -> Self {
        let registry = config.handler_registry();
        Self {
            config,
            store,
            registry,
        }
    }

    /// Register a custom handler, replacing the configured built-in.
    pub fn register<F>(&mut self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn JobHandler> + Send + Sync + 'static,
    {
        self.registry.register(job_type, factory);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &DieselWorkStore {
        &self.store
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Start a run of `job_type` over `payloads` in the configured mode.
    ///
    /// `run_id` reuses an existing run (re-seeding adds only new payloads);
    /// otherwise a fresh id is generated.
    pub async fn start_run(
        &self,
        job_type: &str,
        payloads: &[Payload],
        run_id: Option<String>,
    ) -> Result<StartedRun, WorkQueueError> {
        let job = self.config.job(job_type)?;
        for payload in payloads {
            payload.validate()?;
        }
        let run_id = run_id.unwrap_or_else(RunScope::generate_run_id);
        let scope = RunScope::new(run_id, job_type);

        match job.mode {
            ExecutionMode::Local => self
                .run_local(&scope, job, payloads)
                .await
                .map(StartedRun::Local),
            ExecutionMode::Distributed => self
                .seed(&scope, job, payloads)
                .await
                .map(StartedRun::Distributed),
        }
    }

    /// Record the run and enqueue its payloads. No workers are launched.
    async fn seed(
        &self,
        scope: &RunScope,
        job: &JobConfig,
        payloads: &[Payload],
    ) -> Result<RunReceipt, WorkQueueError> {
        let run = Run::new(&scope.run_id, &scope.job_type, ExecutionMode::Distributed);
        if !self.store.create_run(&run).await? {
            tracing::info!("Re-seeding existing run {}", scope);
        }

        let result = self
            .store
            .enqueue(scope, payloads, job.enqueue_options())
            .await?;
        tracing::info!(
            "Seeded {}: {} enqueued, {} already present",
            scope,
            result.inserted,
            result.skipped
        );

        Ok(RunReceipt {
            run_id: scope.run_id.clone(),
            job_type: scope.job_type.clone(),
            enqueued: result.inserted,
            skipped: result.skipped,
            mode: ExecutionMode::Distributed,
        })
    }

    /// Process every payload in this process, retrying each up to
    /// `max_attempts`.
    async fn run_local(
        &self,
        scope: &RunScope,
        job: &JobConfig,
        payloads: &[Payload],
    ) -> Result<LocalRunReport, WorkQueueError> {
        let mut handler = self.registry.create(&scope.job_type)?;
        if let Err(e) = handler.setup().await {
            handler.teardown().await;
            return Err(WorkQueueError::HandlerSetup {
                job_type: scope.job_type.clone(),
                message: format!("{e:#}"),
            });
        }

        let mut seen = HashSet::with_capacity(payloads.len());
        let unique: Vec<&Payload> = payloads
            .iter()
            .filter(|p| seen.insert(p.content_key()))
            .collect();

        let mut report = LocalRunReport {
            run_id: scope.run_id.clone(),
            job_type: scope.job_type.clone(),
            skipped: (payloads.len() - unique.len()) as u64,
            ..Default::default()
        };

        tracing::info!("Running {} locally: {} payloads", scope, unique.len());

        let max_attempts = job.max_attempts.max(1);
        let handler_ref: &dyn JobHandler = handler.as_ref();
        let mut results = futures::stream::iter(unique)
            .map(|payload| process_with_retries(handler_ref, payload, max_attempts))
            .buffer_unordered(job.concurrency.max(1));

        while let Some(failure) = results.next().await {
            match failure {
                None => report.completed += 1,
                Some(failure) => {
                    tracing::warn!(
                        "{} failed after {} attempts: {}",
                        failure.url,
                        failure.attempts,
                        failure.error
                    );
                    report.failed += 1;
                    report.failures.push(failure);
                }
            }
        }
        drop(results);

        handler.teardown().await;
        Ok(report)
    }

    /// Progress of one run and job type.
    pub async fn get_progress(
        &self,
        run_id: &str,
        job_type: &str,
    ) -> Result<QueueStats, WorkQueueError> {
        Ok(self.store.stats(&RunScope::new(run_id, job_type)).await?)
    }

    pub async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, WorkQueueError> {
        Ok(self.store.list_runs(limit).await?)
    }

    pub async fn failures(
        &self,
        scope: &RunScope,
        limit: u32,
    ) -> Result<Vec<WorkItem>, WorkQueueError> {
        Ok(self.store.failures(scope, limit).await?)
    }

    /// Recover expired leases, across the whole store or within one scope.
    pub async fn sweep(
        &self,
        lease_duration: Duration,
        scope: Option<&RunScope>,
    ) -> Result<LeaseSweep, WorkQueueError> {
        Ok(self
            .store
            .release_expired_leases(lease_duration, scope)
            .await?)
    }
}

/// Returns the failure if every attempt failed.
async fn process_with_retries(
    handler: &dyn JobHandler,
    payload: &Payload,
    max_attempts: u32,
) -> Option<LocalFailure> {
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        match run_handler(handler, payload).await {
            ItemOutcome::Completed => return None,
            ItemOutcome::Failed { error } => {
                tracing::debug!(
                    "{} attempt {}/{} failed: {}",
                    payload.url,
                    attempt,
                    max_attempts,
                    error
                );
                last_error = error;
            }
        }
    }
    Some(LocalFailure {
        url: payload.url.clone(),
        attempts: max_attempts,
        error: last_error,
    })
}

/// Parse a payload source: one bare URL or JSON payload per line.
pub fn parse_payloads(contents: &str) -> Result<Vec<Payload>, WorkQueueError> {
    let mut payloads = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if let Some(payload) = Payload::parse_line(line, idx + 1)? {
            payloads.push(payload);
        }
    }
    Ok(payloads)
}

/// Read payloads from a file, or from stdin when `source` is `-`.
pub async fn read_payload_source(source: &str) -> Result<Vec<Payload>, WorkQueueError> {
    let contents = if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .map_err(|e| WorkQueueError::Other(format!("Failed to read stdin: {}", e)))?;
        buf
    } else {
        tokio::fs::read_to_string(Path::new(source))
            .await
            .map_err(|e| WorkQueueError::Other(format!("Failed to read {}: {}", source, e)))?
    };
    parse_payloads(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payloads() {
        let source = "\
# seed list
https://example.gov/a

{\"url\": \"https://example.gov/b\", \"metadata\": {\"agency\": \"epa\"}}
https://example.gov/a
";
        let payloads = parse_payloads(source).unwrap();
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[1].metadata.get("agency"), Some(&serde_json::json!("epa")));

        let err = parse_payloads("https://ok.example/\nnot a url\n").unwrap_err();
        assert!(matches!(err, WorkQueueError::Payload(_)));
    }

    #[tokio::test]
    async fn test_read_payload_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        std::fs::write(&path, "https://example.gov/1\nhttps://example.gov/2\n").unwrap();
        let payloads = read_payload_source(path.to_str().unwrap()).await.unwrap();
        assert_eq!(payloads.len(), 2);

        assert!(read_payload_source("/nonexistent/seeds.txt").await.is_err());
    }
}
