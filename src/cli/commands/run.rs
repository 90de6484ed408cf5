//! Run command: start a run of a configured job type.

use console::style;

use fetchqueue::config::{Config, Settings};
use fetchqueue::models::ExecutionMode;
use fetchqueue::orchestrator::{read_payload_source, Orchestrator, StartedRun};
use fetchqueue::work_queue::WorkQueueError;

use crate::cli::helpers::{open_context, truncate};

/// Command line overrides for one run.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub run_id: Option<String>,
    pub max_attempts: Option<u32>,
    pub priority: Option<i32>,
}

pub async fn cmd_run(
    settings: &Settings,
    mut config: Config,
    job_type: &str,
    source: &str,
    overrides: RunOverrides,
    json: bool,
) -> anyhow::Result<()> {
    let job = config
        .jobs
        .get_mut(job_type)
        .ok_or_else(|| WorkQueueError::UnknownJobType(job_type.to_string()))?;
    if let Some(max_attempts) = overrides.max_attempts {
        anyhow::ensure!(max_attempts > 0, "--max-attempts must be at least 1");
        job.max_attempts = max_attempts;
    }
    if let Some(priority) = overrides.priority {
        job.priority = priority;
    }
    let mode = job.mode;
    let payloads = read_payload_source(source).await?;

    // Local runs never touch the store, so only distributed runs need the schema.
    let ctx = match mode {
        ExecutionMode::Distributed => open_context(settings).await?,
        ExecutionMode::Local => settings.create_db_context()?,
    };
    let orchestrator = Orchestrator::new(config, ctx.work_store());

    if !json {
        println!(
            "{} Starting {} run of {} ({} payloads)",
            style("→").cyan(),
            mode,
            job_type,
            payloads.len()
        );
    }

    let started = orchestrator
        .start_run(job_type, &payloads, overrides.run_id)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&started)?);
        return Ok(());
    }

    match started {
        StartedRun::Distributed(receipt) => {
            println!(
                "{} Seeded run {} with {} items",
                style("✓").green(),
                style(&receipt.run_id).bold(),
                receipt.enqueued
            );
            if receipt.skipped > 0 {
                println!(
                    "  {} {} already present",
                    style("→").dim(),
                    receipt.skipped
                );
            }
            println!(
                "  {} Start workers with 'fetchq worker {} {}'",
                style("→").dim(),
                receipt.job_type,
                receipt.run_id
            );
        }
        StartedRun::Local(report) => {
            println!(
                "{} Run {} finished: {} completed, {} failed",
                style("✓").green(),
                style(&report.run_id).bold(),
                report.completed,
                report.failed
            );
            if report.skipped > 0 {
                println!(
                    "  {} {} duplicate payloads skipped",
                    style("→").dim(),
                    report.skipped
                );
            }
            for failure in &report.failures {
                println!(
                    "  {} {} ({} attempts): {}",
                    style("✗").red(),
                    failure.url,
                    failure.attempts,
                    truncate(&failure.error, 120)
                );
            }
        }
    }

    Ok(())
}
