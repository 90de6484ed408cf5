//! Worker command: drain one run from the shared store.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use tokio::sync::mpsc;

use fetchqueue::config::{Config, Settings};
use fetchqueue::models::RunScope;
use fetchqueue::work_queue::{StopSignal, Worker, WorkerConfig, WorkerEvent};

use crate::cli::helpers::{bar_style, open_context, stats_message, truncate};

/// Command line overrides for the job's worker settings.
#[derive(Debug, Default)]
pub struct WorkerOverrides {
    pub batch_size: Option<u32>,
    pub lease_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub owner: Option<String>,
}

pub async fn cmd_worker(
    settings: &Settings,
    config: &Config,
    job_type: &str,
    run_id: &str,
    overrides: WorkerOverrides,
) -> anyhow::Result<()> {
    if let Some(batch_size) = overrides.batch_size {
        anyhow::ensure!(batch_size > 0, "--batch-size must be at least 1");
    }
    let job = config.job(job_type)?;
    let handler = config.handler_registry().create(job_type)?;

    let ctx = open_context(settings).await?;
    let store = ctx.work_store();
    let scope = RunScope::new(run_id, job_type);

    let initial = store.stats(&scope).await?;
    if initial.total() == 0 {
        println!("{} Run {} has no items", style("!").yellow(), scope);
        println!(
            "  {} Seed it with 'fetchq run {} <payloads> --run-id {}'",
            style("→").dim(),
            job_type,
            run_id
        );
        return Ok(());
    }

    let mut worker_config = WorkerConfig::from_settings(scope.clone(), job, &config.worker);
    if let Some(batch_size) = overrides.batch_size {
        worker_config.batch_size = batch_size;
    }
    if let Some(secs) = overrides.lease_secs {
        worker_config.lease_duration = Duration::from_secs(secs);
    }
    if let Some(concurrency) = overrides.concurrency {
        worker_config.concurrency = concurrency.max(1);
    }
    if let Some(ms) = overrides.poll_interval_ms {
        worker_config.poll_interval = Duration::from_millis(ms);
    }

    let stop = StopSignal::new();
    stop.stop_on_ctrl_c();

    // Event channel for progress updates
    let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(100);

    let mut worker = Worker::new(Arc::new(store), handler, worker_config)
        .with_stop_signal(stop)
        .with_events(event_tx);
    if let Some(owner) = overrides.owner {
        worker = worker.with_owner(owner);
    }

    println!(
        "{} Worker {} draining {} ({})",
        style("→").cyan(),
        style(worker.owner()).bold(),
        scope,
        stats_message(&initial)
    );

    let pb = indicatif::ProgressBar::new(initial.total());
    pb.set_style(bar_style()?);
    pb.set_position(initial.completed + initial.failed);

    // Spawn event handler task (UI layer)
    let pb_events = pb.clone();
    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::ItemStarted { url, attempt, .. } => {
                    pb_events.set_message(format!("#{} {}", attempt, truncate(&url, 60)));
                }
                WorkerEvent::ItemCompleted { .. } => pb_events.inc(1),
                WorkerEvent::ItemFailed {
                    url,
                    error,
                    requeued,
                    ..
                } => {
                    if !requeued {
                        pb_events.inc(1);
                        pb_events.println(format!(
                            "  {} {}: {}",
                            style("✗").red(),
                            truncate(&url, 80),
                            truncate(&error, 120)
                        ));
                    }
                }
                WorkerEvent::ItemStale { url, .. } => {
                    pb_events.println(format!(
                        "  {} Lost claim on {}",
                        style("!").yellow(),
                        truncate(&url, 80)
                    ));
                }
                WorkerEvent::LeasesRecovered { requeued, failed } => {
                    // Lease failures are terminal items not counted by this bar yet.
                    pb_events.inc(failed);
                    pb_events.println(format!(
                        "  {} Recovered {} expired leases",
                        style("→").dim(),
                        requeued + failed
                    ));
                }
                WorkerEvent::StoreError {
                    error,
                    consecutive,
                    retry_in,
                } => {
                    pb_events.println(format!(
                        "  {} Store error ({} in a row, retrying in {:?}): {}",
                        style("!").yellow(),
                        consecutive,
                        retry_in,
                        truncate(&error, 120)
                    ));
                }
                WorkerEvent::StateChanged { .. }
                | WorkerEvent::BatchClaimed { .. }
                | WorkerEvent::ClaimsReleased { .. } => {}
            }
        }
    });

    let result = worker.run().await;

    // Wait for event handler to finish
    let _ = event_handler.await;
    pb.finish_and_clear();

    let summary = result?;
    println!(
        "{} Worker {} stopped: {} completed, {} failed, {} requeued",
        style("✓").green(),
        summary.owner,
        summary.completed,
        summary.failed,
        summary.requeued
    );
    if summary.stale > 0 {
        println!(
            "  {} {} reports arrived after the claim was lost",
            style("!").yellow(),
            summary.stale
        );
    }
    if summary.released > 0 {
        println!(
            "  {} {} unstarted claims released",
            style("→").dim(),
            summary.released
        );
    }

    let remaining = ctx.work_store().stats(&scope).await?;
    println!("  {} {}", style("→").dim(), stats_message(&remaining));

    Ok(())
}
