//! Status command: progress and failures of one run.

use std::time::Duration;

use console::style;
use serde::Serialize;

use fetchqueue::config::Settings;
use fetchqueue::models::{QueueStats, RunScope, WorkItem};
use fetchqueue::repository::DieselWorkStore;
use fetchqueue::work_queue::StopSignal;

use crate::cli::helpers::{bar_style, open_context, print_stats, stats_message, truncate};

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Serialize)]
struct StatusReport {
    run_id: String,
    job_type: String,
    #[serde(flatten)]
    stats: QueueStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<WorkItem>,
}

pub async fn cmd_status(
    settings: &Settings,
    run_id: &str,
    job_type: &str,
    failures: u32,
    watch: bool,
    json: bool,
) -> anyhow::Result<()> {
    let ctx = open_context(settings).await?;
    let store = ctx.work_store();
    let scope = RunScope::new(run_id, job_type);

    if watch && !json {
        watch_progress(&store, &scope).await?;
    }

    let stats = store.stats(&scope).await?;
    let failed_items = if failures > 0 {
        store.failures(&scope, failures).await?
    } else {
        Vec::new()
    };

    if json {
        let report = StatusReport {
            run_id: scope.run_id.clone(),
            job_type: scope.job_type.clone(),
            stats,
            failures: failed_items,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if stats.total() == 0 {
        println!("{} Run {} has no items", style("!").yellow(), scope);
        return Ok(());
    }

    let run = store.get_run(&scope).await?;
    let mode = run
        .map(|r| r.mode.to_string())
        .unwrap_or_else(|| "unregistered".to_string());
    println!(
        "{} {} ({}, {} items)",
        style("Run").bold(),
        scope,
        mode,
        stats.total()
    );
    print_stats(&stats);

    if stats.is_drained() {
        println!("{} Drained", style("✓").green());
    }

    if !failed_items.is_empty() {
        println!();
        println!("{}", style("Failures").bold());
        for item in &failed_items {
            println!(
                "  {} {} ({} attempts): {}",
                style("✗").red(),
                truncate(&item.payload.url, 80),
                item.attempt_count,
                truncate(item.last_error.as_deref().unwrap_or("unknown error"), 120)
            );
        }
    }

    Ok(())
}

/// Refresh a progress bar until the run drains or Ctrl-C is pressed.
async fn watch_progress(store: &DieselWorkStore, scope: &RunScope) -> anyhow::Result<()> {
    let stop = StopSignal::new();
    stop.stop_on_ctrl_c();

    let pb = indicatif::ProgressBar::new(0);
    pb.set_style(bar_style()?);

    loop {
        let stats = store.stats(scope).await?;
        pb.set_length(stats.total());
        pb.set_position(stats.completed + stats.failed);
        pb.set_message(stats_message(&stats));

        if stats.is_drained() || stop.is_stopped() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            _ = stop.stopped() => {}
        }
    }

    pb.finish_and_clear();
    Ok(())
}
