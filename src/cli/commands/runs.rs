//! Runs command: list recent runs.

use console::style;
use serde::Serialize;

use fetchqueue::config::Settings;
use fetchqueue::models::{QueueStats, Run};

use crate::cli::helpers::open_context;

#[derive(Serialize)]
struct RunRow {
    #[serde(flatten)]
    run: Run,
    stats: QueueStats,
}

pub async fn cmd_runs(settings: &Settings, limit: u32, json: bool) -> anyhow::Result<()> {
    let ctx = open_context(settings).await?;
    let store = ctx.work_store();

    let mut rows = Vec::new();
    for run in store.list_runs(limit).await? {
        let stats = store.stats(&run.scope()).await?;
        rows.push(RunRow { run, stats });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("{} No runs yet", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<36} {:<16} {:<12} {:>8} {:>8} {:>8} {:>8}",
        style("RUN").bold(),
        style("JOB TYPE").bold(),
        style("MODE").bold(),
        style("PENDING").bold(),
        style("CLAIMED").bold(),
        style("DONE").bold(),
        style("FAILED").bold()
    );
    for row in &rows {
        println!(
            "{:<36} {:<16} {:<12} {:>8} {:>8} {:>8} {:>8}",
            row.run.run_id,
            row.run.job_type,
            row.run.mode,
            row.stats.pending,
            row.stats.claimed,
            row.stats.completed,
            row.stats.failed
        );
    }

    Ok(())
}
