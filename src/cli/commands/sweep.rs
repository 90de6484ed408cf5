//! Sweep command: recover expired leases.

use std::time::Duration;

use console::style;

use fetchqueue::config::{Config, Settings};
use fetchqueue::models::RunScope;

use crate::cli::helpers::open_context;

const DEFAULT_LEASE_SECS: u64 = 300;

pub async fn cmd_sweep(
    settings: &Settings,
    config: &Config,
    lease_secs: Option<u64>,
    run_id: Option<String>,
    job_type: Option<String>,
) -> anyhow::Result<()> {
    let scope = match (run_id, job_type) {
        (Some(run_id), Some(job_type)) => Some(RunScope::new(run_id, job_type)),
        _ => None,
    };

    // An unscoped sweep with a short lease would expire other job types' claims,
    // so the default comes from the scoped job when there is one.
    let lease = match (lease_secs, &scope) {
        (Some(secs), _) => Duration::from_secs(secs),
        (None, Some(scope)) => config
            .jobs
            .get(&scope.job_type)
            .map(|job| job.lease_duration())
            .unwrap_or(Duration::from_secs(DEFAULT_LEASE_SECS)),
        (None, None) => Duration::from_secs(DEFAULT_LEASE_SECS),
    };

    let ctx = open_context(settings).await?;
    let store = ctx.work_store();
    let swept = store.release_expired_leases(lease, scope.as_ref()).await?;

    let target = scope
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "all runs".to_string());

    if swept.total() == 0 {
        println!(
            "{} No claims older than {}s in {}",
            style("✓").green(),
            lease.as_secs(),
            target
        );
    } else {
        println!(
            "{} Recovered {} expired claims in {}",
            style("✓").green(),
            swept.total(),
            target
        );
        println!("  {} {} requeued", style("→").dim(), swept.requeued);
        if swept.failed > 0 {
            println!(
                "  {} {} failed (attempts exhausted)",
                style("!").yellow(),
                swept.failed
            );
        }
    }

    Ok(())
}
