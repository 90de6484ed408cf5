//! Initialize command.

use console::style;

use fetchqueue::config::{Config, Settings};

use crate::cli::helpers::open_context;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    open_context(settings).await?;

    if config.jobs.is_empty() {
        println!(
            "{} No job types configured in fetchqueue.toml",
            style("!").yellow()
        );
        println!("  Add a [jobs.<name>] table to get started");
    } else {
        let mut job_types: Vec<_> = config.jobs.iter().collect();
        job_types.sort_by(|a, b| a.0.cmp(b.0));
        for (job_type, job) in job_types {
            println!(
                "  {} {} ({}, {} handler, max {} attempts)",
                style("✓").green(),
                job_type,
                job.mode,
                job.handler.name(),
                job.max_attempts
            );
        }
    }

    println!(
        "{} Initialized fetchqueue at {}",
        style("✓").green(),
        settings.display_database_url()
    );

    Ok(())
}
