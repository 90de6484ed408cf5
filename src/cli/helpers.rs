//! Shared helper functions for CLI commands.

use console::style;
use indicatif::ProgressStyle;

use fetchqueue::config::Settings;
use fetchqueue::models::QueueStats;
use fetchqueue::repository::DbContext;

/// Open the configured database, creating the schema if needed.
pub async fn open_context(settings: &Settings) -> anyhow::Result<DbContext> {
    if !settings.is_postgres() {
        settings.ensure_directories()?;
    }
    let ctx = settings.create_db_context()?;
    ctx.init_schema().await?;
    Ok(ctx)
}

/// Progress bar style shared by the watch and worker displays.
pub fn bar_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}",
        )?
        .progress_chars("#>-"))
}

/// One-line status summary.
pub fn stats_message(stats: &QueueStats) -> String {
    format!(
        "{} pending, {} claimed, {} completed, {} failed",
        stats.pending, stats.claimed, stats.completed, stats.failed
    )
}

/// Print per-status counts.
pub fn print_stats(stats: &QueueStats) {
    println!("  {:<10} {}", style("pending").cyan(), stats.pending);
    println!("  {:<10} {}", style("claimed").cyan(), stats.claimed);
    println!("  {:<10} {}", style("completed").green(), stats.completed);
    println!("  {:<10} {}", style("failed").red(), stats.failed);
}

/// Truncate to at most `max` characters, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}
