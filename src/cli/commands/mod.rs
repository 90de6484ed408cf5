//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod init;
mod run;
mod runs;
mod status;
mod sweep;
mod worker;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fetchqueue::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "fetchq")]
#[command(about = "Crash-tolerant distributed URL work queue")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the default SQLite database
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Database URL (sqlite: path or postgres://), overrides the config file
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Start a run: process locally or seed the shared store, per job type
    Run {
        /// Configured job type
        job_type: String,
        /// File with one URL or JSON payload per line ("-" for stdin)
        payloads: String,
        /// Reuse an existing run id (re-seeding only adds new payloads)
        #[arg(long)]
        run_id: Option<String>,
        /// Attempts per item (overrides the job config)
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Claim priority of the new items (overrides the job config)
        #[arg(long)]
        priority: Option<i32>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drain one run of a job type from the shared store
    Worker {
        /// Configured job type
        job_type: String,
        /// Run to drain
        run_id: String,
        /// Items claimed per batch (overrides the job config)
        #[arg(short, long)]
        batch_size: Option<u32>,
        /// Lease duration in seconds (overrides the job config)
        #[arg(long)]
        lease_secs: Option<u64>,
        /// Items processed in parallel within a batch
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Sleep between polls while other workers hold claims
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        /// Worker identity (defaults to host:pid:random)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show progress of a run
    Status {
        /// Run to inspect
        run_id: String,
        /// Job type of the run
        job_type: String,
        /// Show up to N permanently failed items
        #[arg(short, long, default_value = "0")]
        failures: u32,
        /// Keep refreshing until the run is drained
        #[arg(short, long)]
        watch: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recent runs with their progress
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recover expired leases left behind by crashed workers
    Sweep {
        /// Lease duration in seconds (defaults to the job's lease, or 300)
        #[arg(long)]
        lease_secs: Option<u64>,
        /// Limit the sweep to one run (requires --job-type)
        #[arg(long, requires = "job_type")]
        run_id: Option<String>,
        /// Job type of the run to sweep
        #[arg(long, requires = "run_id")]
        job_type: Option<String>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
        database_url: cli.database_url,
    };
    let (settings, config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings, &config).await,
        Commands::Run {
            job_type,
            payloads,
            run_id,
            max_attempts,
            priority,
            json,
        } => {
            let overrides = run::RunOverrides {
                run_id,
                max_attempts,
                priority,
            };
            run::cmd_run(&settings, config, &job_type, &payloads, overrides, json).await
        }
        Commands::Worker {
            job_type,
            run_id,
            batch_size,
            lease_secs,
            concurrency,
            poll_interval_ms,
            owner,
        } => {
            let overrides = worker::WorkerOverrides {
                batch_size,
                lease_secs,
                concurrency,
                poll_interval_ms,
                owner,
            };
            worker::cmd_worker(&settings, &config, &job_type, &run_id, overrides).await
        }
        Commands::Status {
            run_id,
            job_type,
            failures,
            watch,
            json,
        } => status::cmd_status(&settings, &run_id, &job_type, failures, watch, json).await,
        Commands::Runs { limit, json } => runs::cmd_runs(&settings, limit, json).await,
        Commands::Sweep {
            lease_secs,
            run_id,
            job_type,
        } => sweep::cmd_sweep(&settings, &config, lease_secs, run_id, job_type).await,
    }
}
