//! bfres-batch - batch conversion of BFRES assets to FBX
//!
//! Command line entry point.
//!
//! # Execution Flow
//!
//! 1. Parse arguments and initialize logging → logs/bfres-batch.<date>
//! 2. Load `Batch Config.yaml` from the working root (`--write-config` saves
//!    the merged settings and stops here)
//! 3. Build the [`RunContext`] (the run clock starts here)
//! 4. Prepare the working directories unless `--skip-prepare`
//! 5. Plan the tasks and print `N tasks use M workers`
//! 6. Run the worker pool on a multi-threaded tokio runtime
//! 7. Print the failure summary and `all tasks taken: X.XX seconds.`
//!
//! Exit status is 0 when every task succeeded, 2 when at least one stage
//! failed and 1 on a fatal error.

use anyhow::{Context, Result};
use bfres_batch::config::ConfigManager;
use bfres_batch::logging::{self, LOG_DIR, LOG_PREFIX};
use bfres_batch::services::{
    ConversionService, GroupKeyResolver, Preparer, TaskPlanner, WorkerPool, format_elapsed_line,
    format_start_line,
};
use bfres_batch::{APP_NAME, BatchSettings, Layout, RunContext, VERSION};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

/// Convert every staged BFRES asset to FBX using the external importer and exporter
#[derive(Parser, Debug)]
#[command(name = "bfres-batch", version, about)]
struct Args {
    /// Working root containing the In, Out and Pack directories
    #[arg(long, default_value = ".", env = "BFRES_BATCH_ROOT")]
    root: Utf8PathBuf,

    /// Configuration file (default: <root>/Batch Config.yaml)
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Number of worker loops (default: available processing units)
    #[arg(long, short = 'j')]
    workers: Option<usize>,

    /// Run tasks one at a time
    #[arg(long, conflicts_with = "workers")]
    serial: bool,

    /// Only convert groups starting with this prefix (repeatable)
    #[arg(long = "prefix", value_name = "PREFIX")]
    prefixes: Vec<String>,

    /// Skip directory preparation and archive extraction
    #[arg(long)]
    skip_prepare: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Do not mirror log output to stderr
    #[arg(long)]
    no_console_log: bool,

    /// Save the merged configuration to the config file and exit
    #[arg(long)]
    write_config: bool,
}

impl Args {
    /// Command line values take precedence over the configuration file
    fn apply_overrides(&self, settings: &mut BatchSettings) {
        if let Some(workers) = self.workers {
            settings.workers = workers;
            settings.parallel = true;
        }
        if self.serial {
            settings.parallel = false;
        }
        if !self.prefixes.is_empty() {
            settings.prefix_filters = self.prefixes.clone();
        }
        if self.debug {
            settings.debug_mode = true;
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let root = match absolute_root(&args.root) {
        Ok(root) => root,
        Err(e) => return fatal(e),
    };

    // Held until main returns so the fatal error below still reaches the log file
    let _log_guard = match init_logging(&args, &root) {
        Ok(guard) => guard,
        Err(e) => return fatal(e),
    };

    match run(args, root) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            fatal(e)
        }
    }
}

fn fatal(e: anyhow::Error) -> ExitCode {
    eprintln!("Error: {:#}", e);
    ExitCode::from(1)
}

/// Logging starts before the config is read, so its level comes from `--debug`
fn init_logging(args: &Args, root: &Utf8Path) -> Result<WorkerGuard> {
    let log_dir = root.join(LOG_DIR);
    if args.no_console_log {
        logging::setup_logging(&log_dir, LOG_PREFIX, args.debug)
    } else {
        logging::setup_logging_with_console(&log_dir, LOG_PREFIX, args.debug, true)
    }
}

fn run(args: Args, root: Utf8PathBuf) -> Result<ExitCode> {
    let config_manager = match &args.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(&root),
    };
    let mut config = config_manager.load_config()?;
    args.apply_overrides(&mut config.batch_settings);

    if args.write_config {
        config_manager.save_config(&config)?;
        println!("Wrote {}", config_manager.config_path());
        return Ok(ExitCode::SUCCESS);
    }
    let settings = config.batch_settings;

    if settings.debug_mode && !args.debug {
        tracing::info!("Debug Mode is set in the config; pass --debug to enable debug logging");
    }

    tracing::info!("Starting {} v{} in {}", APP_NAME, VERSION, root);
    tracing::debug!("Batch config: {}", config_manager.config_path());

    let workers = settings.effective_workers();
    let layout = Layout::from_settings(&root, &settings);
    let resolver = GroupKeyResolver::new(settings.prefix_filters.clone());
    let ctx = Arc::new(RunContext::new(layout, resolver));

    let allow_prefixes = ctx.resolver.allow_prefixes();
    if !allow_prefixes.is_empty() {
        tracing::info!("Converting only groups starting with: {}", allow_prefixes.join(", "));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(workers)
        .thread_name("bfres-batch-worker")
        .build()
        .context("Failed to build the tokio runtime")?;

    tracing::info!("Tokio runtime initialized with {} worker threads", workers);

    let report = runtime.block_on(async {
        if args.skip_prepare {
            tracing::info!("Skipping preparation");
        } else {
            Preparer::new(&settings).prepare(&ctx.layout).await?;
        }

        let plan = TaskPlanner::new().plan(&ctx)?;
        println!("{}", format_start_line(plan.len(), workers));

        let service = ConversionService::new(
            settings.importer_path(&root),
            settings.exporter_path(&root),
            ctx.layout.input_dir.clone(),
        )
        .with_policy(settings.failure_policy);

        WorkerPool::new(workers)
            .run(plan.tasks, Arc::clone(&ctx), Arc::new(service))
            .await
    })?;

    for line in report.failure_summary() {
        println!("{}", line);
    }
    println!("{}", format_elapsed_line(report.elapsed));

    ctx.metrics.log_summary(report.elapsed);

    if report.has_failures() {
        tracing::warn!("Run finished with {} failed tasks", report.failures().len());
        Ok(ExitCode::from(2))
    } else {
        tracing::info!("Run finished, {} tasks succeeded", report.succeeded());
        Ok(ExitCode::SUCCESS)
    }
}

/// Resolve the working root against the current directory
fn absolute_root(root: &Utf8Path) -> Result<Utf8PathBuf> {
    if root.is_absolute() {
        return Ok(root.to_path_buf());
    }

    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    let cwd = Utf8PathBuf::try_from(cwd).context("Current directory is not valid UTF-8")?;
    Ok(cwd.join(root))
}
