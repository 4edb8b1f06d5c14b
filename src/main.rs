//! tree-importer - Concurrent bulk importer of document trees
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tree_importer::config::{AppConfig, CliArgs, PolicyKind, SourceSpec};
use tree_importer::import::{
    DefaultThreadingPolicy, Importer, JobHistory, LoggingFilter, PerfLogger,
    VolumeThreadingPolicy,
};
use tree_importer::progress::{print_header, print_summary, ProgressReporter};
use tree_importer::repository::{DocumentSink, MemoryRepository, SqliteRepository};
use tree_importer::source::{FileSourceNode, NodeRef, SourceFilter, SyntheticNode};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = AppConfig::from_args(args).context("Invalid configuration")?;

    let output = if config.dry_run {
        "memory (dry run)".to_string()
    } else {
        config.output_path.display().to_string()
    };

    // Print header
    if config.show_progress {
        print_header(
            &config.source.describe(),
            &config.import.target_path,
            config.import.worker_count,
            &output,
        );
    }

    let source = open_source(&config)?;

    // Open the repository and its target container
    let (sink, history, sqlite) = if config.dry_run {
        let repo = MemoryRepository::new();
        if config.create_target {
            repo.ensure_container(&config.import.target_path);
        }
        let sink: Arc<dyn DocumentSink> = Arc::new(repo.clone());
        let history: Arc<dyn JobHistory> = Arc::new(repo);
        (sink, history, None)
    } else {
        let repo = SqliteRepository::open(&config.output_path)
            .with_context(|| format!("Failed to open repository {}", config.output_path.display()))?;
        if config.create_target {
            repo.ensure_container(&config.import.target_path)
                .context("Failed to create target container")?;
        }
        let sink: Arc<dyn DocumentSink> = Arc::new(repo.clone());
        let history: Arc<dyn JobHistory> = Arc::new(repo.clone());
        (sink, history, Some(repo))
    };

    let mut importer = Importer::new(config.import.clone(), source, sink)
        .context("Failed to initialize importer")?
        .with_job_history(history);

    importer = match config.policy {
        PolicyKind::Default => {
            importer.with_policy(DefaultThreadingPolicy::new(config.import.max_split_depth))
        }
        PolicyKind::Volume => importer.with_policy(VolumeThreadingPolicy::default()),
    };

    if let Some(path) = &config.perf_log {
        let perf_log = PerfLogger::create(path)
            .with_context(|| format!("Failed to create performance log {}", path.display()))?;
        importer = importer.with_perf_log(perf_log);
    }

    // Create progress reporter
    let progress = if config.show_progress {
        let reporter = ProgressReporter::new();
        importer = importer.with_progress(reporter.observer());
        Some(reporter)
    } else {
        None
    };

    if config.verbose {
        importer.add_filter(LoggingFilter);
    }

    // Setup signal handler for graceful shutdown
    let stop = importer.stop_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        stop.stop();
    })
    .context("Failed to set signal handler")?;

    if let Some(ref p) = progress {
        p.set_status("Importing...");
    }

    // Run the import
    let result = importer.run();

    // Finish progress
    if let Some(ref p) = progress {
        match &result {
            Ok(report) if report.interrupted => p.finish("Import interrupted"),
            Ok(_) => p.finish("Import completed"),
            Err(_) => p.finish_and_clear(),
        }
    }

    let report = result.context("Import failed")?;

    if let Some(repo) = &sqlite {
        if let Err(e) = repo.finalize() {
            warn!(error = %e, "Failed to optimize repository for reads");
        }
    }

    // Print summary
    if config.show_progress {
        print_summary(
            &report,
            &output,
            sqlite.as_ref().and_then(|repo| repo.file_size()),
        );
    }

    // Report success/failure
    if report.interrupted {
        info!("Import was interrupted before completion");
    }

    if report.node_errors > 0 {
        info!(errors = report.node_errors, "Import completed with errors");
    }

    if let Some(failure) = report.failure {
        return Err(failure).context("Import aborted");
    }

    Ok(())
}

fn open_source(config: &AppConfig) -> Result<NodeRef> {
    let source: NodeRef = match &config.source {
        SourceSpec::Directory(path) => {
            let filter = SourceFilter::new(config.exclude_patterns.clone());
            Arc::new(
                FileSourceNode::open(path, filter)
                    .with_context(|| format!("Failed to open source {}", path.display()))?,
            )
        }
        SourceSpec::Synthetic { depth, width } => Arc::new(SyntheticNode::root(*depth, *width)),
    };
    Ok(source)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("tree_importer=debug,warn")
    } else {
        EnvFilter::new("tree_importer=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
