//! Configuration types for tree-importer
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The validated `ImportConfig` handed to the importer
//! - The binary's `AppConfig` (source, output, policy, logging)

use crate::error::ConfigError;
use crate::import::MonitorTiming;
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Minimum queue capacity
const MIN_QUEUE_CAPACITY: usize = 1;

/// Batch size limits
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 100_000;

/// Regex for parsing synthetic tree shapes
static SYNTHETIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: 3x10 (depth 3, width 10)
    Regex::new(r"^(\d+)x(\d+)$").expect("Invalid synthetic shape regex")
});

/// Concurrent bulk importer of directory trees into a document repository
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tree-importer",
    version,
    about = "Concurrent bulk importer of directory trees into a document repository",
    long_about = "Walks a source tree and recreates it as folder and file documents in a \
                  SQLite repository.\n\n\
                  Subtrees are split into tasks executed by a fixed pool of workers over a \
                  bounded queue. Documents are committed in batches per task.",
    after_help = "EXAMPLES:\n    \
        tree-importer /data/archive -o repo.db\n    \
        tree-importer /data/archive -o repo.db --target /imports/archive --create-target\n    \
        tree-importer /data/archive -w 16 -b 200 --policy volume --perf-log perf.tsv\n    \
        tree-importer --synthetic 4x10 --dry-run"
)]
pub struct CliArgs {
    /// Source directory to import
    #[arg(value_name = "SOURCE", required_unless_present = "synthetic")]
    pub source: Option<PathBuf>,

    /// Repository database file
    #[arg(short, long, default_value = "repository.db", value_name = "FILE")]
    pub output: PathBuf,

    /// Repository path of the target container
    #[arg(short = 't', long, default_value = "/", value_name = "PATH")]
    pub target: String,

    /// Create the target container if it does not exist
    #[arg(long)]
    pub create_target: bool,

    /// Documents per commit
    #[arg(short = 'b', long, default_value = "50", value_name = "NUM")]
    pub batch_size: usize,

    /// Number of worker threads ("auto" for one per CPU)
    #[arg(short = 'w', long, default_value = "5", value_name = "NUM", value_parser = parse_workers)]
    pub workers: usize,

    /// Task queue capacity
    #[arg(long, default_value = "100", value_name = "NUM")]
    pub queue_size: usize,

    /// Deepest level at which subtrees are split into new tasks
    #[arg(long, default_value = "8", value_name = "NUM")]
    pub max_split_depth: u32,

    /// Threading policy
    #[arg(long, value_enum, default_value_t = PolicyKind::Default)]
    pub policy: PolicyKind,

    /// Write throughput samples to this file
    #[arg(long, value_name = "FILE")]
    pub perf_log: Option<PathBuf>,

    /// Exclude paths matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Name recorded in the job history
    #[arg(long, default_value = "tree-import", value_name = "NAME")]
    pub job_name: String,

    /// Import into memory instead of the repository file
    #[arg(long)]
    pub dry_run: bool,

    /// Import a generated tree of DEPTHxWIDTH instead of SOURCE
    #[arg(long, value_name = "DEPTHxWIDTH", conflicts_with = "source")]
    pub synthetic: Option<String>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Threading policy selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyKind {
    /// Split shallow folders while workers are idle
    Default,
    /// Split once a task has done a third of a batch
    Volume,
}

fn parse_workers(value: &str) -> Result<usize, String> {
    if value.eq_ignore_ascii_case("auto") {
        return Ok(num_cpus::get().min(MAX_WORKERS));
    }
    value
        .parse::<usize>()
        .map_err(|e| format!("'{}' is not a worker count: {}", value, e))
}

/// Validated settings of one import run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// Repository path of the container receiving the tree
    pub target_path: String,

    /// Documents created per commit
    pub batch_size: usize,

    /// Number of worker threads
    pub worker_count: usize,

    /// Capacity of the task queue
    pub queue_capacity: usize,

    /// Depth bound of the default threading policy
    pub max_split_depth: u32,

    /// Interval between monitor ticks
    pub poll_interval: Duration,

    /// Minimum interval between throughput samples
    pub sample_interval: Duration,

    /// Delay before the first quiescence check
    pub warmup: Duration,

    /// Name recorded in the job history
    pub job_name: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let timing = MonitorTiming::default();
        Self {
            target_path: "/".into(),
            batch_size: 50,
            worker_count: 5,
            queue_capacity: 100,
            max_split_depth: 8,
            poll_interval: timing.poll_interval,
            sample_interval: timing.sample_interval,
            warmup: timing.warmup,
            job_name: "tree-import".into(),
        }
    }
}

impl ImportConfig {
    /// Check every bound
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: self.worker_count,
                max: MAX_WORKERS,
            });
        }

        if self.queue_capacity < MIN_QUEUE_CAPACITY {
            return Err(ConfigError::InvalidQueueCapacity {
                size: self.queue_capacity,
                min: MIN_QUEUE_CAPACITY,
            });
        }

        if self.batch_size < MIN_BATCH_SIZE || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize {
                size: self.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        if !self.target_path.starts_with('/') {
            return Err(ConfigError::InvalidTargetPath {
                path: self.target_path.clone(),
                reason: "must be an absolute repository path".into(),
            });
        }

        Ok(())
    }

    /// Monitor cadence
    pub fn timing(&self) -> MonitorTiming {
        MonitorTiming {
            warmup: self.warmup,
            poll_interval: self.poll_interval,
            sample_interval: self.sample_interval,
        }
    }
}

/// Where the imported tree comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A directory on the local filesystem
    Directory(PathBuf),
    /// A generated tree
    Synthetic { depth: u32, width: usize },
}

impl SourceSpec {
    /// Parse a DEPTHxWIDTH shape
    pub fn parse_synthetic(spec: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidSynthetic {
            spec: spec.to_string(),
        };
        let caps = SYNTHETIC_REGEX.captures(spec.trim()).ok_or_else(invalid)?;
        let depth = caps[1].parse::<u32>().map_err(|_| invalid())?;
        let width = caps[2].parse::<usize>().map_err(|_| invalid())?;
        if width == 0 {
            return Err(invalid());
        }
        Ok(SourceSpec::Synthetic { depth, width })
    }

    /// Description for the header
    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Directory(path) => path.display().to_string(),
            SourceSpec::Synthetic { depth, width } => format!("synthetic {}x{}", depth, width),
        }
    }
}

/// Validated configuration of the binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Settings passed to the importer
    pub import: ImportConfig,

    /// Tree to import
    pub source: SourceSpec,

    /// Repository database path
    pub output_path: PathBuf,

    /// Create the target container when missing
    pub create_target: bool,

    /// Threading policy
    pub policy: PolicyKind,

    /// Performance log path
    pub perf_log: Option<PathBuf>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Import into memory only
    pub dry_run: bool,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl AppConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let source = match (&args.synthetic, &args.source) {
            (Some(shape), _) => SourceSpec::parse_synthetic(shape)?,
            (None, Some(path)) => {
                if !path.is_dir() {
                    return Err(ConfigError::InvalidPath {
                        path: path.clone(),
                        reason: "Source is not a directory".into(),
                    });
                }
                SourceSpec::Directory(path.clone())
            }
            (None, None) => {
                return Err(ConfigError::InvalidPath {
                    path: PathBuf::new(),
                    reason: "A source directory or --synthetic is required".into(),
                })
            }
        };

        let import = ImportConfig {
            target_path: args.target.clone(),
            batch_size: args.batch_size,
            worker_count: args.workers,
            queue_capacity: args.queue_size,
            max_split_depth: args.max_split_depth,
            job_name: args.job_name.clone(),
            ..ImportConfig::default()
        };
        import.validate()?;

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Validate output path
        if !args.dry_run {
            if let Some(parent) = args.output.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidPath {
                        path: args.output.clone(),
                        reason: format!("Parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        Ok(Self {
            import,
            source,
            output_path: args.output,
            create_target: args.create_target,
            policy: args.policy,
            perf_log: args.perf_log,
            exclude_patterns,
            dry_run: args.dry_run,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}
