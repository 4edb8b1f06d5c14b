//! Progress reporting for the importer
//!
//! Provides real-time progress display using indicatif spinners, fed by the
//! monitor's progress observer.

use crate::import::{ImportReport, ProgressObserver, ProgressSnapshot};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Progress reporter that displays import status
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ProgressSnapshot) {
        self.bar.set_message(format_snapshot(progress));
    }

    /// Observer forwarding monitor ticks to this reporter
    pub fn observer(&self) -> ProgressObserver {
        let reporter = self.clone();
        Arc::new(move |snapshot: &ProgressSnapshot| reporter.update(snapshot))
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_snapshot(progress: &ProgressSnapshot) -> String {
    let mut msg = format!(
        "Docs: {} | Rate: {:.0}/s | Queue: {} | Workers: {}/{}",
        format_number(progress.documents),
        progress.documents_per_second(),
        progress.queue_depth,
        progress.active_workers,
        progress.total_workers,
    );
    if progress.node_errors > 0 {
        msg.push_str(&format!(" | Errors: {}", format_number(progress.node_errors)));
    }
    msg
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the import results
pub fn print_summary(report: &ImportReport, repository: &str, repository_size: Option<u64>) {
    let title = if report.failure.is_some() {
        style("Import Aborted").red().bold()
    } else if report.interrupted {
        style("Import Interrupted").yellow().bold()
    } else {
        style("Import Complete").green().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Documents:").bold(),
        format_number(report.documents)
    );
    println!(
        "  {} {:.1}s ({:.0} docs/sec)",
        style("Duration:").bold(),
        report.duration.as_secs_f64(),
        report.average_rate
    );
    println!(
        "  {} {} queued, {} caller-run",
        style("Tasks:").bold(),
        format_number(report.scheduler.enqueued),
        format_number(report.scheduler.caller_runs)
    );
    if report.node_errors > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(report.node_errors)
        );
    }
    if !report.task_failures.is_empty() {
        println!(
            "  {} {}",
            style("Failed tasks:").yellow().bold(),
            report.task_failures.len()
        );
    }
    if let Some(failure) = &report.failure {
        println!("  {} {}", style("Failure:").red().bold(), failure);
    }
    // Show repository with size if available
    if let Some(size) = repository_size {
        let size_str = format_size(size, BINARY);
        println!("  {} {} ({})", style("Repository:").bold(), repository, size_str);
    } else {
        println!("  {} {}", style("Repository:").bold(), repository);
    }
    println!();
}

/// Print a header at the start of the import
pub fn print_header(source: &str, target: &str, workers: usize, output: &str) {
    println!();
    println!(
        "{} {}",
        style("tree-importer").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), source);
    println!("  {} {}", style("Target:").bold(), target);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = ProgressSnapshot {
            documents: 12_000,
            node_errors: 0,
            active_workers: 3,
            total_workers: 5,
            queue_depth: 7,
            elapsed: Duration::from_secs(4),
        };
        assert_eq!(
            format_snapshot(&snapshot),
            "Docs: 12,000 | Rate: 3000/s | Queue: 7 | Workers: 3/5"
        );

        let with_errors = ProgressSnapshot {
            node_errors: 2,
            ..snapshot
        };
        assert!(format_snapshot(&with_errors).ends_with("| Errors: 2"));
    }
}
