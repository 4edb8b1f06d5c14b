//! Progress monitoring and quiescence detection
//!
//! The monitor runs on the orchestrating thread while workers import. Every
//! poll interval it reads the active worker count; every sample interval it
//! turns the shared counters into a `ThroughputSample`. The run is over when
//! the scheduler has neither executing nor queued tasks.

use super::counters::SharedCounters;
use super::importer::StopHandle;
use super::perf_log::PerfLogger;
use super::scheduler::SchedulerHandle;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Polling cadence of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTiming {
    /// Delay before the first quiescence check
    pub warmup: Duration,

    /// Interval between ticks
    pub poll_interval: Duration,

    /// Minimum interval between throughput samples
    pub sample_interval: Duration,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(200),
            poll_interval: Duration::from_millis(500),
            sample_interval: Duration::from_secs(5),
        }
    }
}

/// Immutable throughput measurement
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputSample {
    /// Wall-clock time of the sample
    pub timestamp: DateTime<Utc>,

    /// Time since the run started
    pub elapsed: Duration,

    /// Cumulative documents created
    pub count: u64,

    /// Documents per second since the run started
    pub average_rate: f64,

    /// Documents per second since the previous sample
    pub instant_rate: f64,
}

/// Live progress handed to the progress observer on every tick
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub documents: u64,
    pub node_errors: u64,
    pub active_workers: usize,
    pub total_workers: usize,
    pub queue_depth: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Documents per second since the run started
    pub fn documents_per_second(&self) -> f64 {
        rate(self.documents, self.elapsed)
    }
}

/// Callback receiving a snapshot on every monitor tick
pub type ProgressObserver = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Final figures of a monitored run
#[derive(Debug, Clone, Default)]
pub struct MonitorSummary {
    pub documents: u64,
    pub duration: Duration,
    pub average_rate: f64,
    pub per_worker: Vec<(String, u64)>,
    pub samples: Vec<ThroughputSample>,
    pub perf_records: u64,
    pub interrupted: bool,
}

/// Supervises one import run
pub struct ProgressMonitor {
    counters: Arc<SharedCounters>,
    timing: MonitorTiming,
    started: Instant,
    last_sample_at: Instant,
    last_count: u64,
    last_active: usize,
    perf_log: Option<PerfLogger>,
    samples: Vec<ThroughputSample>,
    interrupted: bool,
}

impl ProgressMonitor {
    pub fn new(
        counters: Arc<SharedCounters>,
        timing: MonitorTiming,
        started: Instant,
        perf_log: Option<PerfLogger>,
    ) -> Self {
        Self {
            counters,
            timing,
            started,
            last_sample_at: started,
            last_count: 0,
            last_active: 0,
            perf_log,
            samples: Vec::new(),
            interrupted: false,
        }
    }

    /// Block until the scheduler is quiescent
    ///
    /// A stop request observed on a tick triggers `shutdown_now`; the loop
    /// then keeps polling until in-flight tasks reach a safe point.
    pub fn watch(
        &mut self,
        scheduler: &SchedulerHandle,
        stop: &StopHandle,
        observer: Option<&ProgressObserver>,
    ) {
        thread::sleep(self.timing.warmup);

        loop {
            if stop.is_stop_requested() && !scheduler.is_cancelled() {
                scheduler.shutdown_now();
                self.interrupted = true;
            }
            if scheduler.is_quiescent() {
                break;
            }

            thread::sleep(self.timing.poll_interval);
            let now = Instant::now();
            self.tick(scheduler.active_count(), now);

            if let Some(observer) = observer {
                observer(&self.snapshot(scheduler, now));
            }
        }

        info!("All import tasks terminated");
    }

    /// Process one poll; returns the sample if one was due
    pub fn tick(&mut self, active: usize, now: Instant) -> Option<ThroughputSample> {
        if active != self.last_active {
            debug!(active, previous = self.last_active, "Active import workers changed");
            self.last_active = active;
        }

        if now.saturating_duration_since(self.last_sample_at) >= self.timing.sample_interval {
            Some(self.sample(now))
        } else {
            None
        }
    }

    /// Take a throughput sample now
    pub fn sample(&mut self, now: Instant) -> ThroughputSample {
        let count = self.counters.total();
        let elapsed = now.saturating_duration_since(self.started);
        let delta_t = now.saturating_duration_since(self.last_sample_at);

        let average_rate = rate(count, elapsed);
        let instant_rate = if delta_t.is_zero() {
            average_rate
        } else {
            rate(count.saturating_sub(self.last_count), delta_t)
        };

        let sample = ThroughputSample {
            timestamp: Utc::now(),
            elapsed,
            count,
            average_rate,
            instant_rate,
        };

        info!(
            documents = count,
            average = %format!("{:.1}", average_rate),
            immediate = %format!("{:.1}", instant_rate),
            "Import progress (docs/s)"
        );

        if let Some(perf_log) = self.perf_log.as_mut() {
            if let Err(e) = perf_log.log(&sample) {
                warn!(error = %e, "Failed to write performance log");
            }
        }

        self.last_sample_at = now;
        self.last_count = count;
        self.samples.push(sample.clone());
        sample
    }

    fn snapshot(&self, scheduler: &SchedulerHandle, now: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            documents: self.counters.total(),
            node_errors: self.counters.node_errors(),
            active_workers: scheduler.active_count(),
            total_workers: scheduler.worker_count(),
            queue_depth: scheduler.queue_depth(),
            elapsed: now.saturating_duration_since(self.started),
        }
    }

    /// Samples taken so far
    pub fn samples(&self) -> &[ThroughputSample] {
        &self.samples
    }

    /// Emit the final summary and release the performance log
    pub fn finish(self, now: Instant) -> MonitorSummary {
        let documents = self.counters.total();
        let duration = now.saturating_duration_since(self.started);
        let average_rate = rate(documents, duration);
        let per_worker = self.counters.by_key();

        info!(
            documents,
            duration_secs = %format!("{:.1}", duration.as_secs_f64()),
            average = %format!("{:.1}", average_rate),
            "Import finished (docs/s)"
        );
        for (key, count) in &per_worker {
            info!(task = %key, documents = count, "Per-task documents");
        }

        let perf_records = match self.perf_log {
            Some(perf_log) => perf_log.release().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to release performance log");
                0
            }),
            None => 0,
        };

        MonitorSummary {
            documents,
            duration,
            average_rate,
            per_worker,
            samples: self.samples,
            perf_records,
            interrupted: self.interrupted,
        }
    }
}

/// Documents per second over a duration (0 for an empty duration)
pub fn rate(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::perf_log::PerfBuffer;

    fn timing(sample_secs: u64) -> MonitorTiming {
        MonitorTiming {
            warmup: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            sample_interval: Duration::from_secs(sample_secs),
        }
    }

    #[test]
    fn test_rates() {
        let counters = Arc::new(SharedCounters::new());
        let start = Instant::now();
        let mut monitor = ProgressMonitor::new(Arc::clone(&counters), timing(5), start, None);

        let slot = counters.slot("w-0");
        for _ in 0..100 {
            slot.increment();
        }

        // Not due yet
        assert!(monitor.tick(2, start + Duration::from_secs(1)).is_none());

        let first = monitor.tick(2, start + Duration::from_secs(10)).unwrap();
        assert_eq!(first.count, 100);
        assert!((first.average_rate - 10.0).abs() < 1e-9);
        assert!((first.instant_rate - 10.0).abs() < 1e-9);

        for _ in 0..100 {
            slot.increment();
        }
        let second = monitor.tick(1, start + Duration::from_secs(15)).unwrap();
        assert_eq!(second.count, 200);
        assert!((second.average_rate - 200.0 / 15.0).abs() < 1e-9);
        assert!((second.instant_rate - 20.0).abs() < 1e-9);
        assert_eq!(monitor.samples().len(), 2);
    }

    #[test]
    fn test_zero_delta_falls_back_to_average() {
        let counters = Arc::new(SharedCounters::new());
        let start = Instant::now();
        let mut monitor = ProgressMonitor::new(Arc::clone(&counters), timing(0), start, None);

        counters.slot("w").increment();
        let t = start + Duration::from_secs(2);
        monitor.sample(t);
        let again = monitor.sample(t);
        assert_eq!(again.instant_rate, again.average_rate);
    }

    #[test]
    fn test_finish_releases_perf_log() {
        let counters = Arc::new(SharedCounters::new());
        let buffer = PerfBuffer::new();
        let perf = PerfLogger::new(buffer.clone()).unwrap();
        let start = Instant::now();
        let mut monitor = ProgressMonitor::new(Arc::clone(&counters), timing(1), start, Some(perf));

        counters.slot("import-0-0").increment();
        monitor.tick(1, start + Duration::from_secs(2));
        let summary = monitor.finish(start + Duration::from_secs(4));

        assert_eq!(summary.documents, 1);
        assert_eq!(summary.perf_records, 1);
        assert_eq!(summary.per_worker, vec![("import-0-0".to_string(), 1)]);
        assert!((summary.average_rate - 0.25).abs() < 1e-9);
        assert_eq!(buffer.lines().len(), 2);
    }

    #[test]
    fn test_rate_of_empty_duration() {
        assert_eq!(rate(10, Duration::ZERO), 0.0);
    }
}
