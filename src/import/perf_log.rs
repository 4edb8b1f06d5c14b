//! Performance log sink
//!
//! Tab-separated records of throughput samples, one per line, after a fixed
//! header line `nbDocs average immediate`. The logger is consumed by
//! `release`, so it can only be released once.

use super::monitor::ThroughputSample;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Column names of the performance log
pub const PERF_HEADERS: [&str; 3] = ["nbDocs", "average", "immediate"];

/// Writer of throughput samples
pub struct PerfLogger {
    writer: Box<dyn Write + Send>,
    records: u64,
}

impl PerfLogger {
    /// Write the header and return a logger over `writer`
    pub fn new(writer: impl Write + Send + 'static) -> io::Result<Self> {
        let mut writer: Box<dyn Write + Send> = Box::new(writer);
        writeln!(writer, "{}", PERF_HEADERS.join("\t"))?;
        Ok(Self { writer, records: 0 })
    }

    /// Log into a file, truncating it
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }

    /// Append one sample
    pub fn log(&mut self, sample: &ThroughputSample) -> io::Result<()> {
        writeln!(
            self.writer,
            "{}\t{:.2}\t{:.2}",
            sample.count, sample.average_rate, sample.instant_rate
        )?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and close the sink, returning the number of records
    pub fn release(mut self) -> io::Result<u64> {
        self.writer.flush()?;
        Ok(self.records)
    }
}

/// Cloneable in-memory writer, for reading a perf log back
#[derive(Debug, Clone, Default)]
pub struct PerfBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl PerfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.bytes.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for PerfBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
