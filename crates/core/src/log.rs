//! Build Log Sink
//!
//! The host hands the engine a sink for human readable build output. Every
//! command line and tool output line ends up here.

use std::sync::Arc;
use parking_lot::Mutex;
use tracing::info;

/// Destination for build log lines
pub trait LogSink: Send + Sync {
    /// Write one line to the build log
    fn println(&self, line: &str);
}

/// Shared handle to a log sink
pub type SharedLogSink = Arc<dyn LogSink>;

/// Log sink that forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn println(&self, line: &str) {
        info!(target: "ci_droid::build", "{}", line);
    }
}

/// Log sink that keeps every line in memory
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Check whether any line contains the given text
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn println(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
