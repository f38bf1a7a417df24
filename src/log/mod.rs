//! Bounded operational event log.
//!
//! The event log is the operator-facing history of a session: one short line
//! per notable event (batch started, item downloaded, item failed). It keeps
//! the most recent entries only and mirrors every line to `tracing`, so the
//! same events reach the structured diagnostics as well.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use tracing::info;

/// Default number of entries kept before the oldest is evicted.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Destination for operational log lines.
///
/// Workers and the scheduler only need to append; implementations decide
/// where the lines go.
pub trait EventSink: Send + Sync {
    /// Appends one line.
    fn append(&self, message: &str);
}

/// One time-stamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Local wall-clock time the line was appended.
    pub time: DateTime<Local>,
    /// The line itself.
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.time.format("%H:%M:%S"), self.message)
    }
}

/// Bounded, thread-safe event log.
///
/// Appends from concurrent workers are serialized by a mutex; once `capacity`
/// entries are held, each append evicts the oldest one.
#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    /// Creates a log holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns the maximum number of entries kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns every held entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Returns up to `n` of the newest entries, newest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.lock().iter().rev().take(n).cloned().collect()
    }

    /// Returns the number of held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for EventLog {
    fn append(&self, message: &str) {
        info!(target: "sora_batch::events", "{message}");
        let entry = LogEntry {
            time: Local::now(),
            message: message.to_string(),
        };
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}
