//! Bounded, timestamped operator log.

use std::collections::VecDeque;

use chrono::{DateTime, Local};

/// Default number of entries kept.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// One operator-facing log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Wall-clock time the entry was recorded.
    pub timestamp: DateTime<Local>,
    /// The message.
    pub message: String,
}

impl LogEntry {
    /// Timestamp as `HH:MM:SS.mmm`.
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M:%S%.3f").to_string()
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.time_label(), self.message)
    }
}

/// Keeps the most recent `capacity` entries; older ones are dropped.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl ActivityLog {
    /// Create a log holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ActivityLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a message stamped with the current local time.
    pub fn push(&mut self, message: impl Into<String>) -> LogEntry {
        self.push_at(Local::now(), message)
    }

    fn push_at(&mut self, timestamp: DateTime<Local>, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            timestamp,
            message: message.into(),
        };
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// Snapshot of the entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
