//! # MSGQ Logger
//!
//! This crate implements an in-memory sink for the `log` facade.
//!
//! ## Philosophy
//!
//! Records keep their level, target and source location as data.
//! Every record becomes a [`LogEntry`] that tests and hosts can inspect
//! instead of scraping console output.

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::sync::OnceLock;

/// Entries kept before the oldest are dropped
pub const DEFAULT_CAPACITY: usize = 4096;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Per-message tracing
    Trace,
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

/// A structured log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Emitting crate or subsystem, e.g. `"msgq"`
    pub target: String,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Creates a new log entry
    pub fn new(level: LogLevel, target: &str, message: String) -> Self {
        Self {
            level,
            target: target.to_string(),
            message,
            fields: Vec::new(),
        }
    }

    /// Adds a field to the log entry
    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.fields.push((key.to_string(), value));
        self
    }

    /// Returns the value of a field
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn from_record(record: &Record<'_>) -> Self {
        let mut entry = Self::new(
            record.level().into(),
            record.target(),
            record.args().to_string(),
        );
        if let Some(module) = record.module_path() {
            entry = entry.with_field("module", module.to_string());
        }
        if let Some(line) = record.line() {
            entry = entry.with_field("line", line.to_string());
        }
        entry
    }
}

/// A bounded, thread-safe record of everything logged
pub struct MemoryLogger {
    level: LevelFilter,
    capacity: usize,
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    /// Creates a logger keeping up to `capacity` entries at `level` or above
    pub fn new(level: LevelFilter, capacity: usize) -> Self {
        Self {
            level,
            capacity,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Appends an entry, dropping the oldest when full
    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if self.capacity == 0 {
            return;
        }
        if entries.len() >= self.capacity {
            entries.remove(0);
        }
        entries.push(entry);
    }

    /// Returns a copy of every kept entry, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Removes and returns every kept entry
    pub fn drain(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns entries from `target` at `level` or above
    pub fn find(&self, target: &str, level: LogLevel) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.target == target && entry.level >= level)
            .cloned()
            .collect()
    }

    /// Returns whether any entry from `target` mentions `needle`
    pub fn contains(&self, target: &str, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.target == target && entry.message.contains(needle))
    }
}

impl Log for MemoryLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.push(LogEntry::from_record(record));
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<MemoryLogger> = OnceLock::new();

/// Installs the process-wide memory logger and returns it
///
/// Safe to call repeatedly; the first call wins. If some other logger was
/// installed first, the returned logger stays empty.
pub fn init() -> &'static MemoryLogger {
    let logger = LOGGER.get_or_init(|| MemoryLogger::new(LevelFilter::Trace, DEFAULT_CAPACITY));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
    logger
}
