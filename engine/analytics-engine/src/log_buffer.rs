//! # Diagnostic Log Buffer
//!
//! Bounded in-memory capture of recent log lines. [`RingBufferLayer`] plugs into the tracing
//! subscriber and appends one [`LogEntry`] per event; once the buffer is full the oldest entry is
//! evicted. Appending never fails: an event that cannot be formatted is dropped.
//!
//! The process-wide instance is created once by [`install_global`] and lives as long as the
//! process.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub const DEFAULT_CAPACITY: usize = 2000;
/// Entries returned by a recent-logs read when the caller gives no limit
pub const DEFAULT_RECENT_LIMIT: usize = 200;

static GLOBAL: OnceLock<Arc<LogRingBuffer>> = OnceLock::new();

/// One captured log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    /// `ERROR`, `WARN`, `INFO`, `DEBUG` or `TRACE`
    pub level: String,
    /// Logger name (the event's target)
    pub name: String,
    pub message: String,
}

/// Fixed-capacity FIFO of log entries
#[derive(Debug)]
pub struct LogRingBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` most recent entries, oldest first, optionally only those at `level`
    /// (case-insensitive)
    pub fn get_recent(&self, limit: usize, level: Option<&str>) -> Vec<LogEntry> {
        let snapshot: Vec<LogEntry> = self.entries.lock().iter().cloned().collect();

        let mut matching: Vec<LogEntry> = match level {
            Some(level) => {
                snapshot.into_iter().filter(|e| e.level.eq_ignore_ascii_case(level)).collect()
            }
            None => snapshot,
        };

        let skip = matching.len().saturating_sub(limit);
        matching.drain(..skip);
        matching
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Tracing layer feeding this buffer
    pub fn layer(self: &Arc<Self>) -> RingBufferLayer {
        RingBufferLayer { buffer: self.clone() }
    }
}

/// Install the process-wide buffer; later calls return the existing one unchanged
pub fn install_global(capacity: usize) -> Arc<LogRingBuffer> {
    GLOBAL.get_or_init(|| Arc::new(LogRingBuffer::new(capacity))).clone()
}

/// The process-wide buffer, if installed
pub fn global() -> Option<Arc<LogRingBuffer>> {
    GLOBAL.get().cloned()
}

/// Tracing layer that appends every event to a [`LogRingBuffer`]
#[derive(Clone)]
pub struct RingBufferLayer {
    buffer: Arc<LogRingBuffer>,
}

impl<S> Layer<S> for RingBufferLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // A panicking Debug impl must not take the logging pipeline down with it
        let entry = catch_unwind(AssertUnwindSafe(|| entry_from_event(event)));
        if let Ok(entry) = entry {
            self.buffer.push(entry);
        }
    }
}

fn entry_from_event(event: &Event<'_>) -> LogEntry {
    let mut visitor = MessageVisitor::default();
    event.record(&mut visitor);

    let metadata = event.metadata();
    LogEntry {
        ts: Utc::now(),
        level: level_name(metadata.level()).to_string(),
        name: metadata.target().to_string(),
        message: visitor.finish(),
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Collects the message and renders other fields as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        // Writing into a String cannot fail
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(level: &str, message: &str) -> LogEntry {
        LogEntry {
            ts: Utc::now(),
            level: level.to_string(),
            name: "test".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let buffer = LogRingBuffer::new(5);
        for i in 0..8 {
            buffer.push(entry("INFO", &format!("line {i}")));
        }

        assert_eq!(buffer.len(), 5);
        let messages: Vec<String> =
            buffer.get_recent(100, None).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["line 3", "line 4", "line 5", "line 6", "line 7"]);
    }

    #[test]
    fn test_get_recent_limit_and_level() {
        let buffer = LogRingBuffer::new(10);
        buffer.push(entry("INFO", "a"));
        buffer.push(entry("ERROR", "b"));
        buffer.push(entry("INFO", "c"));
        buffer.push(entry("ERROR", "d"));

        let recent = buffer.get_recent(2, None);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].message, "d");

        let errors = buffer.get_recent(10, Some("error"));
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["b", "d"]);

        assert!(buffer.get_recent(0, None).is_empty());
        assert!(buffer.get_recent(10, Some("warn")).is_empty());
    }

    #[test]
    fn test_concurrent_pushes_respect_capacity() {
        let buffer = Arc::new(LogRingBuffer::new(100));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        buffer.push(entry("DEBUG", &format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn test_layer_captures_events() {
        let buffer = Arc::new(LogRingBuffer::new(10));
        let subscriber = tracing_subscriber::registry().with(buffer.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("store opened");
            tracing::warn!(session = "abc", attempts = 3, "session conflict");
        });

        let entries = buffer.get_recent(10, None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, "INFO");
        assert_eq!(entries[0].message, "store opened");
        assert_eq!(entries[1].level, "WARN");
        assert_eq!(entries[1].message, "session conflict session=abc attempts=3");
        assert!(entries[1].name.contains("log_buffer"));
    }

    #[test]
    fn test_panicking_field_is_dropped() {
        struct Explodes;
        impl std::fmt::Debug for Explodes {
            fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                panic!("formatting failed")
            }
        }

        let buffer = Arc::new(LogRingBuffer::new(10));
        let subscriber = tracing_subscriber::registry().with(buffer.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(value = ?Explodes, "unformattable");
            tracing::info!("still logging");
        });

        let entries = buffer.get_recent(10, None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "still logging");
    }

    #[test]
    fn test_install_global_is_idempotent() {
        let first = install_global(50);
        let second = install_global(999);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(global().is_some());
    }
}
