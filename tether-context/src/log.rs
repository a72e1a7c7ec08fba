//! Log sink collaborator
//!
//! Aspects never talk to a logging backend directly. They report through a
//! [`LogSink`], which by default forwards to `tracing`.

use std::cell::{Cell, RefCell};
use std::fmt;

/// Where aspects report failures and debug traces
pub trait LogSink {
    /// Report a failure; `context` is the aspect's log prefix
    fn error(&self, context: &str, message: fmt::Arguments<'_>);

    /// Report a debug trace
    fn debug(&self, context: &str, message: fmt::Arguments<'_>);

    /// Gate for debug traces
    fn debug_enabled(&self) -> bool;
}

/// Forwards to the `tracing` macros
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    force_debug: Option<bool>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the debug gate instead of asking the subscriber
    pub fn with_debug(debug: bool) -> Self {
        Self {
            force_debug: Some(debug),
        }
    }
}

impl LogSink for TracingSink {
    fn error(&self, context: &str, message: fmt::Arguments<'_>) {
        tracing::error!(context = %context, "{}", message);
    }

    fn debug(&self, context: &str, message: fmt::Arguments<'_>) {
        tracing::debug!(context = %context, "{}", message);
    }

    fn debug_enabled(&self) -> bool {
        self.force_debug
            .unwrap_or_else(|| tracing::enabled!(tracing::Level::DEBUG))
    }
}

/// Severity of a collected entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Debug,
}

/// One collected log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub context: String,
    pub message: String,
}

/// Sink that keeps everything it is told, for tests
#[derive(Debug)]
pub struct CollectingSink {
    entries: RefCell<Vec<LogEntry>>,
    debug: Cell<bool>,
}

impl CollectingSink {
    /// Create a sink with the debug gate open
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            debug: Cell::new(true),
        }
    }

    pub fn set_debug_enabled(&self, enabled: bool) {
        self.debug.set(enabled);
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().clone()
    }

    /// Messages logged at error level
    pub fn errors(&self) -> Vec<String> {
        self.messages(LogLevel::Error)
    }

    /// Messages logged at debug level
    pub fn debugs(&self) -> Vec<String> {
        self.messages(LogLevel::Debug)
    }

    fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.level == level)
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn push(&self, level: LogLevel, context: &str, message: fmt::Arguments<'_>) {
        self.entries.borrow_mut().push(LogEntry {
            level,
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for CollectingSink {
    fn error(&self, context: &str, message: fmt::Arguments<'_>) {
        self.push(LogLevel::Error, context, message);
    }

    fn debug(&self, context: &str, message: fmt::Arguments<'_>) {
        self.push(LogLevel::Debug, context, message);
    }

    fn debug_enabled(&self) -> bool {
        self.debug.get()
    }
}
