//! Injectable logging capability.
//!
//! Components receive a [`Logger`] at construction instead of reaching for a
//! global. A logger carries a dotted name (extended per call site with
//! [`Logger::scoped`]) and a shared level filter, and emits through `tracing`.
//! [`Logger::null`] drops everything.

use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tracing::Level;

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    /// Above every level; a filter set to `Off` suppresses all output.
    Off,
}

/// Atomic level filter shared between a logger and its scoped children.
///
/// The level is stored as a u8: 0=Debug, 1=Info, 2=Warning, 3=Error, 4=Off.
pub struct LogLevelFilter(AtomicU8);

impl LogLevelFilter {
    /// Create a new filter with the given minimum level.
    pub fn new(level: LogLevel) -> Self {
        Self(AtomicU8::new(level_to_u8(level)))
    }

    /// Get the current minimum level.
    pub fn get(&self) -> LogLevel {
        u8_to_level(self.0.load(Ordering::Relaxed))
    }

    /// Set the minimum level.
    pub fn set(&self, level: LogLevel) {
        self.0.store(level_to_u8(level), Ordering::Relaxed);
    }

    /// Check if a message at the given level should be logged.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level_to_u8(level) >= self.0.load(Ordering::Relaxed)
    }
}

impl Default for LogLevelFilter {
    fn default() -> Self {
        Self::new(LogLevel::Debug)
    }
}

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warning => 2,
        LogLevel::Error => 3,
        LogLevel::Off => 4,
    }
}

fn u8_to_level(val: u8) -> LogLevel {
    match val {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Warning,
        3 => LogLevel::Error,
        _ => LogLevel::Off,
    }
}

/// Convert a [`LogLevel`] to the tracing level it is emitted at.
pub fn log_level_to_tracing(level: LogLevel) -> Option<Level> {
    match level {
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Warning => Some(Level::WARN),
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Off => None,
    }
}

/// Named logger that forwards to `tracing`.
#[derive(Clone)]
pub struct Logger {
    /// Minimum level to log.
    level_filter: Arc<LogLevelFilter>,
    /// Dotted logger name, e.g. `config_manager.client.get_boolean`.
    name: Option<String>,
}

impl Logger {
    /// Create a new logger that logs everything at debug and above.
    pub fn new() -> Self {
        Self {
            level_filter: Arc::new(LogLevelFilter::default()),
            name: None,
        }
    }

    /// A logger that never emits anything.
    pub fn null() -> Self {
        Self {
            level_filter: Arc::new(LogLevelFilter::new(LogLevel::Off)),
            name: None,
        }
    }

    /// Set the level filter.
    pub fn with_level_filter(mut self, filter: Arc<LogLevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    /// Set the logger name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Derive a child logger whose name is `parent.name`.
    ///
    /// The child shares the parent's level filter.
    pub fn scoped(&self, name: &str) -> Self {
        let name = match self.name {
            Some(ref parent) => format!("{}.{}", parent, name),
            None => name.to_string(),
        };
        Self {
            level_filter: Arc::clone(&self.level_filter),
            name: Some(name),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn level_filter(&self) -> &Arc<LogLevelFilter> {
        &self.level_filter
    }

    /// Log a message, optionally with structured data.
    pub fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        if !self.level_filter.should_log(level) {
            return;
        }
        let Some(tracing_level) = log_level_to_tracing(level) else {
            return;
        };

        let name = self.name.as_deref().unwrap_or("config_manager");
        let data = data.unwrap_or(Value::Null);
        match tracing_level {
            Level::ERROR => tracing::error!(logger = %name, data = %data, "{}", message),
            Level::WARN => tracing::warn!(logger = %name, data = %data, "{}", message),
            Level::INFO => tracing::info!(logger = %name, data = %data, "{}", message),
            Level::DEBUG => tracing::debug!(logger = %name, data = %data, "{}", message),
            Level::TRACE => tracing::trace!(logger = %name, data = %data, "{}", message),
        }
    }

    /// Log a message with structured data.
    pub fn log_with_data(&self, level: LogLevel, message: &str, data: Value) {
        self.log(level, message, Some(data));
    }

    pub fn debug(&self, msg: &str) {
        self.log(LogLevel::Debug, msg, None);
    }

    pub fn info(&self, msg: &str) {
        self.log(LogLevel::Info, msg, None);
    }

    pub fn warning(&self, msg: &str) {
        self.log(LogLevel::Warning, msg, None);
    }

    pub fn error(&self, msg: &str) {
        self.log(LogLevel::Error, msg, None);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("level", &self.level_filter.get())
            .finish()
    }
}
