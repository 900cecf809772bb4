//! Store event logging.
//!
//! Every internal event (open, transaction begin/commit/rollback, recovery,
//! checkpoints, failures) is emitted as a `tracing` event under the `objdb`
//! target with a `category` field. Applications that do not run a
//! `tracing` subscriber can install a [`LogSink`] through
//! [`Config::log_sink`](crate::Config::log_sink) instead; the sink only
//! observes and never influences the store.
//!
//! ```rust,ignore
//! let config = Config::default()
//!     .log_level(LogLevel::Debug)
//!     .log_sink(Arc::new(|level, message, category| {
//!         eprintln!("[{level}] {category}: {message}");
//!     }));
//! ```

use std::fmt;
use std::sync::Arc;

/// Severity of a store event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Per-record detail.
    Trace,
    /// Transaction lifecycle.
    Debug,
    /// Open, close, checkpoints.
    Info,
    /// Recoverable anomalies such as a torn WAL tail.
    Warn,
    /// Failed commits and other errors.
    Error,
    /// Disables the sink.
    Off,
}

impl LogLevel {
    /// Lower-case name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subsystem an event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Directory, WAL, checkpoint and recovery.
    Storage,
    /// Write transaction lifecycle.
    Transaction,
    /// Schema registration and matching.
    Schema,
    /// Observer and change feed delivery.
    Notification,
    /// First-open seeding.
    Bootstrap,
}

impl LogCategory {
    /// Dotted name used as the `category` field of tracing events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "objdb.storage",
            Self::Transaction => "objdb.transaction",
            Self::Schema => "objdb.schema",
            Self::Notification => "objdb.notification",
            Self::Bootstrap => "objdb.bootstrap",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives `(severity, message, category)` for every store event at or
/// above the configured level.
pub type LogSink = Arc<dyn Fn(LogLevel, &str, LogCategory) + Send + Sync>;

/// Fans store events out to `tracing` and the optional sink.
#[derive(Clone)]
pub(crate) struct StoreLogger {
    level: LogLevel,
    sink: Option<LogSink>,
}

impl StoreLogger {
    pub(crate) fn new(level: LogLevel, sink: Option<LogSink>) -> Self {
        Self { level, sink }
    }

    pub(crate) fn log(&self, level: LogLevel, category: LogCategory, args: fmt::Arguments<'_>) {
        emit_tracing(level, category, args);

        if level == LogLevel::Off || level < self.level {
            return;
        }
        if let Some(sink) = &self.sink {
            sink(level, &args.to_string(), category);
        }
    }
}

impl fmt::Debug for StoreLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLogger")
            .field("level", &self.level)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

fn emit_tracing(level: LogLevel, category: LogCategory, args: fmt::Arguments<'_>) {
    let category = category.as_str();
    match level {
        LogLevel::Trace => tracing::trace!(target: "objdb", category, "{}", args),
        LogLevel::Debug => tracing::debug!(target: "objdb", category, "{}", args),
        LogLevel::Info => tracing::info!(target: "objdb", category, "{}", args),
        LogLevel::Warn => tracing::warn!(target: "objdb", category, "{}", args),
        LogLevel::Error => tracing::error!(target: "objdb", category, "{}", args),
        LogLevel::Off => {}
    }
}

/// Logs a formatted store event: `store_log!(logger, Info, Storage, "...", args)`.
macro_rules! store_log {
    ($logger:expr, $level:ident, $category:ident, $($arg:tt)+) => {
        $logger.log(
            $crate::logging::LogLevel::$level,
            $crate::logging::LogCategory::$category,
            format_args!($($arg)+),
        )
    };
}

pub(crate) use store_log;

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn capture(level: LogLevel) -> (StoreLogger, Arc<Mutex<Vec<(LogLevel, String, LogCategory)>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink: LogSink = Arc::new(move |level, message: &str, category| {
            sink_events.lock().push((level, message.to_string(), category));
        });
        (StoreLogger::new(level, Some(sink)), events)
    }

    #[test]
    fn sink_receives_events_at_or_above_level() {
        let (logger, events) = capture(LogLevel::Info);
        store_log!(logger, Debug, Transaction, "begin {}", 1);
        store_log!(logger, Info, Storage, "opened {}", "db");
        store_log!(logger, Error, Transaction, "commit failed");

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            (LogLevel::Info, "opened db".to_string(), LogCategory::Storage)
        );
        assert_eq!(events[1].0, LogLevel::Error);
    }

    #[test]
    fn off_silences_the_sink() {
        let (logger, events) = capture(LogLevel::Off);
        store_log!(logger, Error, Storage, "ignored");
        assert!(events.lock().is_empty());
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogCategory::Bootstrap.to_string(), "objdb.bootstrap");
    }
}
