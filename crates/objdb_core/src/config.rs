//! Store configuration.

use crate::logging::{LogLevel, LogSink};
use std::fmt;

/// What `begin_write` does while another writer holds the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Wait in FIFO order until the slot is free.
    #[default]
    Block,
    /// Fail immediately with `WriteConflict`.
    Fail,
}

/// Configuration for opening a store.
#[derive(Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the WAL on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Behaviour of `begin_write` under contention.
    pub write_policy: WritePolicy,

    /// WAL size that triggers an automatic checkpoint after a commit.
    pub max_wal_size: u64,

    /// Number of change events kept for `poll_changes`.
    pub change_history: usize,

    /// Minimum level forwarded to the log sink.
    pub log_level: LogLevel,

    /// Optional receiver of store events.
    pub log_sink: Option<LogSink>,

    /// Format version written to new stores.
    pub format_version: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            write_policy: WritePolicy::Block,
            max_wal_size: 16 * 1024 * 1024, // 16 MB
            change_history: 10_000,
            log_level: LogLevel::Info,
            log_sink: None,
            format_version: (1, 0),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the WAL on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the contention behaviour of `begin_write`.
    #[must_use]
    pub const fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Sets the WAL size that triggers an automatic checkpoint.
    #[must_use]
    pub const fn max_wal_size(mut self, size: u64) -> Self {
        self.max_wal_size = size;
        self
    }

    /// Sets how many change events are retained for polling.
    #[must_use]
    pub const fn change_history(mut self, events: usize) -> Self {
        self.change_history = events;
        self
    }

    /// Sets the minimum level forwarded to the log sink.
    #[must_use]
    pub const fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Installs a log sink.
    #[must_use]
    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("create_if_missing", &self.create_if_missing)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("write_policy", &self.write_policy)
            .field("max_wal_size", &self.max_wal_size)
            .field("change_history", &self.change_history)
            .field("log_level", &self.log_level)
            .field("log_sink", &self.log_sink.is_some())
            .finish_non_exhaustive()
    }
}
