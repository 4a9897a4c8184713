//! Structured logging utilities for Encore components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use encore_config::{log_cache_warn, log_journal_debug};
//!
//! log_cache_warn!("Overwriting existing entry", key = "abc");
//! log_journal_debug!("Journal written", entries = 12);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CACHE: &'static str = "CACHE";
    pub const DATASTORE: &'static str = "DATASTORE";
    pub const STORE: &'static str = "STORE";
    pub const JOURNAL: &'static str = "JOURNAL";
    pub const WORKER: &'static str = "WORKER";
    pub const DOWNLOAD: &'static str = "DOWNLOAD";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse a level name, falling back to `Info` for unknown names.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === CACHE logging macros ===

#[macro_export]
macro_rules! log_cache_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "CACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cache_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cache_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CACHE", $($key = $value,)* $msg)
    };
}

// === DATASTORE logging macros ===

#[macro_export]
macro_rules! log_datastore_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "DATASTORE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_datastore_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DATASTORE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_datastore_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "DATASTORE", $($key = $value,)* $msg)
    };
}

// === STORE logging macros (shared by caches and datastores) ===

#[macro_export]
macro_rules! log_store_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "STORE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_store_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "STORE", $($key = $value,)* $msg)
    };
}

// === JOURNAL logging macros ===

#[macro_export]
macro_rules! log_journal_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "JOURNAL", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_journal_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "JOURNAL", $($key = $value,)* $msg)
    };
}

// === WORKER logging macros ===

#[macro_export]
macro_rules! log_worker_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "WORKER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_worker_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "WORKER", $($key = $value,)* $msg)
    };
}

// === DOWNLOAD logging macros ===

#[macro_export]
macro_rules! log_download_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "DOWNLOAD", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_download_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "DOWNLOAD", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_download_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "DOWNLOAD", $($key = $value,)* $msg)
    };
}

/// Initialize logging to stderr with the given level filter.
/// Call this once at application startup. `RUST_LOG` takes precedence.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
