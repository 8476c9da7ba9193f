//! Logging infrastructure - structured tracing across the boundary
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels
//! - Zero-cost when disabled
//! - Optional JSON and file output
//! - Drop-guard performance tracking

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, trace, warn, Level};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Flush guard for the file writer, held for the process lifetime
static FILE_GUARD: Mutex<Option<WorkerGuard>> = parking_lot::const_mutex(None);

static TRACK_PERFORMANCE: AtomicBool = AtomicBool::new(false);

/// Logging configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Emit `perf::track` timings
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

/// Parse a level name, case-insensitive
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `PFFI_LOG_*` variables on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        // PFFI_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("PFFI_LOG_LEVEL") {
            self.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        if let Ok(path) = std::env::var("PFFI_LOG_FILE") {
            self.file_output = true;
            self.log_path = Some(path);
        }

        if std::env::var("PFFI_LOG_JSON").is_ok() {
            self.json_format = true;
        }

        if std::env::var("PFFI_LOG_SPANS").is_ok() {
            self.show_spans = true;
        }

        if let Ok(val) = std::env::var("PFFI_LOG_PERF") {
            self.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        self
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("packed_ffi.log".to_string()),
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration (first call wins)
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        TRACK_PERFORMANCE.store(config.track_performance, Ordering::Relaxed);

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("packed_ffi={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let writer = match config.log_path.as_deref().filter(|_| config.file_output) {
            Some(path) => {
                let path = Path::new(path);
                let directory = path.parent().unwrap_or_else(|| Path::new("."));
                let file_name = path.file_name().unwrap_or_else(|| "packed_ffi.log".as_ref());
                let appender = tracing_appender::rolling::never(directory, file_name);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                *FILE_GUARD.lock() = Some(guard);
                BoxMakeWriter::new(non_blocking)
            }
            None => BoxMakeWriter::new(io::stderr),
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions))
            .with_line_number(cfg!(debug_assertions));

        // Another subscriber may already be installed by the host
        let installed = if config.json_format {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
        };
        if installed.is_err() {
            debug!(event = "logging_init_skipped", "global subscriber already set");
        }
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Boundary events
// ============================================================================

/// Log a foreign-to-native call
#[inline]
pub fn log_call(handle: *const core::ffi::c_void, arg_count: usize, path: &'static str) {
    trace!(
        event = "call",
        handle = ?handle,
        args = arg_count,
        path,
        "Native function called"
    );
}

/// Log a native-to-foreign callback dispatch
#[inline]
pub fn log_callback(callable: &str, arg_count: usize) {
    trace!(
        event = "callback",
        callable,
        args = arg_count,
        "Callback dispatched"
    );
}

/// Log a callback failure converted to a status code
pub fn log_callback_error(callable: &str, error: &str) {
    debug!(
        event = "callback_error",
        callable,
        error,
        "Callback raised, deferring error"
    );
}

/// Log the release of a handle owned by the foreign side
#[inline]
pub fn log_handle_release(kind: &'static str, handle: *const core::ffi::c_void) {
    trace!(
        event = "handle_release",
        kind,
        handle = ?handle,
        "Handle released"
    );
}

/// Log a marshalling failure
pub fn log_marshal_error(error: &str) {
    debug!(
        event = "marshal_error",
        error,
        "Marshalling failed before dispatch"
    );
}

/// Log a failed native call
pub fn log_native_error(error: &str) {
    debug!(
        event = "native_error",
        error,
        "Native call failed"
    );
}

/// Log runtime initialization
pub fn log_runtime_init() {
    info!(
        event = "runtime_init",
        "packed-ffi runtime initializing"
    );
}

/// Performance tracking utilities
pub mod perf {
    use super::TRACK_PERFORMANCE;
    use std::sync::atomic::Ordering;
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: TRACK_PERFORMANCE.load(Ordering::Relaxed).then(Instant::now),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Option<Instant>,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            if let Some(start) = self.start {
                debug!(
                    operation = self.operation,
                    duration_us = start.elapsed().as_micros() as u64,
                    "operation completed"
                );
            }
        }
    }
}
