//! Observer trait and the default logging sink.

use crate::protocol::ProgressUpdate;

/// Receiver for out-of-band engine events.
///
/// # Implementation Notes
///
/// - Methods are called synchronously while a reply is being read; keep
///   them cheap.
/// - Both methods default to no-ops.
pub trait EngineObserver: Send + Sync {
    /// Called with the stderr lines collected for a failed command.
    fn on_engine_error(&self, lines: &[String]) {
        let _ = lines;
    }

    /// Called for every progress-bar line.
    fn on_progress(&self, update: &ProgressUpdate) {
        let _ = update;
    }
}

/// Observer that forwards events to `tracing`.
///
/// This is the sink used when no observer is registered. Engine errors are
/// always logged at warn level; progress is logged at the configured level.
#[derive(Debug, Clone, Default)]
pub struct LoggingObserver {
    level: LogLevel,
}

/// Log level for progress events.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogLevel {
    /// Log at trace level.
    Trace,
    /// Log at debug level (default).
    #[default]
    Debug,
    /// Log at info level.
    Info,
}

impl LoggingObserver {
    /// Create a new logging observer with debug level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logging observer with a specific level.
    pub fn with_level(level: LogLevel) -> Self {
        Self { level }
    }
}

impl EngineObserver for LoggingObserver {
    fn on_engine_error(&self, lines: &[String]) {
        for line in lines {
            tracing::warn!(message = %line, "cqp_error");
        }
    }

    fn on_progress(&self, update: &ProgressUpdate) {
        let ProgressUpdate {
            pass,
            total,
            message,
            percent,
        } = update;
        match self.level {
            LogLevel::Trace => {
                tracing::trace!(pass, total, ?percent, message = %message, "cqp_progress");
            }
            LogLevel::Debug => {
                tracing::debug!(pass, total, ?percent, message = %message, "cqp_progress");
            }
            LogLevel::Info => {
                tracing::info!(pass, total, ?percent, message = %message, "cqp_progress");
            }
        }
    }
}
