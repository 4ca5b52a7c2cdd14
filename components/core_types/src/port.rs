//! The host port: platform services the engine depends on.
//!
//! Embedders install an [`EnginePort`] implementation on the context to
//! supply the current time, the local time zone, diagnostic logging,
//! and the fatal handler invoked on invariant violation or resource
//! exhaustion. [`DefaultPort`] is the standard-library implementation
//! used by the CLI.

use crate::error::FatalCode;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a diagnostic message routed through the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Unrecoverable problems; always emitted.
    Error,
    /// Suspicious but recoverable conditions.
    Warning,
    /// Engine-internal diagnostics.
    Debug,
    /// High-volume tracing (per-instruction level).
    Trace,
}

/// Local time zone description returned by the port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeZoneInfo {
    /// Offset from UTC in milliseconds, without daylight saving.
    pub offset_ms: f64,
    /// Additional daylight saving offset in milliseconds, if active.
    pub daylight_saving_ms: f64,
}

/// Platform services required by the engine.
///
/// All engine entry points run single-threaded; port methods are called
/// synchronously from the engine and must not re-enter it.
pub trait EnginePort {
    /// Terminates execution with a fatal status code.
    ///
    /// The engine guarantees that no further script runs after a fatal
    /// is signaled. Implementations must not return.
    fn fatal(&self, code: FatalCode) -> !;

    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_time_ms(&self) -> f64;

    /// Returns the local time zone.
    fn time_zone(&self) -> TimeZoneInfo;

    /// Emits a diagnostic message.
    fn log(&self, level: LogLevel, message: &str);
}

/// Standard-library port used by the CLI and tests.
#[derive(Debug, Clone)]
pub struct DefaultPort {
    /// Most verbose level that is actually emitted.
    pub max_level: LogLevel,
}

impl DefaultPort {
    /// Creates a port that logs errors and warnings.
    pub fn new() -> Self {
        DefaultPort {
            max_level: LogLevel::Warning,
        }
    }

    /// Creates a port with an explicit verbosity ceiling.
    pub fn with_level(max_level: LogLevel) -> Self {
        DefaultPort { max_level }
    }
}

impl Default for DefaultPort {
    fn default() -> Self {
        Self::new()
    }
}

impl EnginePort for DefaultPort {
    fn fatal(&self, code: FatalCode) -> ! {
        eprintln!("Error: {}", code.name());
        std::process::exit(code.exit_code());
    }

    fn current_time_ms(&self) -> f64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as f64,
            Err(_) => 0.0,
        }
    }

    fn time_zone(&self) -> TimeZoneInfo {
        // The default build runs in UTC; embedders with libc access
        // override this.
        TimeZoneInfo {
            offset_ms: 0.0,
            daylight_saving_ms: 0.0,
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        if level <= self.max_level {
            eprintln!("[{:?}] {}", level, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_default_port_time_is_positive() {
        let port = DefaultPort::new();
        assert!(port.current_time_ms() > 0.0);
    }

    #[test]
    fn test_default_port_levels() {
        let port = DefaultPort::with_level(LogLevel::Trace);
        assert_eq!(port.max_level, LogLevel::Trace);
        // Emitting below and above the ceiling must not panic.
        port.log(LogLevel::Error, "error message");
        port.log(LogLevel::Trace, "trace message");
    }
}
