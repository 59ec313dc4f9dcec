//! A minimal, zero-dependency logging crate for the `smartalloc` workspace.
//!
//! Records are filtered by a global level and handed to a sink. The default
//! sink writes colored lines to stderr; tests and embedders can install their
//! own with [`set_sink`].
//!
//! The default level is [`Level::Warn`] so that a library linked into a
//! larger program stays quiet unless asked otherwise.
//!
//! # Example
//!
//! ```
//! use smartalloc_log::{debug, error, info, warn, Level};
//!
//! smartalloc_log::set_level(Level::Debug);
//!
//! let blocks = 3;
//! info!("released {} blocks", blocks);
//! debug!("header sizes: {:?}", [16, 24]);
//! warn!("allocation failed");
//! error!("reference count overflow");
//! ```

use std::fmt::Arguments;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{OnceLock, RwLock};

/// Log levels representing the severity of a record.
///
/// Lower numeric values indicate higher severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Contract violations right before the process aborts.
    Error = 0,
    /// Recoverable failures such as an exhausted allocator.
    Warn = 1,
    /// Configuration changes.
    Info = 2,
    /// Diagnostic detail.
    Debug = 3,
    /// Per-operation tracing.
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Returns the upper-case name of this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    /// Parses a level name, ignoring case.
    ///
    /// ```
    /// use smartalloc_log::Level;
    ///
    /// assert_eq!("warn".parse::<Level>(), Ok(Level::Warn));
    /// assert!("loud".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log record as seen by a sink.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Severity of the record.
    pub level: Level,
    /// Module path of the call site.
    pub target: &'a str,
    /// Formatted message.
    pub args: Arguments<'a>,
}

/// Destination for records that passed the level filter.
pub type Sink = fn(&Record<'_>);

/// The global logger: an atomic level filter.
pub struct Logger {
    level: AtomicU8,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
        }
    }

    /// Sets the minimum level that will be emitted.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current minimum level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Checks whether a record at `level` would be emitted.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

static SINK: RwLock<Option<Sink>> = RwLock::new(None);

/// Returns the global logger, initializing it at [`Level::Warn`].
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Warn))
}

/// Sets the minimum level of the global logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the minimum level from a level name such as `"debug"`.
///
/// # Errors
///
/// Returns the offending input when it does not name a level.
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    set_level(s.parse()?);
    Ok(())
}

/// Returns `true` if records at `level` are currently emitted.
#[inline]
pub fn enabled(level: Level) -> bool {
    get_logger().enabled(level)
}

/// Routes all subsequent records to `sink` instead of stderr.
pub fn set_sink(sink: Sink) {
    *SINK.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sink);
}

/// Restores the default stderr sink.
pub fn reset_sink() {
    *SINK.write().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
}

fn stderr_sink(record: &Record<'_>) {
    const RESET: &str = "\x1b[0m";
    let color = record.level.color_code();
    eprintln!(
        "{color}[{}]{RESET} {}: {}",
        record.level.as_str(),
        record.target,
        record.args
    );
}

/// Dispatches a record to the active sink. Called by the macros after the
/// level check.
#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments<'_>) {
    if !enabled(level) {
        return;
    }

    let record = Record {
        level,
        target,
        args,
    };
    let sink = *SINK.read().unwrap_or_else(std::sync::PoisonError::into_inner);
    sink.unwrap_or(stderr_sink)(&record);
}

/// Logs a message at an explicit level, capturing the caller's module path.
///
/// ```
/// use smartalloc_log::{log, Level};
///
/// log!(level: Level::Info, "seam swapped to {}", "counting");
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs a message at the Error level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs a message at the Warn level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs a message at the Info level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs a message at the Debug level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs a message at the Trace level.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}
