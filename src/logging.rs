//! Structured logging for scriptdeps
//!
//! All logs use structured fields so they can be filtered and aggregated.
//!
//! # Log Format Conventions
//!
//! - `operation`: What is happening ("upsert", "resolve", "refresh", ...)
//! - `status`: The outcome ("changed", "unchanged", "failed", "superseded")
//! - `script`: Normalized script path
//! - `sequence`: Request sequence number of an asynchronous resolution
//! - `entry_count`: Number of scripts in a batch
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracing::debug;
//!
//! debug!(
//!     operation = operations::UPSERT,
//!     status = status::CHANGED,
//!     script = %key,
//!     "cache entry updated"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that shows "scriptdeps" instead of the full module path
struct ScriptDepsFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ScriptDepsFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(writer, "{}{:5}(scriptdeps)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(scriptdeps): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from `SCRIPTDEPS_LOG_FORMAT`, defaulting to compact on CI
    pub fn from_env() -> Self {
        match std::env::var("SCRIPTDEPS_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Log level filter (default "info")
/// - `SCRIPTDEPS_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: If set, defaults to compact format
///
/// Calling it more than once is harmless; only the first call installs a subscriber.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match LogFormat::from_env() {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(ScriptDepsFormatter { with_ansi: true })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(ScriptDepsFormatter { with_ansi: false })
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .try_init()
                .ok();
        }
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const UPSERT: &str = "upsert";
    pub const DELETE: &str = "delete";
    pub const REFRESH: &str = "refresh";
    pub const RESOLVE: &str = "resolve";
    pub const REQUEST: &str = "request";
    pub const LOAD_HINT: &str = "load_hint";
    pub const WRITE_HINT: &str = "write_hint";
}

/// Status values for consistent logging
pub mod status {
    pub const CHANGED: &str = "changed";
    pub const UNCHANGED: &str = "unchanged";
    pub const FAILED: &str = "failed";
    pub const SUPERSEDED: &str = "superseded";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_log_format_from_env() {
        std::env::set_var("SCRIPTDEPS_LOG_FORMAT", "json");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);

        std::env::set_var("SCRIPTDEPS_LOG_FORMAT", "Compact");
        assert_eq!(LogFormat::from_env(), LogFormat::Compact);

        std::env::set_var("SCRIPTDEPS_LOG_FORMAT", "pretty");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

        std::env::remove_var("SCRIPTDEPS_LOG_FORMAT");
    }

    #[test]
    #[serial]
    fn test_init_twice_is_harmless() {
        init();
        init();
    }
}
