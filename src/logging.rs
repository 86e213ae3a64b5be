//! Structured logging for confgraph
//!
//! Every log line carries structured fields so a run can be audited after the
//! fact: which nodes hit the cache, which targets ran and for how long, and
//! what a flush wrote.
//!
//! # Log Format Conventions
//!
//! - `service`: The component logging ("resolver", "cache.memory", "cache.snapshot")
//! - `operation`: The operation being performed ("get", "put", "load", "flush", "invoke")
//! - `status`: The result status ("hit", "miss", "success", "error", "skipped")
//! - `fingerprint`: Short form of the cache key
//! - `target_id`: Canonical target identifier
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(
//!     service = "cache.memory",
//!     operation = "get",
//!     status = "hit",
//!     fingerprint = key.short(),
//!     target_id = "confgraph::builtins::sum",
//!     "cache lookup"
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

/// Formatter that shows "confgraph" instead of the full module path
struct ConfgraphFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ConfgraphFormatter
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
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(confgraph)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(confgraph): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without colors (CI)
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse a format name; unknown names fall back to the environment default
    pub fn parse(name: &str, ci: bool) -> Self {
        match name.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }

    /// Read `CONFGRAPH_LOG_FORMAT`, defaulting to compact when `CI` is set
    pub fn from_env() -> Self {
        let name = std::env::var("CONFGRAPH_LOG_FORMAT").unwrap_or_default();
        Self::parse(&name, std::env::var("CI").is_ok())
    }
}

/// Initialize the global tracing subscriber
///
/// `default_level` applies unless `RUST_LOG` is set.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Log filter (e.g., "debug", "confgraph=trace")
/// - `CONFGRAPH_LOG_FORMAT`: Format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be installed (tests, embedding applications)
    let result = match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ConfgraphFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ConfgraphFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
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
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already set: {}", e);
    }
}

/// Service names for consistent logging
pub mod services {
    pub const RESOLVER: &str = "resolver";
    pub const CACHE_MEMORY: &str = "cache.memory";
    pub const CACHE_SNAPSHOT: &str = "cache.snapshot";
    pub const PERSISTENCE: &str = "persistence";
}

/// Operation names for consistent logging
pub mod operations {
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const LOAD: &str = "load";
    pub const FLUSH: &str = "flush";
    pub const INVOKE: &str = "invoke";
}

/// Status values for consistent logging
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
    pub const SKIPPED: &str = "skipped";
}
