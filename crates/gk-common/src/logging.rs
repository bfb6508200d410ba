//! Structured Logging Configuration
//!
//! Provides configurable logging with:
//! - JSON output for production (`format = "json"` or LOG_FORMAT=json)
//! - Human-readable output for development (default)
//!
//! # Usage
//!
//! ```rust,ignore
//! use gk_common::logging::{init_logging, LogFormat};
//!
//! fn main() {
//!     init_logging("gatekeeper", LogFormat::Text, "info").unwrap();
//!     tracing::info!(principal_id = %id, "Principal logged in");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: overrides the configured format ("json" or "text")
//! - `RUST_LOG`: standard filter, takes precedence over the configured level
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=gk_access=trace,info`

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Unknown log format: {0}")]
    UnknownFormat(String),

    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level`; `LOG_FORMAT` wins over `format`.
pub fn init_logging(
    service_name: &str,
    format: LogFormat,
    default_level: &str,
) -> Result<(), LoggingError> {
    let format = match std::env::var("LOG_FORMAT") {
        Ok(value) if !value.is_empty() => value.parse()?,
        _ => format,
    };

    let env_filter = build_filter(default_level)?;

    let result = match format {
        LogFormat::Json => init_json_logging(env_filter),
        LogFormat::Text => init_text_logging(env_filter),
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(service = service_name, ?format, "Logging initialized");
    Ok(())
}

fn build_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| LoggingError::InvalidFilter {
            filter: default_level.to_string(),
            message: e.to_string(),
        }),
    }
}

fn init_json_logging(
    env_filter: EnvFilter,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(false)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init()
}

fn init_text_logging(
    env_filter: EnvFilter,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true),
        )
        .try_init()
}
