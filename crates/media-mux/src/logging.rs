//! Logging setup for the dispatcher binary and embedders
//!
//! The library itself only emits `tracing` events. Installing a subscriber is
//! left to the application; [`setup_logging`] is the stock one.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Maximum level for this crate's events
    pub level: Level,
    /// Emit newline-delimited JSON instead of human-readable lines
    pub json: bool,
    /// Include source file and line
    pub file_info: bool,
    /// Log span enter/exit
    pub log_spans: bool,
    /// Name reported in the startup line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "media-mux".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Configuration at a given level
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Switch to JSON output
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Include file and line information
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Log span activity
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Set the reported application name
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Filter applied when `RUST_LOG` is not set
    ///
    /// Per-packet events are at `trace`, so `debug` stays readable under load.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "warn,rvoip_media_mux={level},media_mux={level}",
                level = self.level
            ))
        })
    }
}

/// Install a global `tracing` subscriber
///
/// Fails if a subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().with_writer(std::io::stdout).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::Config(format!("Failed to install log subscriber: {}", e)))?;

    tracing::info!("Starting {} v{}", config.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Parse a log level name such as `debug` or `WARN`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}
