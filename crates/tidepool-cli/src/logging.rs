//! Logging setup for the `tidepool` binary
//!
//! Console only. `RUST_LOG` takes precedence over the built-in filter; the
//! output is either human-readable or one JSON object per line.

use clap::ValueEnum;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Console output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open/close (per pool operation timing)
    pub enable_spans: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            include_location: cfg!(debug_assertions),
            enable_spans: false,
            default_filter: "warn,tidepool=info,tidepool_connection=info,tidepool_core=info"
                .to_string(),
        }
    }
}

impl LoggingConfig {
    /// Chatty configuration for `-v`
    pub fn verbose(format: LogFormat) -> Self {
        Self {
            format,
            include_location: true,
            enable_spans: true,
            default_filter: "info,tidepool=debug,tidepool_connection=debug,tidepool_core=debug"
                .to_string(),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = config.env_filter();

    // NEW fires once per span; ENTER would repeat on every re-poll.
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;

    tracing::debug!(format = ?config.format, "logging initialized");
    Ok(())
}
