//! Logging configuration and setup.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Default directives applied when neither `RUST_LOG` nor a custom filter is set.
const WORKER_DIRECTIVES: &str = "rincon_sw={level},rincon_net={level},rincon_common={level}";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON lines, for hosts that collect worker logs.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the worker crates.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Include source file location.
    pub include_location: bool,
    /// Emit span close events (one line per finished lifecycle event).
    pub include_span_events: bool,
    /// Custom filter string (e.g., "rincon_sw=debug,reqwest=warn").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose configuration: cache hits, misses and evictions become visible.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// Single-line output, used by the smoke harness.
    pub fn compact() -> Self {
        Self {
            format: LogFormat::Compact,
            ..Default::default()
        }
    }

    /// JSON output at info level.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Set a custom filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Directives used when no explicit filter is configured.
    pub fn default_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        WORKER_DIRECTIVES.replace("{level}", &level)
    }

    fn env_filter(&self) -> EnvFilter {
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom)
                .unwrap_or_else(|_| EnvFilter::new(self.default_directives())),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.default_directives())),
        }
    }
}

/// Initialize logging, ignoring the error raised when a subscriber is already set.
pub fn init_logging(config: LogConfig) {
    if let Err(e) = try_init_logging(config) {
        tracing::debug!(error = %e, "Global subscriber already installed");
    }
}

/// Initialize logging with the given configuration.
pub fn try_init_logging(config: LogConfig) -> Result<(), TryInitError> {
    let filter = config.env_filter();

    let span_events = if config.include_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_span_events(span_events);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(false)
                .with_span_events(span_events);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_span_events(span_events);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
        }
    }
}
