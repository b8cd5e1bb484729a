//! Logging setup for Trellis
//!
//! Trellis logs through `tracing`. This module re-exports the macros used
//! across the workspace and provides [`LogConfig`] to install a subscriber.
//! `LogConfig` deserializes, so it can live next to the dispatcher options
//! in the application's config file:
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "pretty"
//! spans = true
//! output = { kind = "rolling", directory = "logs", prefix = "app", rotation = "daily" }
//! ```
//!
//! ```no_run
//! use trellis_core::logging::*;
//!
//! let _guard = LogConfig::new()
//!     .level(LogLevel::Debug)
//!     .format(LogFormat::Pretty)
//!     .init();
//!
//! info!("Dispatcher ready");
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt as std_fmt;
use std::io;
use std::str::FromStr;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Minimum level recorded when no `RUST_LOG` or custom filter applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(UnknownSetting(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured, one object per line
    Json,
    Plain,
    /// Multi-line, for development
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" => Ok(LogFormat::Plain),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(UnknownSetting(s.to_string())),
        }
    }
}

/// A level or format name that is not recognized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSetting(pub String);

impl std_fmt::Display for UnknownSetting {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        write!(f, "unknown logging setting `{}`", self.0)
    }
}

impl std::error::Error for UnknownSetting {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Append to a single file
    File { path: String },
    /// Rotate files under `directory`, named `prefix.<date>`
    Rolling {
        directory: String,
        prefix: String,
        rotation: Rotation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    Daily,
    Never,
}

impl From<Rotation> for tracing_appender::rolling::Rotation {
    fn from(rotation: Rotation) -> Self {
        match rotation {
            Rotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
            Rotation::Daily => tracing_appender::rolling::Rotation::DAILY,
            Rotation::Never => tracing_appender::rolling::Rotation::NEVER,
        }
    }
}

/// Subscriber settings; every field has a default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub thread_ids: bool,
    /// Include the module path of each record
    pub targets: bool,
    /// Emit span close events, which carry dispatch timings
    pub spans: bool,
    pub colors: bool,
    /// Overrides `level` when set, e.g. `"trellis_mvc=debug,trellis_core=info"`
    pub env_filter: Option<String>,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `TRELLIS_LOG_LEVEL` and `TRELLIS_LOG_FORMAT`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = env::var("TRELLIS_LOG_LEVEL").ok().and_then(|s| s.parse().ok()) {
            config.level = level;
        }
        if let Some(format) = env::var("TRELLIS_LOG_FORMAT").ok().and_then(|s| s.parse().ok()) {
            config.format = format;
        }
        config
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_thread_ids(mut self, enable: bool) -> Self {
        self.thread_ids = enable;
        self
    }

    pub fn with_targets(mut self, enable: bool) -> Self {
        self.targets = enable;
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.spans = enable;
        self
    }

    pub fn with_colors(mut self, enable: bool) -> Self {
        self.colors = enable;
        self
    }

    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Install the global subscriber.
    ///
    /// Keep the returned guard alive for the life of the program; dropping it
    /// flushes buffered records. If a subscriber is already installed it is
    /// left in place.
    pub fn init(self) -> io::Result<WorkerGuard> {
        let (writer, guard) = self.writer()?;
        let installed = Registry::default()
            .with(self.format_layer(writer))
            .with(self.filter())
            .try_init();
        match installed {
            Ok(()) => debug!(format = ?self.format, level = self.level.as_str(), "Subscriber installed"),
            Err(err) => debug!(error = %err, "Subscriber already installed, keeping it"),
        }
        Ok(guard)
    }

    fn filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.as_str());
        match &self.env_filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn writer(&self) -> io::Result<(NonBlocking, WorkerGuard)> {
        Ok(match &self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File { path } => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
            LogOutput::Rolling {
                directory,
                prefix,
                rotation,
            } => tracing_appender::non_blocking(
                tracing_appender::rolling::RollingFileAppender::new(
                    (*rotation).into(),
                    directory,
                    prefix,
                ),
            ),
        })
    }

    fn format_layer(&self, writer: NonBlocking) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(self.targets)
            .with_thread_ids(self.thread_ids)
            .with_span_events(span_events);

        match self.format {
            LogFormat::Json => layer.json().with_current_span(self.spans).boxed(),
            LogFormat::Plain => layer.with_ansi(self.colors).boxed(),
            LogFormat::Pretty => layer.pretty().with_ansi(self.colors).boxed(),
            LogFormat::Compact => layer.compact().with_ansi(self.colors).boxed(),
        }
    }
}

impl Default for LogConfig {
    /// JSON to stdout at info
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            thread_ids: false,
            targets: true,
            spans: false,
            colors: false,
            env_filter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_and_format_names() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));

        let err = "loud".parse::<LogLevel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown logging setting `loud`");
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::Stdout);
        assert!(config.targets);
    }

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .level(LogLevel::Debug)
            .format(LogFormat::Compact)
            .with_colors(true)
            .with_env_filter("trellis_mvc=trace");

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.colors);
        assert_eq!(config.env_filter.as_deref(), Some("trellis_mvc=trace"));
    }
}
