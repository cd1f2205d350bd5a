//! Logging setup for Courier processes.
//!
//! The dispatcher opens a `dispatch` span per fired event and a `chain` span
//! per receiver chain, both at `DEBUG` under the `courier_core` target.
//! Enabling span events therefore also lowers the `courier_core` filter to
//! `debug` unless a filter for it is configured, otherwise the spans would
//! never be recorded.
//!
//! ```rust,ignore
//! use courier_runtime::config::load_config;
//! use courier_runtime::logging;
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```

use std::ffi::OsStr;
use std::path::Path;

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// Target of the dispatcher's spans and events.
pub const CORE_TARGET: &str = "courier_core";

const DEFAULT_LOG_FILE: &str = "courier.log";

/// Span lifecycle events written to the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    /// No span events.
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };

    /// One line when a `dispatch` or `chain` span opens and one with its
    /// busy/idle timing when it closes.
    pub const DISPATCH: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    /// Every span transition, including each poll of a chain.
    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn is_none(self) -> bool {
        self == Self::NONE
    }

    fn to_fmt_span(self) -> FmtSpan {
        [
            (self.new, FmtSpan::NEW),
            (self.enter, FmtSpan::ENTER),
            (self.exit, FmtSpan::EXIT),
            (self.close, FmtSpan::CLOSE),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
    }
}

impl From<&SpanEventConfig> for SpanEvents {
    fn from(config: &SpanEventConfig) -> Self {
        Self {
            new: config.new,
            enter: config.enter,
            exit: config.exit,
            close: config.close,
        }
    }
}

/// Initializes logging from a `LoggingConfig`.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Subscriber settings derived from a [`LoggingConfig`].
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: tracing::Level,
    directives: Vec<String>,
    span_events: SpanEvents,
    format: LogFormat,
    output: LogOutput,
    thread_ids: bool,
    file_location: bool,
    file: Option<LogFile>,
}

#[derive(Debug, Clone)]
struct LogFile {
    dir: std::path::PathBuf,
    name: String,
    rotation: LogRotation,
    max_files: usize,
}

impl LoggingBuilder {
    /// Creates a builder from configuration.
    ///
    /// Invalid filters are skipped with a warning.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut directives = Vec::new();
        for (module, level) in &config.filters {
            match LogLevel::parse(level) {
                Some(level) => directives.push(format!("{module}={level}")),
                None => warn!(module = %module, level = %level, "Ignoring invalid log filter"),
            }
        }

        let span_events = SpanEvents::from(&config.span_events);
        if !span_events.is_none() && !config.filters.contains_key(CORE_TARGET) {
            directives.push(format!("{CORE_TARGET}=debug"));
        }

        let file = config.file_path.as_deref().map(|path| LogFile {
            dir: path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf(),
            name: path
                .file_name()
                .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE))
                .to_string_lossy()
                .into_owned(),
            rotation: config.rotation,
            max_files: config.max_files as usize,
        });

        Self {
            level: config.level.to_tracing_level(),
            directives,
            span_events,
            format: config.format,
            output: config.output,
            thread_ids: config.thread_ids,
            file_location: config.file_location,
            file,
        }
    }

    /// Adds a filter directive, e.g. `courier_core::ordered=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Overrides the configured span events.
    pub fn span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    /// Installs the subscriber, ignoring a failure.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber as the global default.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.filter();
        let layer = self.layer(self.writer());
        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
    }

    /// `RUST_LOG` replaces the configured level; directives apply on top.
    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()));
        for directive in &self.directives {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => warn!(directive = %directive, error = %err, "Ignoring log directive"),
            }
        }
        filter
    }

    fn writer(&self) -> BoxMakeWriter {
        match (self.output, &self.file) {
            (LogOutput::Stdout, _) => BoxMakeWriter::new(std::io::stdout),
            (LogOutput::Stderr, _) => BoxMakeWriter::new(std::io::stderr),
            (LogOutput::File, Some(file)) => match file.appender() {
                Ok(appender) => BoxMakeWriter::new(appender),
                Err(err) => {
                    warn!(dir = %file.dir.display(), error = %err, "Cannot open log file, using stderr");
                    BoxMakeWriter::new(std::io::stderr)
                }
            },
            (LogOutput::File, None) => {
                warn!("File output requested without a file path, using stdout");
                BoxMakeWriter::new(std::io::stdout)
            }
        }
    }

    fn layer(&self, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_writer(writer)
            .with_span_events(self.span_events.to_fmt_span())
            .with_thread_ids(self.thread_ids)
            .with_file(self.file_location)
            .with_line_number(self.file_location);
        match self.format {
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Full => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => base.json().boxed(),
        }
    }
}

impl LogFile {
    fn appender(&self) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
        let rotation = match self.rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        };
        let builder = RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(&self.name);
        let builder = match self.rotation {
            LogRotation::Never => builder,
            _ => builder.max_log_files(self.max_files),
        };
        builder.build(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_events_from_config() {
        let config = SpanEventConfig {
            new: true,
            enter: false,
            exit: false,
            close: true,
        };
        let events = SpanEvents::from(&config);
        assert_eq!(events, SpanEvents::DISPATCH);
        assert_eq!(events.to_fmt_span(), FmtSpan::NEW | FmtSpan::CLOSE);
        assert_eq!(SpanEvents::NONE.to_fmt_span(), FmtSpan::NONE);
    }

    #[test]
    fn test_builder_keeps_valid_filters() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            thread_ids: true,
            ..Default::default()
        };
        config
            .filters
            .insert("courier_core".to_string(), "Trace".to_string());
        config
            .filters
            .insert("noisy".to_string(), "shout".to_string());

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, tracing::Level::WARN);
        assert!(builder.thread_ids);
        assert_eq!(builder.directives, ["courier_core=trace"]);
    }

    #[test]
    fn test_span_events_enable_dispatch_spans() {
        let mut config = LoggingConfig::default();
        config.span_events.new = true;
        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.directives, ["courier_core=debug"]);

        // an explicit filter for the core wins
        config
            .filters
            .insert("courier_core".to_string(), "info".to_string());
        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.directives, ["courier_core=info"]);

        let quiet = LoggingBuilder::from_config(&LoggingConfig::default());
        assert!(quiet.directives.is_empty());
    }

    #[test]
    fn test_file_output_splits_path() {
        let config = LoggingConfig {
            output: LogOutput::File,
            file_path: Some("logs/dispatch.log".into()),
            rotation: LogRotation::Daily,
            max_files: 3,
            ..Default::default()
        };
        let file = LoggingBuilder::from_config(&config).file.unwrap();
        assert_eq!(file.dir, Path::new("logs"));
        assert_eq!(file.name, "dispatch.log");
        assert_eq!(file.max_files, 3);

        let bare = LoggingConfig {
            file_path: Some("dispatch.log".into()),
            ..Default::default()
        };
        let file = LoggingBuilder::from_config(&bare).file.unwrap();
        assert_eq!(file.dir, Path::new("."));
    }

    #[test]
    fn test_rolling_appender_writes_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = LogFile {
            dir: dir.path().to_path_buf(),
            name: "courier.log".to_string(),
            rotation: LogRotation::Never,
            max_files: 1,
        };
        assert!(file.appender().is_ok());
        assert!(dir.path().join("courier.log").exists());
    }
}
