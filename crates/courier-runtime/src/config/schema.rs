//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;

use courier_core::Marker;
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourierConfig {
    /// Dispatcher settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Dispatch
// =============================================================================

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Worker threads of a dedicated runtime. Unset runs chains on the
    /// ambient tokio runtime.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Capacity of the completion report channel.
    #[serde(default = "default_completion_capacity")]
    pub completion_capacity: usize,

    /// Name of the dedicated worker threads.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Install the built-in `logged`, `timed` and `on_failure` bindings.
    #[serde(default = "default_builtins")]
    pub builtins: bool,

    /// Markers applied to every dispatch.
    #[serde(default)]
    pub global_markers: Vec<Marker>,

    /// Markers applied to receivers by module path prefix.
    #[serde(default)]
    pub module_markers: HashMap<String, Vec<Marker>>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: None,
            completion_capacity: default_completion_capacity(),
            thread_name: default_thread_name(),
            builtins: default_builtins(),
            global_markers: Vec::new(),
            module_markers: HashMap::new(),
        }
    }
}

fn default_completion_capacity() -> usize {
    courier_core::framework::DEFAULT_COMPLETION_CAPACITY
}

fn default_thread_name() -> String {
    courier_core::framework::DEFAULT_THREAD_NAME.to_string()
}

fn default_builtins() -> bool {
    true
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// All level names, from most to least verbose.
    pub const NAMES: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    /// Returns the lowercase level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parses a level name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Converts to the `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rollover period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Line format.
    #[serde(default)]
    pub format: LogFormat,

    /// Destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Span lifecycle events, useful to follow dispatch chains.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include file names and line numbers.
    #[serde(default)]
    pub file_location: bool,

    /// Log file, required when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// How often the log file rolls over.
    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: u32,

    /// Per-module level overrides, e.g. `courier_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::default(),
            max_files: default_max_files(),
            filters: HashMap::new(),
        }
    }
}

fn default_max_files() -> u32 {
    5
}
