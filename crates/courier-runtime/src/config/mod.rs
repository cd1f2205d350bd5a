//! Configuration module for the Courier runtime.
//!
//! This module provides layered configuration loading (defaults, files,
//! environment, programmatic overrides) and validation for the dispatcher
//! and logging settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigFormat, ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CourierConfig, DispatchConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
