//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{CourierConfig, DispatchConfig, LogLevel, LogOutput, LoggingConfig};
use courier_core::Marker;

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_dispatch_config(&config.dispatch)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validates dispatcher settings.
fn validate_dispatch_config(config: &DispatchConfig) -> ConfigResult<()> {
    if config.workers == Some(0) {
        return Err(ConfigError::validation("Worker count must be greater than 0"));
    }

    if config.completion_capacity == 0 {
        return Err(ConfigError::validation(
            "Completion capacity must be greater than 0",
        ));
    }

    if config.thread_name.trim().is_empty() {
        return Err(ConfigError::missing_field("dispatch.thread_name"));
    }

    validate_markers(&config.global_markers)?;

    for (prefix, markers) in &config.module_markers {
        if prefix.is_empty() {
            return Err(ConfigError::validation("Module marker prefix cannot be empty"));
        }
        validate_markers(markers)?;
    }

    Ok(())
}

/// Validates configured markers.
fn validate_markers(markers: &[Marker]) -> ConfigResult<()> {
    for marker in markers {
        let kind = marker.kind().as_str();
        if kind.is_empty() || kind.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid marker kind: '{kind}'"
            )));
        }
    }
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(config: &LoggingConfig) -> ConfigResult<()> {
    for (module, level) in &config.filters {
        if LogLevel::parse(level).is_none() {
            return Err(ConfigError::validation(format!(
                "Invalid log level for '{module}': {level}. Valid values are: {:?}",
                LogLevel::NAMES
            )));
        }
    }

    if config.output == LogOutput::File && config.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if config.max_files == 0 {
        return Err(ConfigError::validation("max_files must be greater than 0"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = CourierConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = CourierConfig::default();
        config.dispatch.workers = Some(0);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        config.dispatch.workers = Some(2);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_completion_capacity() {
        let mut config = CourierConfig::default();
        config.dispatch.completion_capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_invalid_filter_level() {
        let mut config = CourierConfig::default();
        config
            .logging
            .filters
            .insert("courier_core".to_string(), "loud".to_string());
        assert!(validate_config(&config).is_err());

        config
            .logging
            .filters
            .insert("courier_core".to_string(), "DEBUG".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_file_output_requires_path() {
        let mut config = CourierConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some("courier.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_marker_kinds() {
        let mut config = CourierConfig::default();
        config.dispatch.global_markers.push(Marker::new("not a kind"));
        assert!(validate_config(&config).is_err());

        config.dispatch.global_markers = vec![Marker::new("logged")];
        config
            .dispatch
            .module_markers
            .insert(String::new(), vec![Marker::new("timed")]);
        assert!(validate_config(&config).is_err());
    }
}
