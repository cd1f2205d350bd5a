//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while starting or running a [`CourierRuntime`](crate::CourierRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Building the dispatcher failed.
    #[error("Failed to build dispatcher: {0}")]
    Dispatch(#[from] courier_core::DispatchError),

    /// A configured marker was rejected by the dispatcher.
    #[error("Invalid configured marker: {0}")]
    Marker(#[from] courier_core::RegistrationError),

    /// Installing a shutdown signal handler failed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
