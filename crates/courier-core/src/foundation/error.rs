//! Unified error types for the Courier core.

use thiserror::Error;

use super::marker::MarkerKind;

/// Boxed error produced by receivers and decorators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Registration Errors
// =============================================================================

/// Errors raised synchronously when a receiver or marker is registered.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// The receiver declared no entry points.
    #[error("receiver '{receiver}' declares no entry points")]
    NoEntryPoints {
        /// Receiver type name.
        receiver: String,
    },

    /// Two entry points share a name.
    #[error("receiver '{receiver}' declares entry point '{entry}' more than once")]
    DuplicateEntry {
        /// Receiver type name.
        receiver: String,
        /// The duplicated entry point name.
        entry: String,
    },

    /// A marker kind has no decorator or observer binding.
    #[error("marker '{kind}' has no decorator or observer binding")]
    UnboundMarker {
        /// The unbound marker kind.
        kind: MarkerKind,
    },

    /// A marker kind was bound twice.
    #[error("marker '{kind}' is already bound")]
    DuplicateBinding {
        /// The doubly bound marker kind.
        kind: MarkerKind,
    },

    /// The dispatcher no longer accepts registrations.
    #[error("dispatcher is shut down")]
    ShutDown,
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors that can occur when building or using a dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No worker count was configured and no ambient tokio runtime exists.
    #[error("no tokio runtime available; configure a worker count or build inside a runtime")]
    NoRuntime,

    /// Building the dedicated worker runtime failed.
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] std::io::Error),

    /// The dispatcher is shut down.
    #[error("dispatcher is shut down")]
    ShutDown,

    /// A binding or global marker was rejected while building.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The completion report for a fired event was lost.
    #[error("completion report for event {0} was dropped")]
    ReportDropped(String),
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

// =============================================================================
// Bridge Errors
// =============================================================================

/// Errors returned by synchronous bridges ([`Activity`](crate::Activity),
/// [`Sequencer`](crate::Sequencer)).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge was used in a state that does not allow the operation.
    #[error("invalid bridge state: {0}")]
    InvalidState(&'static str),

    /// The bridge completed with a failure.
    #[error("{message}")]
    Failed {
        /// Failure description.
        message: String,
        /// The underlying error, if any.
        #[source]
        cause: Option<BoxError>,
    },

    /// Registering the bridge's receivers failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
