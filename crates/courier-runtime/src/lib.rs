//! Courier Runtime - Process layer for the Courier event framework.
//!
//! This crate provides:
//! - Layered configuration loading and validation (`CourierConfig`, `ConfigLoader`)
//! - Logging setup on `tracing-subscriber` (`LoggingBuilder`, `SpanEvents`)
//! - A runtime owning the configured dispatcher (`CourierRuntime`)
//!
//! ```ignore
//! use courier_runtime::CourierRuntime;
//!
//! #[tokio::main]
//! async fn main() -> courier_runtime::RuntimeResult<()> {
//!     let runtime = CourierRuntime::builder()
//!         .config_file("courier.toml")
//!         .build()?;
//!
//!     let _audit = runtime.dispatcher().register::<Audit>()?;
//!     runtime.run_until_signal().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, CourierConfig, DispatchConfig, LoggingConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{CourierRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
