//! # Courier
//!
//! In-process event dispatch for Rust.
//!
//! ## Overview
//!
//! Receivers declare typed entry points; firing an event delivers it to every
//! matching entry point on a worker pool, each call wrapped by the decorators
//! and observers its markers bind.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌───────────────────────────────────┐
//! │   Runtime   │────▶│ Dispatcher │────▶│ chain: decorators ▸ receiver call │
//! │ (config,    │     │ (registry, │────▶│ chain: observers  ▸ receiver call │
//! │  logging)   │     │  resolver) │────▶│ chain: ordered gate ▸ receiver    │
//! └─────────────┘     └────────────┘     └───────────────────────────────────┘
//! ```
//!
//! - **Runtime**: Loads configuration, sets up logging, owns the dispatcher
//! - **Dispatcher**: Matches events to live entry points and runs the chains
//! - **Markers**: Bind decorators and observers globally, per module, per
//!   receiver or per entry point
//! - **Ordered dispatch**: Batches delivered to each ordered entry in batch order
//! - **Bridges**: `Activity` and `Sequencer` turn an event exchange into one call
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier::prelude::*;
//!
//! struct Login {
//!     user: String,
//! }
//! impl_event!(Login);
//!
//! #[derive(Default)]
//! struct Audit;
//!
//! impl Receiver for Audit {
//!     fn declare(table: &mut ReceiverTable<Self>) {
//!         table.marker(Marker::new("logged"));
//!         table.on("on_login", |_: Arc<Self>, login: Received<Login>| async move {
//!             info!(user = %login.user, "login");
//!         });
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = CourierRuntime::new()?;
//!     let _audit = runtime.dispatcher().register::<Audit>()?;
//!
//!     runtime.dispatcher().fire(Login { user: "alice".into() });
//!     runtime.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use courier_core as core;
pub use courier_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use courier_runtime::{CourierRuntime, RuntimeError};

    // Events, receivers, markers and bindings
    pub use courier_core::prelude::*;

    // Logging macros
    pub use courier_runtime::prelude::*;
}
