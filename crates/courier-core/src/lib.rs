//! # Courier Core
//!
//! The in-process event dispatch engine of the Courier framework.
//!
//! Receivers declare entry points for event types. Firing an event delivers
//! it, concurrently and independently, to every live entry point that can
//! view it, each call wrapped in the decorators and observers its markers
//! bind.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! Core abstractions and type system:
//! - **Event System**: Type-erased, identity-carrying events ([`Event`], [`BoxedEvent`])
//! - **Weak Identity**: Non-owning event references ([`EventRef`])
//! - **Markers**: Parameterized annotations on receivers ([`Marker`])
//!
//! ### Framework Layer
//!
//! Registration and dispatch:
//! - **Receivers**: Declared entry points ([`Receiver`], [`ReceiverTable`])
//! - **Bindings**: Marker-bound wrappers ([`Decorator`], [`Observer`])
//! - **Dispatcher**: Registry, resolver and worker pool ([`Dispatcher`])
//!
//! ### Coordination Layer
//!
//! - **Ordered Dispatch**: Per-receiver batch ordering ([`OrderedDispatch`])
//! - **Synchronous Bridges**: Await the event that completes a call
//!   ([`Activity`], [`Sequencer`])
//!
//! ## Dispatch Flow
//!
//! ```text
//!                    ┌────────────┐     ┌──────────────────────────────┐
//!  fire(event) ────▶ │ Dispatcher │ ──▶ │ @on_failure ▸ @timed ▸ entry │
//!                    │  snapshot  │ ──▶ │ @logged     ▸ entry          │
//!                    └────────────┘ ──▶ │ entry                        │
//!                                       └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_core::prelude::*;
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
//!         table
//!             .on("on_login", |_: Arc<Self>, login: Received<Login>| async move {
//!                 tracing::info!(user = %login.user, "login");
//!             })
//!             .marker(Marker::new("timed").with("warn_after_ms", 50));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::builder().with_builtins().build()?;
//!     let registration = dispatcher.register::<Audit>()?;
//!
//!     dispatcher.fire_and_wait(Login { user: "alice".into() }).await?;
//!
//!     registration.cancel();
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```

// Architectural layers
pub mod bridge;
pub mod builtin;
pub mod foundation;
pub mod framework;
pub mod ordered;

// Re-export foundation types
pub use foundation::{
    BoxError, BoxedEvent, BridgeError, BridgeResult, DispatchError, DispatchResult, Event,
    EventId, EventKind, EventRef, Marker, MarkerKind, MarkerScope, Received, RegistrationError,
    RegistrationResult,
};

// Re-export framework types
pub use framework::{
    BoxFuture, Decorator, DispatchReport, Dispatcher, DispatcherBuilder, EntryDecl, EntryId,
    IntoReply, ObserveContext, Observer, ObserverFactory, Outcome, Phase, Receiver,
    ReceiverFailure, ReceiverReport, ReceiverTable, ReceiverTarget, Registration, Reply,
    WeakDispatcher, Work, WrapContext,
};

// Re-export coordination types
pub use bridge::{Activity, Bridge, FailListener, FailureEvent, Sequencer};
pub use builtin::ReceiverFailed;
pub use ordered::OrderedDispatch;

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::framework::{
        Decorator, DispatchReport, Dispatcher, Observer, Outcome, Receiver, ReceiverTable,
        Registration, Reply, Work, WrapContext,
    };
    pub use super::impl_event;
    pub use super::{Activity, Bridge, FailureEvent, OrderedDispatch, Sequencer};
}
