//! Framework layer - Registration, binding resolution and dispatch.
//!
//! This module contains the event processing machinery:
//! - Receiver declarations and the registry of live entry points
//! - Decorator and observer contracts, and the resolver that binds them
//! - The dispatcher that builds and runs one chain per matched entry

pub mod decorator;
pub mod dispatcher;
pub mod receiver;
pub mod registry;
pub mod report;
pub(crate) mod resolver;
pub mod work;

pub use decorator::{Decorator, ObserveContext, Observer, ObserverFactory, Phase, WrapContext};
pub use dispatcher::{
    DEFAULT_COMPLETION_CAPACITY, DEFAULT_THREAD_NAME, Dispatcher, DispatcherBuilder,
    WeakDispatcher,
};
pub use receiver::{EntryDecl, Receiver, ReceiverTable, ReceiverTarget};
pub use registry::{EntryId, Registration};
pub use report::{DispatchReport, ReceiverFailure, ReceiverReport};
pub use work::{BoxFuture, IntoReply, Outcome, Reply, Work};
