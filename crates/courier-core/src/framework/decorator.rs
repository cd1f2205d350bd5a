//! Decorator and observer contracts.
//!
//! Both are bound to a [`MarkerKind`] on the [`DispatcherBuilder`]. A
//! decorator wraps the receiver call and may replace or veto it; an observer
//! only watches the chain before and after it runs.
//!
//! [`DispatcherBuilder`]: crate::DispatcherBuilder

use std::sync::Arc;

use crate::foundation::{BoxedEvent, EventKind, Marker, MarkerKind};
use crate::framework::dispatcher::{Dispatcher, WeakDispatcher};
use crate::framework::receiver::ReceiverTarget;
use crate::framework::work::{Outcome, Work};

// ============================================================================
// Decorator
// ============================================================================

/// A wrapper around a receiver invocation.
///
/// ```rust,ignore
/// struct Deny;
///
/// impl Decorator for Deny {
///     fn marker_kind(&self) -> MarkerKind {
///         MarkerKind::from_static("deny")
///     }
///
///     fn wrap(&self, _ctx: WrapContext) -> Option<Work> {
///         None
///     }
/// }
/// ```
pub trait Decorator: Send + Sync + 'static {
    /// The marker kind this decorator is bound to.
    fn marker_kind(&self) -> MarkerKind;

    /// Events this decorator applies to. Other events pass through unwrapped.
    fn event_kind(&self) -> EventKind {
        EventKind::Any
    }

    /// Wraps the work, or returns `None` to short-circuit the chain.
    fn wrap(&self, ctx: WrapContext) -> Option<Work>;
}

/// Everything a decorator sees at the dispatch site.
pub struct WrapContext {
    marker: Marker,
    event: BoxedEvent,
    target: Arc<ReceiverTarget>,
    work: Work,
    dispatcher: WeakDispatcher,
}

impl WrapContext {
    pub(crate) fn new(
        marker: Marker,
        event: BoxedEvent,
        target: Arc<ReceiverTarget>,
        work: Work,
        dispatcher: WeakDispatcher,
    ) -> Self {
        Self {
            marker,
            event,
            target,
            work,
            dispatcher,
        }
    }

    /// The marker instance that bound this decorator, with its parameters.
    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    /// The fired event.
    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    /// The receiver entry point the chain ends in.
    pub fn target(&self) -> &Arc<ReceiverTarget> {
        &self.target
    }

    /// The dispatcher running this chain, if it is still alive.
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.dispatcher.upgrade()
    }

    /// Takes the not-yet-wrapped work.
    pub fn into_work(self) -> Work {
        self.work
    }

    /// Splits the context into its parts.
    pub fn into_parts(self) -> (Marker, BoxedEvent, Arc<ReceiverTarget>, Work) {
        (self.marker, self.event, self.target, self.work)
    }
}

impl std::fmt::Debug for WrapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapContext")
            .field("marker", &self.marker)
            .field("event", &self.event)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Where in the chain an observer is called.
#[derive(Debug, Clone, Copy)]
pub enum Phase<'a> {
    /// Before the decorated chain starts.
    Before,
    /// After the chain finished, with its outcome.
    After(&'a Outcome),
}

/// What an observer sees.
#[derive(Debug)]
pub struct ObserveContext<'a> {
    /// The marker that bound the observer.
    pub marker: &'a Marker,
    /// The fired event.
    pub event: &'a BoxedEvent,
    /// The receiver entry point.
    pub target: &'a ReceiverTarget,
    /// Before or after the chain.
    pub phase: Phase<'a>,
}

/// A side-effect-only hook around a receiver invocation.
///
/// One observer instance is created per resolved marker, initialized with
/// that marker, and shared by every chain of the entry point.
pub trait Observer: Send + Sync + 'static {
    /// Receives the marker the instance was created for.
    fn initialize(&mut self, _marker: &Marker) {}

    /// Called before and after every chain.
    fn observe_event(&self, ctx: &ObserveContext<'_>);

    /// Called once when the dispatcher shuts down.
    fn shutdown(&self) {}
}

/// Creates fresh observer instances.
pub type ObserverFactory = Arc<dyn Fn() -> Box<dyn Observer> + Send + Sync>;

/// What a marker kind is bound to.
#[derive(Clone)]
pub(crate) enum Binding {
    Decorator(Arc<dyn Decorator>),
    Observer(ObserverFactory),
}
