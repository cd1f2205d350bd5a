//! Event system for the Courier framework.
//!
//! This module provides the core event infrastructure:
//!
//! - [`Event`] - Base trait for all events
//! - [`EventKind`] - The event type a receiver entry point accepts
//! - [`BoxedEvent`] - Type-erased, identity-carrying container for fired events
//! - [`Received`] - Typed view handed to receiver entry points
//!
//! # Capability Matching
//!
//! Rust has no class hierarchy, so "supertypes" are expressed by composition:
//! an event that embeds a base event can be *viewed* as that base through
//! [`Event::upcast`]. A receiver registered for the base type receives every
//! event that can be viewed as it:
//!
//! ```rust,ignore
//! use courier_core::impl_event;
//!
//! struct Notice { source: String }
//! impl_event!(Notice);
//!
//! struct Poke { notice: Notice, target: u64 }
//! impl_event!(Poke, bases: [notice]);
//!
//! // A receiver for `Notice` is invoked for both `Notice` and `Poke`.
//! ```

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::event_ref::EventRef;

// ============================================================================
// Core Event Trait
// ============================================================================

/// The base trait for all events in the Courier framework.
///
/// Events are type-erased using `dyn Event` and can be downcast to concrete
/// types using `as_any()`. Use [`impl_event!`](crate::impl_event) to implement
/// this trait without boilerplate.
pub trait Event: Any + Send + Sync {
    /// Returns a human-readable name for this event type.
    fn event_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Views this event as the event type identified by `kind`.
    ///
    /// The default implementation only matches the concrete type. Events that
    /// embed a base event override this to expose the base as well.
    fn upcast(&self, kind: TypeId) -> Option<&dyn Any> {
        let any = self.as_any();
        (any.type_id() == kind).then_some(any)
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

/// Implements [`Event`] for a type.
///
/// The second form lists fields holding base events; the type can then be
/// received by entry points declared for any of those bases (transitively).
///
/// ```rust,ignore
/// impl_event!(Notice);
/// impl_event!(Poke, bases: [notice]);
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty) => {
        impl $crate::Event for $ty {
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
    ($ty:ty, bases: [$($field:ident),+ $(,)?]) => {
        impl $crate::Event for $ty {
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn upcast(
                &self,
                kind: ::std::any::TypeId,
            ) -> ::std::option::Option<&dyn ::std::any::Any> {
                if kind == ::std::any::TypeId::of::<Self>() {
                    return ::std::option::Option::Some(self);
                }
                $(
                    if let ::std::option::Option::Some(base) =
                        $crate::Event::upcast(&self.$field, kind)
                    {
                        return ::std::option::Option::Some(base);
                    }
                )+
                ::std::option::Option::None
            }
        }
    };
}

// ============================================================================
// Event Kind
// ============================================================================

/// The event type accepted by a receiver entry point or decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Accepts every event.
    Any,
    /// Accepts events that can be viewed as the given type.
    Type {
        /// Type identifier of the accepted event.
        id: TypeId,
        /// Short type name, for logs and reports.
        name: &'static str,
    },
}

impl EventKind {
    /// The kind accepting events viewable as `E`.
    pub fn of<E: Event>() -> Self {
        Self::Type {
            id: TypeId::of::<E>(),
            name: short_type_name(std::any::type_name::<E>()),
        }
    }

    /// Returns `true` if `event` satisfies this kind.
    pub fn accepts(&self, event: &dyn Event) -> bool {
        match self {
            Self::Any => true,
            Self::Type { id, .. } => event.upcast(*id).is_some(),
        }
    }

    /// Returns the display name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Any => "*",
            Self::Type { name, .. } => name,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Event Identity
// ============================================================================

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity token of a boxed event instance.
///
/// Tokens are never reused, so an identity can not be taken over by a
/// different event after the original is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    fn next() -> Self {
        Self(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased container for a fired event instance.
///
/// `BoxedEvent` wraps any [`Event`] in an `Arc` and stamps it with a fresh
/// [`EventId`]. Clones share both the allocation and the identity, so firing
/// a clone again is recognised as the *same* event. Boxing two structurally
/// equal values yields two distinct events.
///
/// `BoxedEvent` implements `Deref<Target = dyn Event>`.
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
    id: EventId,
}

impl BoxedEvent {
    /// Boxes `event` under a new identity.
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
            id: EventId::next(),
        }
    }

    pub(crate) fn from_parts(inner: Arc<dyn Event>, id: EventId) -> Self {
        Self { inner, id }
    }

    /// Returns the identity of this instance.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Attempts to downcast to the concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }

    /// Views the event as `E`, following base events.
    pub fn view<E: Event>(&self) -> Option<&E> {
        self.inner
            .upcast(TypeId::of::<E>())
            .and_then(|any| any.downcast_ref())
    }

    /// Creates a weak, identity-based reference to this instance.
    pub fn downgrade(&self) -> EventRef {
        EventRef::new(self)
    }

    /// Returns `true` if both handles refer to the same fired instance.
    pub fn same_instance(&self, other: &BoxedEvent) -> bool {
        self.id == other.id
    }
}

impl<E: Event> From<E> for BoxedEvent {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

impl Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("event_name", &self.event_name())
            .field("id", &self.id)
            .finish()
    }
}

// ============================================================================
// Received
// ============================================================================

/// Typed view of the event handed to a receiver entry point.
///
/// Dereferences to `E`, which may be the fired event itself or a base event
/// embedded in it.
pub struct Received<E> {
    event: BoxedEvent,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Event> Received<E> {
    /// Returns `None` if `event` can not be viewed as `E`.
    pub fn new(event: BoxedEvent) -> Option<Self> {
        event.view::<E>()?;
        Some(Self {
            event,
            _marker: PhantomData,
        })
    }

    /// Returns the fired event as a whole.
    pub fn boxed(&self) -> &BoxedEvent {
        &self.event
    }

    /// Consumes the view, returning the fired event.
    pub fn into_boxed(self) -> BoxedEvent {
        self.event
    }
}

impl<E: Event> Deref for Received<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.event
            .view::<E>()
            .expect("Received is only constructed for events viewable as E")
    }
}

impl<E> Clone for Received<E> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for Received<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Received").field(&self.event).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Notice {
        source: &'static str,
    }
    crate::impl_event!(Notice);

    #[derive(Debug, Clone)]
    struct Poke {
        notice: Notice,
        target: u64,
    }
    crate::impl_event!(Poke, bases: [notice]);

    #[derive(Debug, Clone)]
    struct DoublePoke {
        poke: Poke,
    }
    crate::impl_event!(DoublePoke, bases: [poke]);

    #[test]
    fn test_kind_accepts_self_and_bases() {
        let poke = Poke {
            notice: Notice { source: "group" },
            target: 7,
        };
        assert!(EventKind::of::<Poke>().accepts(&poke));
        assert!(EventKind::of::<Notice>().accepts(&poke));
        assert!(EventKind::Any.accepts(&poke));

        let notice = Notice { source: "group" };
        assert!(!EventKind::of::<Poke>().accepts(&notice));
    }

    #[test]
    fn test_upcast_is_transitive() {
        let event = BoxedEvent::new(DoublePoke {
            poke: Poke {
                notice: Notice { source: "dm" },
                target: 1,
            },
        });
        assert_eq!(event.view::<Notice>().map(|n| n.source), Some("dm"));
        assert_eq!(event.view::<Poke>().map(|p| p.target), Some(1));
        assert!(event.downcast_ref::<Poke>().is_none());
    }

    #[test]
    fn test_boxing_assigns_distinct_identity() {
        let a = BoxedEvent::new(Notice { source: "x" });
        let b = BoxedEvent::new(Notice { source: "x" });
        assert!(!a.same_instance(&b));
        assert!(a.same_instance(&a.clone()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_received_derefs_to_base() {
        let event = BoxedEvent::new(Poke {
            notice: Notice { source: "group" },
            target: 3,
        });
        let received = Received::<Notice>::new(event.clone()).unwrap();
        assert_eq!(received.source, "group");
        assert!(received.boxed().same_instance(&event));
        assert!(Received::<DoublePoke>::new(event).is_none());
    }

    #[test]
    fn test_event_name_is_short() {
        assert_eq!(Notice { source: "" }.event_name(), "Notice");
        assert_eq!(EventKind::of::<Poke>().name(), "Poke");
    }
}
