//! Weak, identity-based handles to fired events.

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use super::event::{BoxedEvent, Event, EventId};

/// A non-owning handle to one specific fired event instance.
///
/// Subsystems that must recognise "this exact event" (ordered dispatch,
/// echo suppression in a distribution bridge) hold an `EventRef` instead of
/// the event itself, so the event is reclaimed once every receiver is done.
///
/// Equality follows identity: two references are equal only while their
/// shared referent is alive. A reclaimed reference is not equal to anything,
/// including another reference to the same, now reclaimed, event. For that
/// reason `EventRef` is `PartialEq` but not `Eq`; key maps by [`EventId`].
#[derive(Clone)]
pub struct EventRef {
    id: EventId,
    target: Weak<dyn Event>,
}

impl EventRef {
    /// Creates a reference to `event`.
    pub fn new(event: &BoxedEvent) -> Self {
        Self {
            id: event.id(),
            target: Arc::downgrade(event.inner()),
        }
    }

    /// Returns the identity token of the referent.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Returns `true` while the referent has not been reclaimed.
    pub fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Recovers the event, if it is still alive.
    pub fn upgrade(&self) -> Option<BoxedEvent> {
        self.target
            .upgrade()
            .map(|inner| BoxedEvent::from_parts(inner, self.id))
    }

    /// Returns `true` if `event` is the live referent of this reference.
    pub fn refers_to(&self, event: &BoxedEvent) -> bool {
        self.id == event.id() && self.is_live()
    }
}

impl PartialEq for EventRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.is_live()
    }
}

impl PartialEq<BoxedEvent> for EventRef {
    fn eq(&self, other: &BoxedEvent) -> bool {
        self.refers_to(other)
    }
}

impl Hash for EventRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl From<&BoxedEvent> for EventRef {
    fn from(event: &BoxedEvent) -> Self {
        Self::new(event)
    }
}

impl std::fmt::Debug for EventRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRef")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
