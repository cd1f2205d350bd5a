//! Foundation layer: events, identity, markers and errors.

pub mod error;
pub mod event;
pub mod event_ref;
pub mod marker;

pub use error::{
    BoxError, BridgeError, BridgeResult, DispatchError, DispatchResult, RegistrationError,
    RegistrationResult,
};
pub use event::{BoxedEvent, Event, EventId, EventKind, Received};
pub use event_ref::EventRef;
pub use marker::{Marker, MarkerKind, MarkerScope};
