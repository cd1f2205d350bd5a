//! Receiver declarations.
//!
//! A [`Receiver`] declares its entry points once, into a [`ReceiverTable`],
//! when it is registered. The table is plain data: entry names, accepted
//! event kinds, markers and order constraints, plus the type-erased entry
//! functions. Nothing is discovered at dispatch time.
//!
//! ```rust,ignore
//! struct Audit;
//!
//! impl Receiver for Audit {
//!     fn declare(table: &mut ReceiverTable<Self>) {
//!         table.marker(Marker::new("logged"));
//!         table
//!             .on("on_login", Audit::on_login)
//!             .marker(Marker::new("timed").with("warn_after_ms", 50))
//!             .ordered();
//!     }
//! }
//!
//! impl Audit {
//!     async fn on_login(self: Arc<Self>, login: Received<Login>) {
//!         tracing::info!(user = %login.user, "login");
//!     }
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::foundation::{BoxError, BoxedEvent, Event, EventKind, Marker, MarkerKind, Received};
use crate::framework::work::{BoxFuture, IntoReply, Reply};

/// A type that receives events through declared entry points.
pub trait Receiver: Send + Sync + 'static {
    /// Declares the entry points, receiver-level markers and order constraint.
    fn declare(table: &mut ReceiverTable<Self>)
    where
        Self: Sized;
}

/// Type-erased entry point bound to its receiver type.
pub(crate) type EntryFn<R> =
    Arc<dyn Fn(Arc<R>, BoxedEvent) -> BoxFuture<'static, Result<Reply, BoxError>> + Send + Sync>;

// ============================================================================
// ReceiverTable
// ============================================================================

/// Static declaration table filled in by [`Receiver::declare`].
pub struct ReceiverTable<R> {
    pub(crate) receiver: &'static str,
    pub(crate) module: &'static str,
    pub(crate) markers: Vec<Marker>,
    pub(crate) order: Option<Vec<MarkerKind>>,
    pub(crate) entries: Vec<EntryDecl<R>>,
}

impl<R: Send + Sync + 'static> ReceiverTable<R> {
    /// Creates a table named after `R`'s type path.
    pub(crate) fn for_type() -> Self {
        Self::named(std::any::type_name::<R>())
    }

    /// Creates a table for a path-like name (`module::Receiver`).
    pub(crate) fn named(path: &'static str) -> Self {
        let (module, receiver) = split_type_path(path);
        Self {
            receiver,
            module,
            markers: Vec::new(),
            order: None,
            entries: Vec::new(),
        }
    }

    /// Adds a receiver-level marker, applying to every entry point.
    pub fn marker(&mut self, marker: Marker) -> &mut Self {
        self.markers.push(marker);
        self
    }

    /// Sets the receiver-level order constraint over marker kinds.
    pub fn order<I, K>(&mut self, kinds: I) -> &mut Self
    where
        I: IntoIterator<Item = K>,
        K: Into<MarkerKind>,
    {
        self.order = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    /// Declares an entry point receiving events viewable as `E`.
    pub fn on<E, F, Fut>(&mut self, name: &'static str, f: F) -> &mut EntryDecl<R>
    where
        E: Event,
        F: Fn(Arc<R>, Received<E>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoReply,
    {
        let call: EntryFn<R> = Arc::new(
            move |receiver: Arc<R>, event: BoxedEvent| -> BoxFuture<'static, Result<Reply, BoxError>> {
                match Received::<E>::new(event) {
                    Some(received) => {
                        let fut = f(receiver, received);
                        Box::pin(async move { fut.await.into_reply() })
                    }
                    None => Box::pin(async { Err(BoxError::from("event does not match entry point")) }),
                }
            },
        );
        self.push(name, EventKind::of::<E>(), call)
    }

    /// Declares an entry point receiving every event.
    pub fn on_any<F, Fut>(&mut self, name: &'static str, f: F) -> &mut EntryDecl<R>
    where
        F: Fn(Arc<R>, BoxedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoReply,
    {
        let call: EntryFn<R> = Arc::new(
            move |receiver: Arc<R>, event: BoxedEvent| -> BoxFuture<'static, Result<Reply, BoxError>> {
                let fut = f(receiver, event);
                Box::pin(async move { fut.await.into_reply() })
            },
        );
        self.push(name, EventKind::Any, call)
    }

    fn push(&mut self, name: &'static str, kind: EventKind, call: EntryFn<R>) -> &mut EntryDecl<R> {
        self.entries.push(EntryDecl {
            name,
            kind,
            markers: Vec::new(),
            order: None,
            call,
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }
}

/// One declared entry point.
pub struct EntryDecl<R> {
    pub(crate) name: &'static str,
    pub(crate) kind: EventKind,
    pub(crate) markers: Vec<Marker>,
    pub(crate) order: Option<Vec<MarkerKind>>,
    pub(crate) call: EntryFn<R>,
}

impl<R> EntryDecl<R> {
    /// Adds an entry-level marker.
    pub fn marker(&mut self, marker: Marker) -> &mut Self {
        self.markers.push(marker);
        self
    }

    /// Marks the entry point as ordered.
    pub fn ordered(&mut self) -> &mut Self {
        self.marker(Marker::ordered())
    }

    /// Sets an entry-level order constraint, overriding the receiver-level one.
    pub fn order<I, K>(&mut self, kinds: I) -> &mut Self
    where
        I: IntoIterator<Item = K>,
        K: Into<MarkerKind>,
    {
        self.order = Some(kinds.into_iter().map(Into::into).collect());
        self
    }
}

// ============================================================================
// ReceiverTarget
// ============================================================================

/// Identifies the receiver instance and entry point a chain ends in.
#[derive(Clone)]
pub struct ReceiverTarget {
    receiver: &'static str,
    module: &'static str,
    entry: &'static str,
    event: EventKind,
    instance: Option<Arc<dyn Any + Send + Sync>>,
}

impl ReceiverTarget {
    pub(crate) fn new(
        receiver: &'static str,
        module: &'static str,
        entry: &'static str,
        event: EventKind,
        instance: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            receiver,
            module,
            entry,
            event,
            instance,
        }
    }

    /// Short receiver type name (or static receiver name).
    pub fn receiver(&self) -> &'static str {
        self.receiver
    }

    /// Module path the receiver was declared in.
    pub fn module(&self) -> &'static str {
        self.module
    }

    /// Entry point name.
    pub fn entry(&self) -> &'static str {
        self.entry
    }

    /// The event kind the entry point accepts.
    pub fn event_kind(&self) -> EventKind {
        self.event
    }

    /// The receiver instance, `None` for static receivers.
    pub fn instance(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.instance.as_ref()
    }
}

impl std::fmt::Display for ReceiverTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.receiver, self.entry)
    }
}

impl std::fmt::Debug for ReceiverTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverTarget")
            .field("receiver", &self.receiver)
            .field("module", &self.module)
            .field("entry", &self.entry)
            .field("event", &self.event)
            .field("is_static", &self.instance.is_none())
            .finish()
    }
}

/// Splits `a::b::Type<X>` into (`a::b`, `Type<X>`).
pub(crate) fn split_type_path(path: &'static str) -> (&'static str, &'static str) {
    let head_len = path.find('<').unwrap_or(path.len());
    match path[..head_len].rfind("::") {
        Some(idx) => (&path[..idx], &path[idx + 2..]),
        None => ("", path),
    }
}
