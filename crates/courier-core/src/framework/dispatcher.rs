//! Event dispatcher for the Courier framework.
//!
//! The [`Dispatcher`] owns the receiver registry, the binding resolver and a
//! worker pool. Firing an event:
//!
//! 1. Takes a snapshot of the registry
//! 2. Keeps the live entries whose event kind accepts the event
//! 3. Builds one decorator chain per matched entry, ending in the receiver
//!    call (behind the ordered gate for ordered entries)
//! 4. Spawns every chain as an independent task on the worker pool
//! 5. Publishes a [`DispatchReport`] once all chains have finished
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::builder()
//!     .workers(4)
//!     .with_builtins()
//!     .build()?;
//!
//! let registration = dispatcher.register::<Audit>()?;
//! dispatcher.fire(Login { user: "alice".into() });
//!
//! registration.cancel();
//! dispatcher.shutdown().await;
//! ```

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Level, debug, error, span, trace, warn};

use crate::foundation::{
    BoxedEvent, DispatchError, DispatchResult, EventId, Marker, MarkerKind, RegistrationError,
    RegistrationResult,
};
use crate::framework::decorator::{
    Binding, Decorator, ObserveContext, Observer, ObserverFactory, Phase, WrapContext,
};
use crate::framework::receiver::{Receiver, ReceiverTable, ReceiverTarget};
use crate::framework::registry::{Entry, EntryId, Invoke, Registration, Registry, Unregister};
use crate::framework::report::{DispatchReport, ReceiverFailure, ReceiverReport};
use crate::framework::resolver::{Declaration, ReceiverKey, Resolution, Resolver};
use crate::framework::work::{Outcome, Work};
use crate::ordered::{Admission, OrderedDispatch};

/// Default capacity of the completion broadcast channel.
pub const DEFAULT_COMPLETION_CAPACITY: usize = 256;

/// Default worker thread name.
pub const DEFAULT_THREAD_NAME: &str = "courier-worker";

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`Dispatcher`] with its decorator and observer providers.
pub struct DispatcherBuilder {
    workers: Option<usize>,
    thread_name: String,
    completion_capacity: usize,
    bindings: HashMap<MarkerKind, Binding>,
    duplicate: Option<MarkerKind>,
    globals: Vec<Marker>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            completion_capacity: DEFAULT_COMPLETION_CAPACITY,
            bindings: HashMap::new(),
            duplicate: None,
            globals: Vec::new(),
        }
    }
}

impl DispatcherBuilder {
    /// Runs chains on a dedicated runtime with `n` worker threads.
    ///
    /// Without this, chains run on the runtime `build` is called in.
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n.max(1));
        self
    }

    /// Sets the worker thread name of the dedicated runtime.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the completion channel capacity.
    pub fn completion_capacity(mut self, capacity: usize) -> Self {
        self.completion_capacity = capacity.max(1);
        self
    }

    /// Binds a decorator to its marker kind.
    pub fn decorator<D: Decorator>(mut self, decorator: D) -> Self {
        let kind = decorator.marker_kind();
        self.bind(kind, Binding::Decorator(Arc::new(decorator)));
        self
    }

    /// Binds an observer factory to a marker kind.
    pub fn observer<F, O>(mut self, kind: impl Into<MarkerKind>, factory: F) -> Self
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: Observer,
    {
        let factory: ObserverFactory = Arc::new(move || Box::new(factory()) as Box<dyn Observer>);
        self.bind(kind.into(), Binding::Observer(factory));
        self
    }

    /// Adds a marker applied to every dispatch.
    pub fn global_marker(mut self, marker: Marker) -> Self {
        self.globals.push(marker);
        self
    }

    /// Installs the built-in `logged`, `timed` and `on_failure` bindings.
    pub fn with_builtins(self) -> Self {
        crate::builtin::install(self)
    }

    fn bind(&mut self, kind: MarkerKind, binding: Binding) {
        let reserved = kind == MarkerKind::ORDERED;
        if (reserved || self.bindings.insert(kind.clone(), binding).is_some())
            && self.duplicate.is_none()
        {
            self.duplicate = Some(kind);
        }
    }

    /// Builds the dispatcher.
    ///
    /// # Errors
    ///
    /// Fails when a marker kind was bound twice (or `ordered` was bound), when
    /// a global marker is unbound, when the worker runtime can not start, or
    /// when no worker count is set and no tokio runtime is running.
    pub fn build(self) -> DispatchResult<Dispatcher> {
        if let Some(kind) = self.duplicate {
            return Err(RegistrationError::DuplicateBinding { kind }.into());
        }

        let resolver = Resolver::new(self.bindings);
        for marker in self.globals {
            resolver.add_global(marker)?;
        }

        let pool = match self.workers {
            Some(n) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(n)
                    .thread_name(self.thread_name.clone())
                    .enable_all()
                    .build()?;
                Pool {
                    handle: runtime.handle().clone(),
                    runtime: Mutex::new(Some(runtime)),
                }
            }
            None => Pool {
                handle: Handle::try_current().map_err(|_| DispatchError::NoRuntime)?,
                runtime: Mutex::new(None),
            },
        };

        let (completions, _) = broadcast::channel(self.completion_capacity);
        debug!(
            workers = ?self.workers,
            thread_name = %self.thread_name,
            "Dispatcher built"
        );

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                resolver,
                registry: Arc::new(Registry::new()),
                pool,
                tracker: TaskTracker::new(),
                completions,
                in_flight: Arc::new(InFlight::default()),
                shut_down: AtomicBool::new(false),
                ordered: Mutex::new(None),
            }),
        })
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct Pool {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl Pool {
    fn stop(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Inner {
    resolver: Resolver,
    registry: Arc<Registry>,
    pool: Pool,
    tracker: TaskTracker,
    completions: broadcast::Sender<DispatchReport>,
    in_flight: Arc<InFlight>,
    shut_down: AtomicBool,
    ordered: Mutex<Option<Arc<OrderedDispatch>>>,
}

impl Unregister for Inner {
    fn unregister(&self, ids: &[EntryId], key: ReceiverKey) {
        self.registry.remove(ids);
        if let ReceiverKey::Static(_) = key {
            self.resolver.forget(key);
        }
    }
}

/// The central event dispatcher.
///
/// `Dispatcher` is a cheap handle; clones share the same registry and pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// A non-owning handle to a [`Dispatcher`].
#[derive(Clone)]
pub struct WeakDispatcher {
    inner: Weak<Inner>,
}

impl WeakDispatcher {
    /// Returns the dispatcher if it is still alive.
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.inner.upgrade().map(|inner| Dispatcher { inner })
    }
}

impl std::fmt::Debug for WeakDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakDispatcher")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Dispatcher {
    /// Returns a builder.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Builds a dispatcher on the current runtime with no bindings.
    pub fn new() -> DispatchResult<Self> {
        Self::builder().build()
    }

    /// Returns a non-owning handle.
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if both handles refer to the same dispatcher.
    pub fn ptr_eq(&self, other: &Dispatcher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn ordered_slot(&self) -> &Mutex<Option<Arc<OrderedDispatch>>> {
        &self.inner.ordered
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Registers a default-constructed receiver.
    pub fn register<R: Receiver + Default>(&self) -> RegistrationResult<Registration> {
        self.register_instance(Arc::new(R::default()))
    }

    /// Registers a receiver built by `factory`.
    pub fn register_with<R, F>(&self, factory: F) -> RegistrationResult<Registration>
    where
        R: Receiver,
        F: FnOnce() -> R,
    {
        self.register_instance(Arc::new(factory()))
    }

    /// Registers an existing receiver instance.
    pub fn register_instance<R: Receiver>(&self, receiver: Arc<R>) -> RegistrationResult<Registration> {
        let mut table = ReceiverTable::<R>::for_type();
        R::declare(&mut table);
        let instance: Arc<dyn Any + Send + Sync> = receiver.clone();
        self.install(ReceiverKey::Type(TypeId::of::<R>()), table, receiver, Some(instance))
    }

    /// Registers entry points that belong to no instance.
    ///
    /// `name` is path-like (`module::Receiver`); its module part is matched
    /// against module markers.
    pub fn register_static<F>(&self, name: &'static str, declare: F) -> RegistrationResult<Registration>
    where
        F: FnOnce(&mut ReceiverTable<()>),
    {
        let mut table = ReceiverTable::<()>::named(name);
        declare(&mut table);
        let key = ReceiverKey::Static(self.inner.registry.next_id());
        self.install(key, table, Arc::new(()), None)
    }

    fn install<R: Send + Sync + 'static>(
        &self,
        key: ReceiverKey,
        table: ReceiverTable<R>,
        receiver: Arc<R>,
        instance: Option<Arc<dyn Any + Send + Sync>>,
    ) -> RegistrationResult<Registration> {
        if self.is_shut_down() {
            return Err(RegistrationError::ShutDown);
        }
        if table.entries.is_empty() {
            return Err(RegistrationError::NoEntryPoints {
                receiver: table.receiver.to_string(),
            });
        }
        let mut names = HashSet::new();
        for entry in &table.entries {
            if !names.insert(entry.name) {
                return Err(RegistrationError::DuplicateEntry {
                    receiver: table.receiver.to_string(),
                    entry: entry.name.to_string(),
                });
            }
        }
        for marker in &table.markers {
            self.inner.resolver.validate(marker)?;
        }

        let mut entries = Vec::with_capacity(table.entries.len());
        for decl in table.entries {
            let declaration = Declaration {
                module: table.module,
                receiver_markers: table.markers.clone(),
                receiver_order: table.order.clone(),
                entry_markers: decl.markers,
                entry_order: decl.order,
            };
            self.inner.resolver.resolve(key, decl.name, &declaration)?;

            let call = decl.call;
            let receiver = receiver.clone();
            let invoke: Invoke = Arc::new(move |event| call(receiver.clone(), event));
            entries.push(Arc::new(Entry {
                id: self.inner.registry.next_id(),
                key,
                target: Arc::new(ReceiverTarget::new(
                    table.receiver,
                    table.module,
                    decl.name,
                    decl.kind,
                    instance.clone(),
                )),
                decl: declaration,
                invoke,
                cancel: CancellationToken::new(),
            }));
        }

        self.inner.registry.insert(entries.clone());
        let owner: Weak<dyn Unregister> = Arc::downgrade(&self.inner) as Weak<Inner>;
        let registration = Registration::new(owner, key, table.receiver, &entries);
        if self.is_shut_down() {
            registration.cancel();
            return Err(RegistrationError::ShutDown);
        }

        debug!(
            receiver = table.receiver,
            module = table.module,
            entries = entries.len(),
            "Receiver registered"
        );
        Ok(registration)
    }

    /// Applies `marker` to every dispatch.
    pub fn add_global_marker(&self, marker: Marker) -> RegistrationResult<()> {
        debug!(marker = %marker, "Adding global marker");
        self.inner.resolver.add_global(marker)
    }

    /// Applies `markers` to receivers declared under `module_prefix`.
    pub fn add_module_markers(
        &self,
        module_prefix: impl Into<String>,
        markers: impl IntoIterator<Item = Marker>,
    ) -> RegistrationResult<()> {
        let prefix = module_prefix.into();
        debug!(module = %prefix, "Adding module markers");
        self.inner
            .resolver
            .add_module(prefix, markers.into_iter().collect())
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Fires an event without waiting for its receivers.
    pub fn fire(&self, event: impl Into<BoxedEvent>) {
        self.dispatch(event.into(), None);
    }

    /// Fires an already boxed event, keeping its identity.
    pub fn fire_boxed(&self, event: BoxedEvent) {
        self.dispatch(event, None);
    }

    /// Fires an event and waits for its completion report.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ShutDown`] if the dispatcher no longer accepts events.
    pub async fn fire_and_wait(&self, event: impl Into<BoxedEvent>) -> DispatchResult<DispatchReport> {
        let event = event.into();
        let id = event.id();
        let (tx, rx) = oneshot::channel();
        if !self.dispatch(event, Some(tx)) {
            return Err(DispatchError::ShutDown);
        }
        rx.await
            .map_err(|_| DispatchError::ReportDropped(id.to_string()))
    }

    /// Subscribes to completion reports of every fired event.
    pub fn completions(&self) -> broadcast::Receiver<DispatchReport> {
        self.inner.completions.subscribe()
    }

    pub(crate) fn dispatch(&self, event: BoxedEvent, reply: Option<oneshot::Sender<DispatchReport>>) -> bool {
        let event_name = event.event_name();
        if self.is_shut_down() {
            warn!(event_name, event_id = %event.id(), "Dispatcher is shut down, dropping event");
            return false;
        }

        let span = span!(Level::DEBUG, "dispatch", event_name = %event_name, event_id = %event.id());
        let _enter = span.enter();

        let snapshot = self.inner.registry.snapshot();
        let matched: Vec<Arc<Entry>> = snapshot
            .iter()
            .filter(|e| e.is_live() && e.target.event_kind().accepts(&*event))
            .cloned()
            .collect();
        debug!(matched = matched.len(), "Dispatching event");

        let tally = Arc::new(Tally::new(
            DispatchReport::new(event.downgrade(), event_name, matched.len()),
            self.inner.completions.clone(),
            reply,
            InFlightGuard::enter(&self.inner.in_flight, event.id()),
        ));
        if matched.is_empty() {
            tally.finish();
            return true;
        }

        let ordered = self.inner.ordered.lock().clone();
        for entry in matched {
            let pending = Pending::new(tally.clone(), entry.target.clone());
            let resolution = match self.inner.resolver.resolve(entry.key, entry.target.entry(), &entry.decl) {
                Ok(resolution) => resolution,
                Err(err) => {
                    error!(receiver = %entry.target, error = %err, "Failed to resolve bindings");
                    pending.record(&Outcome::Failed(err.to_string()));
                    continue;
                }
            };
            let admission = match (&ordered, resolution.ordered) {
                (Some(ordered), true) => ordered.admit(&entry, &event),
                _ => Admission::Unbatched,
            };

            let chain = run_chain(
                entry.clone(),
                resolution,
                event.clone(),
                admission,
                self.downgrade(),
                pending,
            );
            let chain_span = span!(Level::DEBUG, "chain", receiver = %entry.target);
            self.inner
                .tracker
                .spawn_on(chain.instrument(chain_span), &self.inner.pool.handle);
        }
        true
    }

    // ------------------------------------------------------------------------
    // Introspection & lifecycle
    // ------------------------------------------------------------------------

    /// Lists every live entry point with its resolved bindings.
    pub fn describe(&self) -> Vec<ReceiverReport> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .filter(|e| e.is_live())
            .filter_map(|e| {
                let res = self
                    .inner
                    .resolver
                    .resolve(e.key, e.target.entry(), &e.decl)
                    .ok()?;
                Some(ReceiverReport {
                    receiver: e.target.receiver().to_string(),
                    module: e.target.module().to_string(),
                    entry: e.target.entry().to_string(),
                    event: e.target.event_kind().name().to_string(),
                    ordered: res.ordered,
                    decorators: res.decorator_tags(),
                    observers: res.observer_tags(),
                })
            })
            .collect()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stops accepting registrations and events, then waits for in-flight
    /// chains to finish.
    ///
    /// Every registration is cancelled, ordered gates release their waiters
    /// and observers are shut down. Calling it again only waits.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            self.inner.tracker.wait().await;
            return;
        }
        debug!("Shutting down dispatcher");

        if let Some(ordered) = self.inner.ordered.lock().take() {
            ordered.close();
        }
        self.inner.registry.clear();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.resolver.shutdown_observers();
        self.inner.pool.stop();

        debug!("Dispatcher shut down");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("entries", &self.inner.registry.snapshot().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

// ============================================================================
// Chain execution
// ============================================================================

async fn run_chain(
    entry: Arc<Entry>,
    resolution: Arc<Resolution>,
    event: BoxedEvent,
    admission: Admission,
    dispatcher: WeakDispatcher,
    pending: Pending,
) {
    let target = entry.target.clone();
    for (marker, observer) in &resolution.observers {
        observer.observe_event(&ObserveContext {
            marker,
            event: &event,
            target: &target,
            phase: Phase::Before,
        });
    }

    let chain = {
        let entry = entry.clone();
        let resolution = resolution.clone();
        let event = event.clone();
        async move {
            build_chain(&entry, &resolution, &event, admission, &dispatcher)
                .run()
                .await
        }
    };
    let outcome = match AssertUnwindSafe(chain).catch_unwind().await {
        Ok(result) => Outcome::from_result(result),
        Err(panic) => Outcome::Failed(format!("panicked: {}", panic_message(panic.as_ref()))),
    };

    match &outcome {
        Outcome::Failed(err) => error!(event_name = event.event_name(), error = %err, "Receiver failed"),
        Outcome::Skipped => trace!("Chain skipped"),
        Outcome::Delivered(_) => trace!("Chain delivered"),
    }

    for (marker, observer) in resolution.observers.iter().rev() {
        observer.observe_event(&ObserveContext {
            marker,
            event: &event,
            target: &target,
            phase: Phase::After(&outcome),
        });
    }
    pending.record(&outcome);
}

/// Wraps the receiver call in the resolved decorators, innermost first.
///
/// Wrapping only builds futures: when a decorator returns `None` no inner
/// work has started, and the whole chain is skipped.
fn build_chain(
    entry: &Entry,
    resolution: &Resolution,
    event: &BoxedEvent,
    admission: Admission,
    dispatcher: &WeakDispatcher,
) -> Work {
    let invoke = entry.invoke.clone();
    let call_event = event.clone();
    let call = Work::new(async move { invoke(call_event).await });
    let mut work = admission.guard(call, entry.cancel.clone());

    for (marker, decorator) in resolution.decorators.iter().rev() {
        if !decorator.event_kind().accepts(&**event) {
            continue;
        }
        let ctx = WrapContext::new(
            marker.clone(),
            event.clone(),
            entry.target.clone(),
            work,
            dispatcher.clone(),
        );
        match decorator.wrap(ctx) {
            Some(wrapped) => work = wrapped,
            None => {
                debug!(marker = %marker, "Decorator short-circuited the chain");
                return Work::skip();
            }
        }
    }
    work
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================================
// Completion tracking
// ============================================================================

/// Dispatches per event instance that have not reported yet.
#[derive(Default)]
struct InFlight(Mutex<HashMap<EventId, usize>>);

/// Marks one dispatch of an instance as in flight until dropped.
struct InFlightGuard {
    in_flight: Arc<InFlight>,
    event: EventId,
    original: bool,
}

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>, event: EventId) -> Self {
        let original = {
            let mut counts = in_flight.0.lock();
            let count = counts.entry(event).or_insert(0);
            *count += 1;
            *count == 1
        };
        Self {
            in_flight: in_flight.clone(),
            event,
            original,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut counts = self.in_flight.0.lock();
        if let Some(count) = counts.get_mut(&self.event) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.event);
            }
        }
    }
}

struct TallyState {
    report: Option<DispatchReport>,
    remaining: usize,
    reply: Option<oneshot::Sender<DispatchReport>>,
    in_flight: Option<InFlightGuard>,
}

/// Counts finished chains of one fire and publishes the report.
///
/// A re-fire of an instance whose earlier dispatch has not reported yet
/// only answers its own caller; the completion channel carries one report
/// per original fire.
struct Tally {
    state: Mutex<TallyState>,
    completions: broadcast::Sender<DispatchReport>,
}

impl Tally {
    fn new(
        report: DispatchReport,
        completions: broadcast::Sender<DispatchReport>,
        reply: Option<oneshot::Sender<DispatchReport>>,
        in_flight: InFlightGuard,
    ) -> Self {
        Self {
            state: Mutex::new(TallyState {
                remaining: report.matched,
                report: Some(report),
                reply,
                in_flight: Some(in_flight),
            }),
            completions,
        }
    }

    fn record(&self, target: &ReceiverTarget, outcome: &Outcome) {
        let mut state = self.state.lock();
        if let Some(report) = state.report.as_mut() {
            match outcome {
                Outcome::Delivered(_) => report.delivered += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed(err) => report.failures.push(ReceiverFailure {
                    receiver: target.to_string(),
                    error: err.clone(),
                }),
            }
        }
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            drop(state);
            self.finish();
        }
    }

    fn finish(&self) {
        let (report, reply, in_flight) = {
            let mut state = self.state.lock();
            (state.report.take(), state.reply.take(), state.in_flight.take())
        };
        let Some(report) = report else { return };
        let original = in_flight.as_ref().is_some_and(|guard| guard.original);
        drop(in_flight);
        trace!(
            event_name = report.event_name,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Dispatch complete"
        );
        if let Some(reply) = reply {
            let _ = reply.send(report.clone());
        }
        if original {
            let _ = self.completions.send(report);
        } else {
            trace!("Re-fire reported to its caller only");
        }
    }
}

/// One outstanding chain. Records a failure if dropped unrecorded.
struct Pending {
    tally: Arc<Tally>,
    target: Arc<ReceiverTarget>,
    recorded: bool,
}

impl Pending {
    fn new(tally: Arc<Tally>, target: Arc<ReceiverTarget>) -> Self {
        Self {
            tally,
            target,
            recorded: false,
        }
    }

    fn record(mut self, outcome: &Outcome) {
        self.recorded = true;
        self.tally.record(&self.target, outcome);
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if !self.recorded {
            self.tally.record(
                &self.target,
                &Outcome::Failed("chain aborted before completion".to_string()),
            );
        }
    }
}
