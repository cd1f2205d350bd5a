//! Ordered dispatch.
//!
//! [`OrderedDispatch`] fires a batch of events through the normal dispatch
//! path and guarantees that every entry point marked `ordered` receives the
//! batch members in batch order, exactly once each.
//!
//! # How It Works
//!
//! ```text
//!   fire([e0, e1, e2])
//!        │  tag each event: EventId -> (batch, seq)
//!        ▼
//!   Dispatcher::dispatch(e0), dispatch(e1), dispatch(e2)
//!        │  per ordered entry: claim (batch, seq) on the entry's lane
//!        ▼
//!   worker tasks ──► gate: wait until lane head == seq ──► receiver call
//!                                                        └─► release seq
//! ```
//!
//! Claims are taken synchronously while the batch is fired. The batch is
//! sealed once every member went through dispatch, and no gate opens before
//! that, so a member fired elsewhere in the meantime can not overtake an
//! earlier one. A second claim for the same `(entry, batch, seq)`, caused by
//! the event being fired again, is coalesced: its chain completes as
//! skipped. Failures and panics release the slot like a normal return.
//! Cancelling the entry's registration, or shutting the dispatcher down,
//! abandons the waiters.
//!
//! Lane state lives as long as the batch is being fired or one of its gates
//! is held. Tags only point weakly at their batch and are purged on the next
//! `fire` once their event is gone. A live event whose batch finished stays
//! coalesced for ordered entries.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::foundation::{BoxError, BoxedEvent, DispatchError, DispatchResult, EventId, EventRef};
use crate::framework::dispatcher::{Dispatcher, WeakDispatcher};
use crate::framework::registry::{Entry, EntryId};
use crate::framework::report::DispatchReport;
use crate::framework::work::{Reply, Work};

/// Per-dispatcher ordered batch dispatch.
pub struct OrderedDispatch {
    core: WeakDispatcher,
    tags: Mutex<HashMap<EventId, Tag>>,
    next_batch: AtomicU64,
    closed: CancellationToken,
}

struct Tag {
    event: EventRef,
    batch: Weak<Batch>,
    seq: u64,
}

impl OrderedDispatch {
    /// Returns the ordered dispatch of `dispatcher`, creating it on first use.
    pub fn create(dispatcher: &Dispatcher) -> Arc<Self> {
        let mut slot = dispatcher.ordered_slot().lock();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        let created = Arc::new(Self {
            core: dispatcher.downgrade(),
            tags: Mutex::new(HashMap::new()),
            next_batch: AtomicU64::new(1),
            closed: CancellationToken::new(),
        });
        *slot = Some(created.clone());
        debug!("Ordered dispatch created");
        created
    }

    /// Fires `batch`; ordered entry points see its events in this order.
    ///
    /// Repeated instances within the batch are fired once. An instance that
    /// still belongs to an earlier live batch keeps its earlier slot.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ShutDown`] if the dispatcher is gone or shut down.
    pub fn fire<I>(&self, batch: I) -> DispatchResult<()>
    where
        I: IntoIterator<Item = BoxedEvent>,
    {
        let dispatcher = self.dispatcher()?;
        let (seal, events) = self.tag(batch);
        for event in events {
            dispatcher.dispatch(event, None);
        }
        drop(seal);
        Ok(())
    }

    /// Fires `batch` and waits for the completion report of every member.
    ///
    /// Reports are returned in batch order.
    pub async fn fire_and_wait<I>(&self, batch: I) -> DispatchResult<Vec<DispatchReport>>
    where
        I: IntoIterator<Item = BoxedEvent>,
    {
        let dispatcher = self.dispatcher()?;
        let mut pending = Vec::new();
        let (seal, events) = self.tag(batch);
        for event in events {
            let id = event.id();
            let (tx, rx) = oneshot::channel();
            if !dispatcher.dispatch(event, Some(tx)) {
                return Err(DispatchError::ShutDown);
            }
            pending.push((id, rx));
        }
        drop(seal);

        let mut reports = Vec::with_capacity(pending.len());
        for (id, rx) in pending {
            reports.push(
                rx.await
                    .map_err(|_| DispatchError::ReportDropped(id.to_string()))?,
            );
        }
        Ok(reports)
    }

    /// Returns `true` once the owning dispatcher shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn dispatcher(&self) -> DispatchResult<Dispatcher> {
        if self.is_closed() {
            return Err(DispatchError::ShutDown);
        }
        self.core
            .upgrade()
            .filter(|d| !d.is_shut_down())
            .ok_or(DispatchError::ShutDown)
    }

    fn tag<I>(&self, batch: I) -> (Seal, Vec<BoxedEvent>)
    where
        I: IntoIterator<Item = BoxedEvent>,
    {
        let id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Batch {
            id,
            lanes: Mutex::new(HashMap::new()),
            sealed: watch::channel(false).0,
        });

        let mut tags = self.tags.lock();
        tags.retain(|_, tag| tag.event.is_live());

        let mut seen = HashSet::new();
        let mut seq = 0;
        let mut events = Vec::new();
        for event in batch {
            if !seen.insert(event.id()) {
                continue;
            }
            tags.entry(event.id()).or_insert_with(|| {
                let tag = Tag {
                    event: event.downgrade(),
                    batch: Arc::downgrade(&shared),
                    seq,
                };
                seq += 1;
                tag
            });
            events.push(event);
        }
        trace!(batch = id, events = events.len(), slots = seq, "Batch tagged");
        (Seal(shared), events)
    }

    /// Claims the event's slot on the entry's lane.
    pub(crate) fn admit(&self, entry: &Entry, event: &BoxedEvent) -> Admission {
        let (batch, seq) = {
            let tags = self.tags.lock();
            match tags.get(&event.id()) {
                Some(tag) => (tag.batch.upgrade(), tag.seq),
                None => return Admission::Unbatched,
            }
        };
        let Some(batch) = batch else {
            trace!(seq, entry = %entry.id, "Coalescing event of a finished batch");
            return Admission::Duplicate;
        };

        let lane = batch.lane(entry.id);
        if lane.claim(seq) {
            Admission::Ticket(Ticket {
                batch,
                lane,
                seq,
                closed: self.closed.clone(),
            })
        } else {
            trace!(batch = batch.id, seq, entry = %entry.id, "Coalescing repeated batch event");
            Admission::Duplicate
        }
    }

    /// Releases every waiter and forgets all batches.
    pub(crate) fn close(&self) {
        self.closed.cancel();
        self.tags.lock().clear();
        debug!("Ordered dispatch closed");
    }
}

impl std::fmt::Debug for OrderedDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedDispatch")
            .field("tagged", &self.tags.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Batches and lanes
// ============================================================================

struct Batch {
    id: u64,
    lanes: Mutex<HashMap<EntryId, Arc<Lane>>>,
    sealed: watch::Sender<bool>,
}

impl Batch {
    fn lane(&self, entry: EntryId) -> Arc<Lane> {
        self.lanes
            .lock()
            .entry(entry)
            .or_insert_with(|| Arc::new(Lane::new()))
            .clone()
    }
}

/// Seals its batch when dropped, after every member was dispatched.
struct Seal(Arc<Batch>);

impl Drop for Seal {
    fn drop(&mut self) {
        self.0.sealed.send_replace(true);
        trace!(batch = self.0.id, "Batch sealed");
    }
}

#[derive(Default)]
struct LaneState {
    claimed: BTreeSet<u64>,
    done: BTreeSet<u64>,
}

/// The sequence cursor of one ordered entry within one batch.
struct Lane {
    state: Mutex<LaneState>,
    head: watch::Sender<Option<u64>>,
}

impl Lane {
    fn new() -> Self {
        Self {
            state: Mutex::new(LaneState::default()),
            head: watch::channel(None).0,
        }
    }

    /// Returns `false` if `seq` was claimed before.
    fn claim(&self, seq: u64) -> bool {
        let mut state = self.state.lock();
        if !state.claimed.insert(seq) {
            return false;
        }
        self.advance(&state);
        true
    }

    fn complete(&self, seq: u64) {
        let mut state = self.state.lock();
        state.done.insert(seq);
        self.advance(&state);
    }

    fn advance(&self, state: &LaneState) {
        let head = state
            .claimed
            .iter()
            .copied()
            .find(|seq| !state.done.contains(seq));
        self.head.send_replace(head);
    }
}

// ============================================================================
// Admission
// ============================================================================

/// How an ordered entry's chain passes the gate.
pub(crate) enum Admission {
    /// The event is not part of a batch.
    Unbatched,
    /// The chain holds the event's slot.
    Ticket(Ticket),
    /// The slot was claimed by an earlier dispatch of the same event.
    Duplicate,
}

impl Admission {
    /// Puts the gate in front of the receiver call.
    pub(crate) fn guard(self, work: Work, cancel: CancellationToken) -> Work {
        match self {
            Self::Unbatched => work,
            Self::Duplicate => Work::skip(),
            Self::Ticket(ticket) => Work::new(ticket.pass(work, cancel)),
        }
    }
}

/// A claimed slot. Dropping it releases the slot.
pub(crate) struct Ticket {
    batch: Arc<Batch>,
    lane: Arc<Lane>,
    seq: u64,
    closed: CancellationToken,
}

impl Ticket {
    async fn pass(self, work: Work, cancel: CancellationToken) -> Result<Reply, BoxError> {
        let seq = self.seq;
        let mut sealed = self.batch.sealed.subscribe();
        let mut head = self.lane.head.subscribe();
        let turn = async {
            sealed.wait_for(|s| *s).await.is_ok() && head.wait_for(|h| *h == Some(seq)).await.is_ok()
        };
        let admitted = tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            _ = cancel.cancelled() => false,
            ready = turn => ready,
        };
        if !admitted {
            trace!(batch = self.batch.id, seq, "Abandoning ordered call");
            return Ok(Reply::skipped());
        }

        let result = work.await;
        drop(self);
        result
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.lane.complete(self.seq);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::Rng;
    use tokio::sync::Notify;

    use std::sync::OnceLock;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::foundation::{Marker, MarkerKind, Received};
    use crate::framework::decorator::{Decorator, ObserveContext, Observer, WrapContext};
    use crate::framework::receiver::{Receiver, ReceiverTable};

    #[derive(Debug)]
    struct Step {
        n: usize,
        delay_ms: u64,
    }
    crate::impl_event!(Step);

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<usize>>,
    }

    impl Receiver for Recorder {
        fn declare(table: &mut ReceiverTable<Self>) {
            table
                .on("on_step", |this: Arc<Self>, step: Received<Step>| async move {
                    tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
                    this.seen.lock().push(step.n);
                })
                .marker(Marker::new("refire"))
                .ordered();
        }
    }

    /// Re-fires each event 0 to 2 extra times on its first sighting.
    #[derive(Default)]
    struct Refire {
        seen: Mutex<HashSet<EventId>>,
    }

    impl Decorator for Refire {
        fn marker_kind(&self) -> MarkerKind {
            MarkerKind::from_static("refire")
        }

        fn wrap(&self, ctx: WrapContext) -> Option<Work> {
            let first = self.seen.lock().insert(ctx.event().id());
            let copies = if first {
                rand::thread_rng().gen_range(0..=2)
            } else {
                0
            };
            let dispatcher = ctx.dispatcher();
            let event = ctx.event().clone();
            let inner = ctx.into_work();
            Some(Work::new(async move {
                if let Some(dispatcher) = dispatcher {
                    for _ in 0..copies {
                        dispatcher.fire_boxed(event.clone());
                    }
                }
                inner.await
            }))
        }
    }

    const N: usize = 8;

    fn batch(order: &[usize]) -> Vec<BoxedEvent> {
        order
            .iter()
            .enumerate()
            .map(|(pos, &n)| {
                BoxedEvent::new(Step {
                    n,
                    delay_ms: ((N - pos) * 4) as u64,
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_dispatcher() {
        let dispatcher = Dispatcher::new().unwrap();
        let other = Dispatcher::new().unwrap();

        let a = OrderedDispatch::create(&dispatcher);
        let b = OrderedDispatch::create(&dispatcher.clone());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &OrderedDispatch::create(&other)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ordered_receivers_see_batch_order() {
        let dispatcher = Dispatcher::builder()
            .decorator(Refire::default())
            .build()
            .unwrap();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let _r1 = dispatcher.register_instance(first.clone()).unwrap();
        let _r2 = dispatcher.register_instance(second.clone()).unwrap();
        let ordered = OrderedDispatch::create(&dispatcher);

        let forward: Vec<usize> = (0..N).collect();
        let reversed: Vec<usize> = (0..N).rev().collect();
        for expected in [forward, reversed] {
            first.seen.lock().clear();
            second.seen.lock().clear();

            let reports = ordered.fire_and_wait(batch(&expected)).await.unwrap();
            assert_eq!(reports.len(), N);
            assert!(reports.iter().all(DispatchReport::is_success));

            assert_eq!(*first.seen.lock(), expected);
            assert_eq!(*second.seen.lock(), expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_instances_are_delivered_once() {
        let dispatcher = Dispatcher::builder()
            .decorator(Refire::default())
            .build()
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let _reg = dispatcher.register_instance(recorder.clone()).unwrap();
        let ordered = OrderedDispatch::create(&dispatcher);

        let a = BoxedEvent::new(Step { n: 1, delay_ms: 5 });
        let b = BoxedEvent::new(Step { n: 2, delay_ms: 0 });
        let reports = ordered
            .fire_and_wait([a.clone(), a.clone(), b.clone()])
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        // every gate was released, so the batch and its lanes are gone
        assert!(
            ordered
                .tags
                .lock()
                .values()
                .all(|tag| tag.batch.upgrade().is_none())
        );

        let again = dispatcher.fire_and_wait(a.clone()).await.unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(*recorder.seen.lock(), [1, 2]);
    }

    #[derive(Default)]
    struct Steps {
        seen: Mutex<Vec<usize>>,
    }

    impl Receiver for Steps {
        fn declare(table: &mut ReceiverTable<Self>) {
            table
                .on("on_step", |this: Arc<Self>, step: Received<Step>| async move {
                    this.seen.lock().push(step.n);
                })
                .ordered();
        }
    }

    struct Quiet;

    impl Observer for Quiet {
        fn observe_event(&self, _ctx: &ObserveContext<'_>) {}
    }

    type Armed = Arc<OnceLock<(WeakDispatcher, BoxedEvent)>>;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_member_fired_early_waits_for_sealed_batch() {
        // Resolution runs inside dispatch, before the gate claims; the
        // observer factory uses that point to fire a later batch member
        // while earlier members have not claimed their slots yet.
        let armed: Armed = Arc::default();
        let fired = Arc::new(AtomicBool::new(false));
        let factory = {
            let armed = armed.clone();
            move || {
                if let Some((dispatcher, event)) = armed.get() {
                    if !fired.swap(true, Ordering::SeqCst) {
                        if let Some(dispatcher) = dispatcher.upgrade() {
                            dispatcher.fire_boxed(event.clone());
                        }
                    }
                }
                Quiet
            }
        };
        let dispatcher = Dispatcher::builder()
            .observer("quiet", factory)
            .build()
            .unwrap();
        let steps = Arc::new(Steps::default());
        let _reg = dispatcher.register_instance(steps.clone()).unwrap();
        let ordered = OrderedDispatch::create(&dispatcher);

        let events: Vec<BoxedEvent> = (0..3)
            .map(|n| BoxedEvent::new(Step { n, delay_ms: 0 }))
            .collect();
        armed
            .set((dispatcher.downgrade(), events[2].clone()))
            .unwrap_or_else(|_| unreachable!());
        // invalidates the cached resolution, so the factory runs on dispatch
        dispatcher.add_global_marker(Marker::new("quiet")).unwrap();

        ordered.fire_and_wait(events.clone()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while steps.seen.lock().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*steps.seen.lock(), [0, 1, 2]);
    }

    #[derive(Default)]
    struct Blocking {
        started: Notify,
        release: Notify,
        seen: Mutex<Vec<usize>>,
    }

    impl Receiver for Blocking {
        fn declare(table: &mut ReceiverTable<Self>) {
            table
                .on("on_step", |this: Arc<Self>, step: Received<Step>| async move {
                    if step.n == 0 {
                        this.started.notify_one();
                        this.release.notified().await;
                    }
                    this.seen.lock().push(step.n);
                })
                .ordered();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_releases_waiting_slots() {
        let dispatcher = Dispatcher::new().unwrap();
        let receiver = Arc::new(Blocking::default());
        let reg = dispatcher.register_instance(receiver.clone()).unwrap();
        let ordered = OrderedDispatch::create(&dispatcher);
        let mut completions = dispatcher.completions();

        let events = batch(&[0, 1, 2]);
        ordered.fire(events.clone()).unwrap();
        receiver.started.notified().await;

        reg.cancel();
        for _ in 0..2 {
            let report = completions.recv().await.unwrap();
            assert_eq!(report.skipped, 1);
            assert!(!report.event.refers_to(&events[0]));
        }

        receiver.release.notify_one();
        let report = completions.recv().await.unwrap();
        assert!(report.event.refers_to(&events[0]));
        assert_eq!(report.delivered, 1);
        assert_eq!(*receiver.seen.lock(), [0]);
    }

    #[tokio::test]
    async fn test_unbatched_events_pass_and_shutdown_closes() {
        let dispatcher = Dispatcher::new().unwrap();
        let _reg = dispatcher
            .register_static("app::Plain", |t| {
                t.on_any("on_any", |_: Arc<()>, _| async {}).ordered();
            })
            .unwrap();
        let ordered = OrderedDispatch::create(&dispatcher);

        let report = dispatcher
            .fire_and_wait(Step { n: 0, delay_ms: 0 })
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);

        dispatcher.shutdown().await;
        assert!(ordered.is_closed());
        assert!(matches!(
            ordered.fire(batch(&[0])),
            Err(DispatchError::ShutDown)
        ));
    }
}
