//! Receiver registry.
//!
//! Entries live in a copy-on-write list: `fire` takes a cheap snapshot
//! (`Arc<Vec<_>>`) and iterates it without holding any lock, while register
//! and cancel replace the list. A racing registration may or may not be seen
//! by a concurrent fire, but never twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::foundation::{BoxError, BoxedEvent};
use crate::framework::receiver::ReceiverTarget;
use crate::framework::resolver::{Declaration, ReceiverKey};
use crate::framework::work::{BoxFuture, Reply};

/// Process-unique identifier of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry-{}", self.0)
    }
}

pub(crate) type Invoke =
    Arc<dyn Fn(BoxedEvent) -> BoxFuture<'static, Result<Reply, BoxError>> + Send + Sync>;

/// One registered entry point.
pub(crate) struct Entry {
    pub(crate) id: EntryId,
    pub(crate) key: ReceiverKey,
    pub(crate) target: Arc<ReceiverTarget>,
    pub(crate) decl: Declaration,
    pub(crate) invoke: Invoke,
    pub(crate) cancel: CancellationToken,
}

impl Entry {
    pub(crate) fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

pub(crate) struct Registry {
    entries: RwLock<Arc<Vec<Arc<Entry>>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> EntryId {
        EntryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the current entry list.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<Entry>>> {
        self.entries.read().clone()
    }

    pub(crate) fn insert(&self, added: Vec<Arc<Entry>>) {
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + added.len());
        next.extend(entries.iter().cloned());
        next.extend(added);
        *entries = Arc::new(next);
    }

    pub(crate) fn remove(&self, ids: &[EntryId]) {
        let mut entries = self.entries.write();
        let next = entries
            .iter()
            .filter(|e| !ids.contains(&e.id))
            .cloned()
            .collect();
        *entries = Arc::new(next);
    }

    /// Cancels every entry, used on shutdown.
    pub(crate) fn clear(&self) {
        let old = std::mem::replace(&mut *self.entries.write(), Arc::new(Vec::new()));
        for entry in old.iter() {
            entry.cancel.cancel();
        }
    }
}

/// Removes the entries of a cancelled registration.
pub(crate) trait Unregister: Send + Sync {
    fn unregister(&self, ids: &[EntryId], key: ReceiverKey);
}

impl Unregister for Registry {
    fn unregister(&self, ids: &[EntryId], _key: ReceiverKey) {
        self.remove(ids);
    }
}

/// A cancelable handle to registered receiver entry points.
///
/// Dropping the handle does not unregister; call [`cancel`](Self::cancel).
#[must_use = "a registration can only be cancelled through its handle"]
#[derive(Clone)]
pub struct Registration {
    owner: Weak<dyn Unregister>,
    key: ReceiverKey,
    receiver: &'static str,
    ids: Vec<EntryId>,
    tokens: Vec<CancellationToken>,
}

impl Registration {
    pub(crate) fn new(
        owner: Weak<dyn Unregister>,
        key: ReceiverKey,
        receiver: &'static str,
        entries: &[Arc<Entry>],
    ) -> Self {
        Self {
            owner,
            key,
            receiver,
            ids: entries.iter().map(|e| e.id).collect(),
            tokens: entries.iter().map(|e| e.cancel.clone()).collect(),
        }
    }

    /// Removes the entries from future matching. In-flight chains keep
    /// running; ordered gates waiting on these entries are released.
    ///
    /// Cancelling twice is a no-op.
    pub fn cancel(&self) {
        if self.is_cancelled() {
            return;
        }
        for token in &self.tokens {
            token.cancel();
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.unregister(&self.ids, self.key);
        }
        debug!(receiver = self.receiver, entries = self.ids.len(), "Registration cancelled");
    }

    /// Returns `true` once cancelled, or once the dispatcher shut down.
    pub fn is_cancelled(&self) -> bool {
        self.tokens.iter().all(CancellationToken::is_cancelled)
    }

    /// The registered entry ids.
    pub fn entries(&self) -> &[EntryId] {
        &self.ids
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("receiver", &self.receiver)
            .field("entries", &self.ids)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
