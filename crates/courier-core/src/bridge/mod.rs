//! Synchronous bridges.
//!
//! A bridge turns "register as a receiver, kick off some work, wait for the
//! event that says it is done" into one awaited call:
//!
//! ```text
//!  call() ──► lock turn ──► Executing ──► register ──► start()
//!                                                        │
//!         receiver entry points (worker tasks) ──► finish(v) / fail(msg)
//!                                                        │
//!  return v / Failed ◄── reset ◄── cancel registrations ◄┘
//! ```
//!
//! [`Bridge`] is the single-assignment result cell shared by [`Activity`]
//! (reusable) and [`Sequencer`] (single use, with a failure event).

mod activity;
mod sequencer;

pub use activity::Activity;
pub use sequencer::{FailListener, FailureEvent, Sequencer};

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::foundation::{BoxError, BoxedEvent, BridgeError, BridgeResult};
use crate::framework::{Dispatcher, Registration};

tokio::task_local! {
    static ACTIVE_BRIDGES: Vec<usize>;
}

enum BridgeState<T> {
    Idle,
    Executing,
    Finished(T),
    Failed {
        message: String,
        cause: Option<BoxError>,
    },
    Spent,
}

impl<T> BridgeState<T> {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Executing => "executing",
            Self::Finished(_) => "finished",
            Self::Failed { .. } => "failed",
            Self::Spent => "spent",
        }
    }
}

/// The result cell of a synchronous bridge.
pub struct Bridge<T> {
    state: Mutex<BridgeState<T>>,
    done: Notify,
    turn: tokio::sync::Mutex<()>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl<T: Send + 'static> Bridge<T> {
    /// Creates an idle bridge without a dispatcher.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState::Idle),
            done: Notify::new(),
            turn: tokio::sync::Mutex::new(()),
            dispatcher: Mutex::new(None),
        }
    }

    /// Creates an idle bridge bound to `dispatcher`.
    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        let bridge = Self::new();
        bridge.set_dispatcher(dispatcher);
        bridge
    }

    /// Sets the dispatcher used by later calls.
    pub fn set_dispatcher(&self, dispatcher: Dispatcher) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    /// Returns the configured dispatcher.
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.dispatcher.lock().clone()
    }

    /// Returns `true` while a call is waiting for its outcome.
    pub fn is_executing(&self) -> bool {
        matches!(*self.state.lock(), BridgeState::Executing)
    }

    /// Completes the running call with `value`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] if no call is waiting, or the call
    /// already has an outcome.
    pub fn finish(&self, value: T) -> BridgeResult<()> {
        self.complete(BridgeState::Finished(value))
    }

    /// Fails the running call.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] if no call is waiting, or the call
    /// already has an outcome.
    pub fn fail(&self, message: impl Into<String>, cause: Option<BoxError>) -> BridgeResult<()> {
        self.complete(BridgeState::Failed {
            message: message.into(),
            cause,
        })
    }

    fn complete(&self, outcome: BridgeState<T>) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if !matches!(*state, BridgeState::Executing) {
            return Err(BridgeError::InvalidState(match *state {
                BridgeState::Finished(_) | BridgeState::Failed { .. } => "outcome already set",
                _ => "not executing",
            }));
        }
        trace!(outcome = outcome.name(), "Bridge outcome set");
        *state = outcome;
        drop(state);
        self.done.notify_one();
        Ok(())
    }

    /// Fires `event` through the dispatcher while a call is running.
    ///
    /// Returns `false` (and drops the event) otherwise.
    pub fn fire(&self, event: impl Into<BoxedEvent>) -> bool {
        if !self.is_executing() {
            return false;
        }
        match self.dispatcher() {
            Some(dispatcher) => {
                dispatcher.fire(event);
                true
            }
            None => false,
        }
    }

    /// Runs one bridged call.
    ///
    /// `register` installs the receivers that will complete the call; `start`
    /// kicks off the work. The registrations are cancelled and the state
    /// reset however the call ends, including when the caller stops polling.
    pub(crate) async fn drive<F, S>(&self, register: F, start: S, reusable: bool) -> BridgeResult<T>
    where
        F: FnOnce(&Dispatcher) -> BridgeResult<Vec<Registration>>,
        S: Future<Output = Result<(), BoxError>>,
    {
        let dispatcher = self
            .dispatcher()
            .ok_or(BridgeError::InvalidState("no dispatcher configured"))?;

        let me = self as *const Self as usize;
        let mut active = ACTIVE_BRIDGES.try_with(Clone::clone).unwrap_or_default();
        if active.contains(&me) {
            return Err(BridgeError::InvalidState("re-entrant call"));
        }

        let _turn = self.turn.lock().await;
        {
            let mut state = self.state.lock();
            match *state {
                BridgeState::Idle => *state = BridgeState::Executing,
                BridgeState::Spent => return Err(BridgeError::InvalidState("already used")),
                _ => return Err(BridgeError::InvalidState("busy")),
            }
        }

        let mut cleanup = Cleanup {
            bridge: self,
            registrations: Vec::new(),
            reusable,
        };
        cleanup.registrations = register(&dispatcher)?;
        debug!(registrations = cleanup.registrations.len(), "Bridge executing");

        active.push(me);
        if let Err(err) = ACTIVE_BRIDGES.scope(active, start).await {
            let _ = self.fail(err.to_string(), Some(err));
        }

        loop {
            if let Some(outcome) = self.take_outcome(reusable) {
                return outcome;
            }
            self.done.notified().await;
        }
    }

    fn take_outcome(&self, reusable: bool) -> Option<BridgeResult<T>> {
        let mut state = self.state.lock();
        if !matches!(*state, BridgeState::Finished(_) | BridgeState::Failed { .. }) {
            return None;
        }
        match std::mem::replace(&mut *state, reset_state(reusable)) {
            BridgeState::Finished(value) => Some(Ok(value)),
            BridgeState::Failed { message, cause } => Some(Err(BridgeError::Failed { message, cause })),
            _ => None,
        }
    }
}

impl<T: Send + 'static> Default for Bridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Bridge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state.lock().name())
            .field("has_dispatcher", &self.dispatcher.lock().is_some())
            .finish()
    }
}

fn reset_state<T>(reusable: bool) -> BridgeState<T> {
    if reusable {
        BridgeState::Idle
    } else {
        BridgeState::Spent
    }
}

/// Cancels a call's registrations and resets its state on every exit path.
struct Cleanup<'a, T> {
    bridge: &'a Bridge<T>,
    registrations: Vec<Registration>,
    reusable: bool,
}

impl<T> Drop for Cleanup<'_, T> {
    fn drop(&mut self) {
        for registration in &self.registrations {
            registration.cancel();
        }
        let mut state = self.bridge.state.lock();
        if !matches!(*state, BridgeState::Idle | BridgeState::Spent) {
            *state = reset_state(self.reusable);
        }
        trace!("Bridge call cleaned up");
    }
}
