use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bridge::Bridge;
use crate::foundation::{BoxError, BridgeResult, Event, Received};
use crate::framework::{Receiver, ReceiverTable};

/// An event that reports the failure of a sequence.
pub trait FailureEvent: Event {
    /// Human-readable failure description.
    fn failure_message(&self) -> String;
}

/// A single-use synchronous bridge with a dedicated failure event.
///
/// Besides the sequencer's own entry points, a [`FailListener`] is registered
/// for the call; any [`Sequencer::Failure`] event fired while the call runs
/// fails it with the event's message. A sequencer cannot be called twice.
#[async_trait]
pub trait Sequencer: Receiver + Sized {
    /// The value a successful call returns.
    type Output: Send + 'static;

    /// The event that fails the call.
    type Failure: FailureEvent;

    /// The result cell of this sequencer.
    fn bridge(&self) -> &Bridge<Self::Output>;

    /// Kicks off the sequence.
    async fn start(&self) -> Result<(), BoxError>;

    /// Registers, starts and waits for the outcome.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`](crate::BridgeError::InvalidState) on a
    /// second call, without a dispatcher, or on re-entry;
    /// [`BridgeError::Failed`](crate::BridgeError::Failed) when the sequence
    /// fails.
    async fn call(self: Arc<Self>) -> BridgeResult<Self::Output> {
        let receiver = self.clone();
        self.bridge()
            .drive(
                move |dispatcher| {
                    let own = dispatcher.register_instance(receiver.clone())?;
                    match dispatcher.register_instance(Arc::new(FailListener { sequencer: receiver })) {
                        Ok(listener) => Ok(vec![own, listener]),
                        Err(err) => {
                            own.cancel();
                            Err(err.into())
                        }
                    }
                },
                self.start(),
                false,
            )
            .await
    }
}

/// Receives a sequencer's failure event and fails its running call.
pub struct FailListener<S> {
    sequencer: Arc<S>,
}

impl<S: Sequencer> Receiver for FailListener<S> {
    fn declare(table: &mut ReceiverTable<Self>) {
        table.on("on_failure", |this: Arc<Self>, failure: Received<S::Failure>| async move {
            let message = failure.failure_message();
            if let Err(err) = this.sequencer.bridge().fail(message, None) {
                warn!(error = %err, "Failure event arrived outside a running sequence");
            }
        });
    }
}
