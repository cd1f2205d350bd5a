use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::Bridge;
use crate::foundation::{BoxError, BridgeResult};
use crate::framework::Receiver;

/// A reusable synchronous bridge.
///
/// The activity registers itself for the duration of each call; its entry
/// points complete the call through [`Bridge::finish`] or [`Bridge::fail`].
/// Concurrent callers queue up and are served one at a time, in order.
///
/// ```rust,ignore
/// struct Login {
///     bridge: Bridge<Session>,
/// }
///
/// impl Receiver for Login {
///     fn declare(table: &mut ReceiverTable<Self>) {
///         table.on("on_session", |this: Arc<Self>, s: Received<SessionOpened>| async move {
///             this.bridge.finish(s.session.clone())
///         });
///     }
/// }
///
/// #[async_trait]
/// impl Activity for Login {
///     type Output = Session;
///
///     fn bridge(&self) -> &Bridge<Session> {
///         &self.bridge
///     }
///
///     async fn start(&self) -> Result<(), BoxError> {
///         self.bridge.fire(OpenSession { user: "alice".into() });
///         Ok(())
///     }
/// }
///
/// let session = Arc::new(login).call().await?;
/// ```
#[async_trait]
pub trait Activity: Receiver + Sized {
    /// The value a successful call returns.
    type Output: Send + 'static;

    /// The result cell of this activity.
    fn bridge(&self) -> &Bridge<Self::Output>;

    /// Kicks off the work, typically by firing an event.
    async fn start(&self) -> Result<(), BoxError>;

    /// Registers, starts and waits for the outcome.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`](crate::BridgeError::InvalidState) without
    /// a dispatcher or on re-entry from `start`,
    /// [`BridgeError::Failed`](crate::BridgeError::Failed) when the call fails.
    async fn call(self: Arc<Self>) -> BridgeResult<Self::Output> {
        let receiver = self.clone();
        self.bridge()
            .drive(
                move |dispatcher| Ok(vec![dispatcher.register_instance(receiver)?]),
                self.start(),
                true,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::foundation::{BridgeError, Received};
    use crate::framework::{Dispatcher, ReceiverTable};

    #[derive(Debug)]
    struct Greet {
        name: &'static str,
    }
    crate::impl_event!(Greet);

    #[derive(Debug)]
    struct Greeted {
        text: String,
    }
    crate::impl_event!(Greeted);

    struct Greeter {
        bridge: Bridge<String>,
        starts: AtomicUsize,
        answer: bool,
    }

    impl Greeter {
        fn new(dispatcher: &Dispatcher, answer: bool) -> Arc<Self> {
            Arc::new(Self {
                bridge: Bridge::with_dispatcher(dispatcher.clone()),
                starts: AtomicUsize::new(0),
                answer,
            })
        }
    }

    impl Receiver for Greeter {
        fn declare(table: &mut ReceiverTable<Self>) {
            table.on("on_greeted", |this: Arc<Self>, g: Received<Greeted>| async move {
                this.bridge.finish(g.text.clone())
            });
        }
    }

    #[async_trait]
    impl Activity for Greeter {
        type Output = String;

        fn bridge(&self) -> &Bridge<String> {
            &self.bridge
        }

        async fn start(&self) -> Result<(), BoxError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.answer {
                self.bridge.fire(Greet { name: "alice" });
            }
            Ok(())
        }
    }

    fn echo_server(dispatcher: &Dispatcher) -> crate::Registration {
        let weak = dispatcher.downgrade();
        dispatcher
            .register_static("server::Echo", move |t| {
                t.on("on_greet", move |_: Arc<()>, g: Received<Greet>| {
                    let dispatcher = weak.upgrade();
                    async move {
                        if let Some(dispatcher) = dispatcher {
                            dispatcher.fire(Greeted {
                                text: format!("hello, {}", g.name),
                            });
                        }
                    }
                });
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_call_without_dispatcher_fails() {
        let greeter = Arc::new(Greeter {
            bridge: Bridge::new(),
            starts: AtomicUsize::new(0),
            answer: true,
        });
        let err = greeter.clone().call().await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState(_)));
        assert_eq!(greeter.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_call_returns_value_and_resets() {
        let dispatcher = Dispatcher::new().unwrap();
        let _server = echo_server(&dispatcher);
        let greeter = Greeter::new(&dispatcher, true);

        assert_eq!(greeter.clone().call().await.unwrap(), "hello, alice");
        assert!(!greeter.bridge.is_executing());
        assert!(matches!(
            greeter.bridge.finish("late".into()),
            Err(BridgeError::InvalidState(_))
        ));
        assert!(matches!(
            greeter.bridge.fail("late", None),
            Err(BridgeError::InvalidState(_))
        ));
        assert!(!greeter.bridge.fire(Greet { name: "nobody" }));

        // Only the echo server stays registered between calls.
        assert_eq!(dispatcher.describe().len(), 1);
        assert_eq!(greeter.clone().call().await.unwrap(), "hello, alice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_callers_are_served_in_turn() {
        let dispatcher = Dispatcher::new().unwrap();
        let _server = echo_server(&dispatcher);
        let greeter = Greeter::new(&dispatcher, true);

        let (a, b) = tokio::join!(greeter.clone().call(), greeter.clone().call());
        assert_eq!(a.unwrap(), "hello, alice");
        assert_eq!(b.unwrap(), "hello, alice");
        assert_eq!(greeter.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timed_out_call_can_be_retried() {
        let dispatcher = Dispatcher::new().unwrap();
        let silent = Greeter::new(&dispatcher, false);

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            silent.clone().call(),
        )
        .await;
        assert!(waited.is_err());
        assert!(!silent.bridge.is_executing());
        assert!(dispatcher.describe().is_empty());

        let _server = echo_server(&dispatcher);
        let answering = Greeter::new(&dispatcher, true);
        assert_eq!(answering.call().await.unwrap(), "hello, alice");
    }
}
