//! Built-in decorator and observer bindings.
//!
//! Installed with [`DispatcherBuilder::with_builtins`]:
//!
//! | Marker                          | Binding   | Effect                                      |
//! |---------------------------------|-----------|---------------------------------------------|
//! | `@logged(level="info")`         | observer  | logs before and after each chain            |
//! | `@timed(warn_after_ms=50)`      | decorator | measures the chain, warns when it runs long |
//! | `@on_failure`                   | decorator | fires [`ReceiverFailed`] when the work fails |

use std::time::{Duration, Instant};

use tracing::{Level, debug, error, event, trace, warn};

use crate::foundation::{Marker, MarkerKind};
use crate::framework::{
    Decorator, DispatcherBuilder, ObserveContext, Observer, Phase, Work, WrapContext,
};

/// Marker kind of [`LoggedObserver`].
pub const LOGGED: MarkerKind = MarkerKind::from_static("logged");
/// Marker kind of [`TimedDecorator`].
pub const TIMED: MarkerKind = MarkerKind::from_static("timed");
/// Marker kind of [`OnFailureDecorator`].
pub const ON_FAILURE: MarkerKind = MarkerKind::from_static("on_failure");

const DEFAULT_WARN_AFTER_MS: u64 = 1000;

pub(crate) fn install(builder: DispatcherBuilder) -> DispatcherBuilder {
    builder
        .observer(LOGGED, LoggedObserver::default)
        .decorator(TimedDecorator)
        .decorator(OnFailureDecorator)
}

// ============================================================================
// Logged
// ============================================================================

/// Logs every chain it observes. The `level` parameter picks the log level
/// (`trace` .. `error`, default `debug`).
#[derive(Debug)]
pub struct LoggedObserver {
    level: Level,
}

impl Default for LoggedObserver {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggedObserver {
    /// The level chains are logged at.
    pub fn level(&self) -> Level {
        self.level
    }
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::TRACE => event!(Level::TRACE, $($arg)+),
            Level::DEBUG => event!(Level::DEBUG, $($arg)+),
            Level::INFO => event!(Level::INFO, $($arg)+),
            Level::WARN => event!(Level::WARN, $($arg)+),
            _ => event!(Level::ERROR, $($arg)+),
        }
    };
}

impl Observer for LoggedObserver {
    fn initialize(&mut self, marker: &Marker) {
        if let Some(level) = marker.param::<String>("level") {
            match level.parse() {
                Ok(level) => self.level = level,
                Err(_) => warn!(level = %level, "Unknown log level on @logged, using debug"),
            }
        }
    }

    fn observe_event(&self, ctx: &ObserveContext<'_>) {
        let target = ctx.target.to_string();
        let event_name = ctx.event.event_name();
        match ctx.phase {
            Phase::Before => log_at!(self.level, receiver = %target, event_name, "Delivering event"),
            Phase::After(outcome) => {
                log_at!(self.level, receiver = %target, event_name, outcome = ?outcome, "Event handled")
            }
        }
    }
}

// ============================================================================
// Timed
// ============================================================================

/// Measures the wrapped work and warns when it exceeds `warn_after_ms`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimedDecorator;

impl Decorator for TimedDecorator {
    fn marker_kind(&self) -> MarkerKind {
        TIMED
    }

    fn wrap(&self, ctx: WrapContext) -> Option<Work> {
        let threshold = Duration::from_millis(
            ctx.marker()
                .param::<u64>("warn_after_ms")
                .unwrap_or(DEFAULT_WARN_AFTER_MS),
        );
        let target = ctx.target().to_string();
        let work = ctx.into_work();
        Some(Work::new(async move {
            let started = Instant::now();
            let result = work.await;
            let elapsed = started.elapsed();
            if elapsed > threshold {
                warn!(
                    receiver = %target,
                    elapsed_ms = elapsed.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "Receiver ran longer than expected"
                );
            } else {
                trace!(receiver = %target, elapsed_ms = elapsed.as_millis() as u64, "Receiver timed");
            }
            result
        }))
    }
}

// ============================================================================
// On failure
// ============================================================================

/// Fired by `@on_failure` when the wrapped work fails.
#[derive(Debug, Clone)]
pub struct ReceiverFailed {
    /// Receiver type name.
    pub receiver: &'static str,
    /// Entry point name.
    pub entry: &'static str,
    /// Name of the event that was being handled.
    pub event_name: &'static str,
    /// The error message.
    pub error: String,
}
crate::impl_event!(ReceiverFailed);

/// Fires a [`ReceiverFailed`] event for failing work, then returns the
/// original error.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnFailureDecorator;

impl Decorator for OnFailureDecorator {
    fn marker_kind(&self) -> MarkerKind {
        ON_FAILURE
    }

    fn wrap(&self, ctx: WrapContext) -> Option<Work> {
        // A failing ReceiverFailed handler must not feed itself.
        if ctx.event().downcast_ref::<ReceiverFailed>().is_some() {
            return Some(ctx.into_work());
        }
        let dispatcher = ctx.dispatcher();
        let (_, event, target, work) = ctx.into_parts();
        Some(Work::new(async move {
            let result = work.await;
            if let Err(err) = &result {
                match &dispatcher {
                    Some(dispatcher) => {
                        debug!(receiver = %target, "Reporting receiver failure");
                        dispatcher.fire(ReceiverFailed {
                            receiver: target.receiver(),
                            entry: target.entry(),
                            event_name: event.event_name(),
                            error: err.to_string(),
                        });
                    }
                    None => error!(receiver = %target, error = %err, "Receiver failed after dispatcher shut down"),
                }
            }
            result
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::foundation::{BoxError, Received};
    use crate::framework::{Dispatcher, Receiver, ReceiverTable, Reply};

    #[derive(Debug)]
    struct Job {
        fail: bool,
    }
    crate::impl_event!(Job);

    #[derive(Default)]
    struct Worker;

    impl Receiver for Worker {
        fn declare(table: &mut ReceiverTable<Self>) {
            table
                .on("on_job", |_: Arc<Self>, job: Received<Job>| async move {
                    if job.fail {
                        Err::<(), BoxError>("job exploded".into())
                    } else {
                        Ok(())
                    }
                })
                .marker(Marker::new(ON_FAILURE))
                .marker(Marker::new(TIMED).with("warn_after_ms", 5))
                .marker(Marker::new(LOGGED).with("level", "info"));
        }
    }

    #[test]
    fn test_logged_reads_level() {
        let mut observer = LoggedObserver::default();
        observer.initialize(&Marker::new(LOGGED).with("level", "warn"));
        assert_eq!(observer.level(), Level::WARN);

        let mut fallback = LoggedObserver::default();
        fallback.initialize(&Marker::new(LOGGED).with("level", "loud"));
        assert_eq!(fallback.level(), Level::DEBUG);
    }

    #[tokio::test]
    async fn test_builtins_describe_with_tags() {
        let dispatcher = Dispatcher::builder().with_builtins().build().unwrap();
        let _worker = dispatcher.register::<Worker>().unwrap();

        let described = dispatcher.describe();
        assert_eq!(described.len(), 1);
        assert_eq!(
            described[0].decorators,
            vec!["@on_failure".to_string(), "@timed(warn_after_ms=5)".to_string()]
        );
        assert_eq!(described[0].observers, vec!["@logged(level=\"info\")".to_string()]);
    }

    #[tokio::test]
    async fn test_on_failure_fires_receiver_failed() {
        let dispatcher = Dispatcher::builder().with_builtins().build().unwrap();
        let _worker = dispatcher.register::<Worker>().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sink = dispatcher
            .register_static("audit::FailureSink", move |t| {
                t.on("on_failed", move |_: Arc<()>, failed: Received<ReceiverFailed>| {
                    let _ = tx.send((*failed).clone());
                    async {}
                });
            })
            .unwrap();

        let ok = dispatcher.fire_and_wait(Job { fail: false }).await.unwrap();
        assert!(ok.is_success());
        assert!(rx.try_recv().is_err());

        let report = dispatcher.fire_and_wait(Job { fail: true }).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error, "job exploded");

        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.receiver, "Worker");
        assert_eq!(failed.entry, "on_job");
        assert_eq!(failed.event_name, "Job");
        assert_eq!(failed.error, "job exploded");
    }

    #[tokio::test]
    async fn test_timed_passes_reply_through() {
        let dispatcher = Dispatcher::builder().with_builtins().build().unwrap();
        let _echo = dispatcher
            .register_static("timed::Echo", |t| {
                t.on("on_job", |_: Arc<()>, _: Received<Job>| async { Reply::new(7u32) })
                    .marker(Marker::new(TIMED));
            })
            .unwrap();

        let report = dispatcher.fire_and_wait(Job { fail: false }).await.unwrap();
        assert_eq!(report.delivered, 1);
    }
}
