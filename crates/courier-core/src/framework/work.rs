//! Units of work and their results.
//!
//! A [`Work`] is a lazily evaluated, boxed future producing a
//! `Result<Reply, BoxError>`. The innermost work of a chain calls the
//! receiver entry point; every decorator may replace it with its own work.

use std::any::Any;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

use crate::foundation::BoxError;

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ============================================================================
// Reply
// ============================================================================

/// The value returned by a receiver entry point.
///
/// Decorators may inspect, replace or discard it.
#[derive(Default)]
pub struct Reply {
    value: Option<Box<dyn Any + Send>>,
    skipped: bool,
}

impl Reply {
    /// A reply carrying no value.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A reply carrying `value`.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Some(Box::new(value)),
            skipped: false,
        }
    }

    /// Marks a chain whose receiver call was skipped on purpose.
    pub(crate) fn skipped() -> Self {
        Self {
            value: None,
            skipped: true,
        }
    }

    pub(crate) fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Returns `true` if no value is carried.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Borrows the value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_ref().and_then(|v| v.downcast_ref())
    }

    /// Takes the value as `T`. Returns the reply unchanged on type mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let Self { value, skipped } = self;
        match value {
            Some(v) => match v.downcast::<T>() {
                Ok(v) => Ok(*v),
                Err(v) => Err(Self {
                    value: Some(v),
                    skipped,
                }),
            },
            None => Err(Self {
                value: None,
                skipped,
            }),
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("has_value", &self.value.is_some())
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Conversion of entry point return values into a chain result.
pub trait IntoReply {
    /// Performs the conversion.
    fn into_reply(self) -> Result<Reply, BoxError>;
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(Reply::empty())
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, BoxError> {
        Ok(self)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<BoxError>,
{
    fn into_reply(self) -> Result<Reply, BoxError> {
        self.map_err(Into::into).and_then(IntoReply::into_reply)
    }
}

// ============================================================================
// Work
// ============================================================================

/// A unit of work in a decorator chain.
///
/// `Work` implements [`IntoFuture`], so it can be awaited directly:
///
/// ```rust,ignore
/// fn wrap(&self, ctx: WrapContext) -> Option<Work> {
///     let inner = ctx.into_work();
///     Some(Work::new(async move {
///         let reply = inner.await?;
///         Ok::<_, BoxError>(reply)
///     }))
/// }
/// ```
pub struct Work {
    fut: BoxFuture<'static, Result<Reply, BoxError>>,
}

impl Work {
    /// Creates work from any future whose output converts into a reply.
    pub fn new<F>(fut: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: IntoReply,
    {
        Self {
            fut: Box::pin(async move { fut.await.into_reply() }),
        }
    }

    /// Work that skips the receiver call without error.
    pub(crate) fn skip() -> Self {
        Self {
            fut: Box::pin(async { Ok(Reply::skipped()) }),
        }
    }

    /// Runs the work to completion.
    pub async fn run(self) -> Result<Reply, BoxError> {
        self.fut.await
    }
}

impl IntoFuture for Work {
    type Output = Result<Reply, BoxError>;
    type IntoFuture = BoxFuture<'static, Result<Reply, BoxError>>;

    fn into_future(self) -> Self::IntoFuture {
        self.fut
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Work").finish_non_exhaustive()
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// How one receiver chain ended.
#[derive(Debug)]
pub enum Outcome {
    /// The receiver was called and returned normally.
    Delivered(Reply),
    /// A decorator short-circuited the chain, or an ordered gate coalesced
    /// or abandoned the call.
    Skipped,
    /// The receiver or a decorator failed or panicked.
    Failed(String),
}

impl Outcome {
    /// Returns `true` for [`Outcome::Failed`].
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub(crate) fn from_result(result: Result<Reply, BoxError>) -> Self {
        match result {
            Ok(reply) if reply.is_skipped() => Self::Skipped,
            Ok(reply) => Self::Delivered(reply),
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_downcast() {
        let reply = Reply::new(42u32);
        assert_eq!(reply.downcast_ref::<u32>(), Some(&42));
        let reply = reply.downcast::<String>().unwrap_err();
        assert_eq!(reply.downcast::<u32>().ok(), Some(42));
        assert!(Reply::empty().is_empty());
    }

    #[test]
    fn test_work_converts_results() {
        let ok = tokio_test::block_on(Work::new(async {}).run());
        assert!(tokio_test::assert_ok!(ok).is_empty());

        let failed = tokio_test::block_on(Work::new(async { Err::<(), _>("boom") }).run());
        assert_eq!(tokio_test::assert_err!(failed).to_string(), "boom");

        let valued = tokio_test::block_on(Work::new(async { Ok::<_, BoxError>(Reply::new("hi")) }).run());
        assert_eq!(valued.unwrap().downcast_ref::<&str>(), Some(&"hi"));
    }

    #[tokio::test]
    async fn test_skip_maps_to_skipped_outcome() {
        let outcome = Outcome::from_result(Work::skip().await);
        assert!(matches!(outcome, Outcome::Skipped));
        let outcome = Outcome::from_result(Err("bad".into()));
        assert!(outcome.is_failure());
    }
}
