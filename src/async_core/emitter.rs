//! Async composition kernel (component H): lazy, type-erased tasks with
//! `just`/`then`/`let_value`/`timeout` combinators and cooperative
//! cancellation via a stop token.
//!
//! This is a thin layer over `std::future::Future` rather than a hand-rolled
//! scheduler: the event loop (see [`crate::event_loop`]) is a single
//! `tokio` runtime, so composition can be ordinary `Future` combinators
//! instead of a bespoke vtable-dispatched emitter/handler/operation graph.
//! What's kept from the sender/receiver model is the *vocabulary* — `just`,
//! `then`, `let_value`, `timeout`, `tie`, `detach` — and explicit,
//! handle-based cancellation instead of `Future::drop`-as-cancellation.
//!
//! `then`/`let_value` operate on a completion pair, `(status, value)`,
//! represented the idiomatic-Rust way as `Result<T, Error>` rather than as a
//! separate status argument: `Ok` is the non-error status, `Err` carries the
//! error status. Both take a `flags` bitmask (mirroring the plain `u32`
//! bit-constant style [`crate::wire::op_msg`] already uses for its wire
//! flags rather than a new `bitflags` dependency); the one bit defined today
//! is [`FORWARD_ERRORS`], which short-circuits the continuation on an error
//! completion instead of letting it observe/rewrite the error.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// A type-erased, `Send` task. The unit of composition for every combinator
/// in this module.
pub type Task<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// `then`/`let_value` flag: when set and the upstream task completed with an
/// error status, the continuation is skipped and the error is forwarded
/// downstream unchanged. Unset, the continuation always runs and may observe
/// or rewrite the error itself.
pub const FORWARD_ERRORS: u32 = 1 << 0;

/// `just(value)`: a task that completes immediately with `value`.
pub fn just<T>(value: T) -> Task<T>
where
    T: Send + 'static,
{
    Box::pin(std::future::ready(value))
}

/// `then(task, flags, f)`: runs `task`, then applies `f` to its completion
/// pair. With [`FORWARD_ERRORS`] set, an error completion bypasses `f` and is
/// forwarded as-is — `then(em, FORWARD_ERRORS, Ok)` is therefore the
/// identity transform, preserving `(status, value)` exactly.
pub fn then<T, U>(task: Task<Result<T>>, flags: u32, f: impl FnOnce(Result<T>) -> Result<U> + Send + 'static) -> Task<Result<U>>
where
    T: Send + 'static,
    U: Send + 'static,
{
    Box::pin(async move {
        match task.await {
            Err(e) if flags & FORWARD_ERRORS != 0 => Err(e),
            outcome => f(outcome),
        }
    })
}

/// `let_value(task, flags, f)`: runs `task`, then runs the task `f` returns
/// against its completion pair — i.e. monadic bind. Named `let_value` rather
/// than `let` since the latter is a reserved word. With [`FORWARD_ERRORS`]
/// set, an error completion short-circuits directly to that error without
/// invoking `f`.
pub fn let_value<T, U>(
    task: Task<Result<T>>,
    flags: u32,
    f: impl FnOnce(Result<T>) -> Task<Result<U>> + Send + 'static,
) -> Task<Result<U>>
where
    T: Send + 'static,
    U: Send + 'static,
{
    Box::pin(async move {
        match task.await {
            Err(e) if flags & FORWARD_ERRORS != 0 => Err(e),
            outcome => f(outcome).await,
        }
    })
}

/// `tie(a, b)`: runs two tasks concurrently and completes with both results
/// once both are done (a join, not a race).
pub fn tie<A, B>(a: Task<A>, b: Task<B>) -> Task<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Box::pin(async move { tokio::join!(a, b) })
}

/// `timeout(task, duration, stop_token)`: races `task` against a deadline
/// and against cooperative cancellation. Yields [`Error::TimedOut`] or
/// [`Error::Cancelled`] if either fires first; otherwise forwards `task`'s
/// result.
pub fn timeout<T>(task: Task<T>, duration: Duration, stop_token: StopToken) -> Task<Result<T>>
where
    T: Send + 'static,
{
    Box::pin(async move {
        tokio::select! {
            result = task => Ok(result),
            () = stop_token.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(duration) => Err(Error::TimedOut),
        }
    })
}

/// `detach(task)`: fire-and-forget — schedules `task` on the runtime and
/// does not wait for it. Errors from a detached task are only visible via
/// logging, since there is no longer anyone positioned to receive them.
pub fn detach<T>(task: Task<T>)
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        task.await;
    });
}

/// The shared half of a [`StopSource`]/[`StopToken`] pair. A stop token may
/// be cloned and handed to any number of in-flight operations; requesting a
/// stop is a single atomic flip, observed by every clone.
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<StopState>,
}

#[derive(Default)]
struct StopState {
    requested: AtomicBool,
    notify: tokio::sync::Notify,
}

impl StopToken {
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Resolves once a stop has been requested. Used inside `tokio::select!`
    /// alongside the operation being made cancellable.
    pub async fn cancelled(&self) {
        if self.is_stop_requested() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Owns the authority to request cancellation. Dropping a `StopSource`
/// does not itself cancel anything — only an explicit `request_stop()` does.
#[derive(Default)]
pub struct StopSource {
    token: StopToken,
}

impl StopSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn token(&self) -> StopToken {
        self.token.clone()
    }

    pub fn request_stop(&self) {
        self.token.inner.requested.store(true, Ordering::Release);
        self.token.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn just_then_let_value_chain() {
        let t: Task<Result<i32>> = just(Ok(1));
        let t = then(t, 0, |v| v.map(|n| n + 1));
        let t = let_value(t, 0, |v| just(v.map(|n| n * 10)));
        assert_eq!(t.await.unwrap(), 20);
    }

    #[tokio::test]
    async fn tie_joins_both_results() {
        let (a, b) = tie(just("a"), just(1)).await;
        assert_eq!((a, b), ("a", 1));
    }

    // Invariant 8: `then(em, FORWARD_ERRORS, identity)` preserves
    // `(status, value)` for both an ok and an error completion.
    #[tokio::test]
    async fn then_identity_preserves_ok_completion_under_forward_errors() {
        let t: Task<Result<i32>> = just(Ok(7));
        let identity = then(t, FORWARD_ERRORS, Ok);
        assert_eq!(identity.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn then_identity_preserves_error_completion_under_forward_errors() {
        let t: Task<Result<i32>> = just(Err(Error::Usage("boom")));
        let identity = then(t, FORWARD_ERRORS, Ok);
        assert!(matches!(identity.await, Err(Error::Usage("boom"))));
    }

    // Scenario F: `just(ok, 1) |> let(FORWARD_ERRORS, λ_. just(err_x, nil))`
    // tied — the upstream completion was ok, so the continuation still runs
    // and its error becomes the captured status.
    #[tokio::test]
    async fn let_value_forward_errors_runs_continuation_on_ok_upstream() {
        let t: Task<Result<i32>> = just(Ok(1));
        let chained = let_value(t, FORWARD_ERRORS, |_| -> Task<Result<()>> { just(Err(Error::Usage("err_x"))) });
        assert!(matches!(chained.await, Err(Error::Usage("err_x"))));
    }

    // With FORWARD_ERRORS set, an upstream error short-circuits: the
    // continuation never runs at all.
    #[tokio::test]
    async fn let_value_forward_errors_short_circuits_on_error_upstream() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_inner = ran.clone();
        let t: Task<Result<i32>> = just(Err(Error::Usage("upstream failed")));
        let chained = let_value(t, FORWARD_ERRORS, move |_| -> Task<Result<i32>> {
            ran_inner.store(true, Ordering::SeqCst);
            just(Ok(0))
        });
        assert!(matches!(chained.await, Err(Error::Usage("upstream failed"))));
        assert!(!ran.load(Ordering::SeqCst));
    }

    // Invariant 9: let-associativity under forward_errors —
    // `let(let(em, f), g) ≡ let(em, λx. let(f(x), g))` for error propagation.
    #[tokio::test]
    async fn let_value_associates_under_forward_errors_for_error_propagation() {
        fn f(v: Result<i32>) -> Task<Result<i32>> {
            just(v.map(|n| n + 1))
        }
        fn g(v: Result<i32>) -> Task<Result<i32>> {
            just(v.map(|n| n * 10))
        }

        let left: Task<Result<i32>> = just(Err(Error::Usage("propagated")));
        let left = let_value(let_value(left, FORWARD_ERRORS, f), FORWARD_ERRORS, g);

        let right: Task<Result<i32>> = just(Err(Error::Usage("propagated")));
        let right = let_value(right, FORWARD_ERRORS, |x| let_value(f(x), FORWARD_ERRORS, g));

        let (left, right) = tie(left, right).await;
        assert!(matches!(left, Err(Error::Usage("propagated"))));
        assert!(matches!(right, Err(Error::Usage("propagated"))));
    }

    #[tokio::test]
    async fn timeout_fires_before_long_sleep() {
        let slow: Task<()> = Box::pin(tokio::time::sleep(Duration::from_secs(60)));
        let src = StopSource::new();
        let result = timeout(slow, Duration::from_millis(5), src.token()).await;
        assert!(matches!(result, Err(Error::TimedOut)));
    }

    #[tokio::test]
    async fn stop_token_cancels_before_deadline() {
        let slow: Task<()> = Box::pin(tokio::time::sleep(Duration::from_secs(60)));
        let src = StopSource::new();
        let tok = src.token();
        src.request_stop();
        let result = timeout(slow, Duration::from_secs(60), tok).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
