//! Coroutine-to-`Future` bridge: turns a spawned task into an awaitable
//! handle that also carries a cancellation switch, rather than the
//! fire-and-forget `detach()` in [`super::emitter`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// A spawned task plus the ability to request it stop before it finishes.
/// Awaiting `JoinedTask` waits for completion; dropping it detaches (the
/// task keeps running) — call [`JoinedTask::abort`] to actually stop it.
pub struct JoinedTask<T> {
    handle: JoinHandle<T>,
}

/// Spawns `future` onto the runtime and returns a handle that can be
/// awaited for its result or aborted before completion.
pub fn spawn<T>(future: impl Future<Output = T> + Send + 'static) -> JoinedTask<T>
where
    T: Send + 'static,
{
    JoinedTask { handle: tokio::spawn(future) }
}

impl<T> JoinedTask<T> {
    /// Requests the underlying task stop at its next await point. Already
    /// running poll is not preempted; this is cooperative like
    /// [`super::emitter::StopToken`].
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for JoinedTask<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.handle).poll(cx).map(|r| {
            r.map_err(|e| if e.is_cancelled() { Error::Cancelled } else { Error::Validation(e.to_string()) })
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn spawned_task_resolves_with_its_value() {
        let t = spawn(async { 42 });
        assert_eq!(t.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn aborted_task_surfaces_cancelled() {
        let t = spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        t.abort();
        let result = t.await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
