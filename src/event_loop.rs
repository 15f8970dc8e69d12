//! Single-threaded cooperative event loop facade (component I): owns a
//! current-thread `tokio` runtime and the handful of primitive operations
//! (`connect`, `resolve`, `schedule_later`) the rest of the crate is built
//! on, so nothing outside this module names `tokio` directly except the
//! TLS adapter, which needs `tokio::io::{AsyncRead, AsyncWrite}` to
//! interoperate with `tokio-rustls`.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::runtime::{Builder, Runtime};

use crate::error::{Error, Result};

/// Owns the runtime driving every connection, handshake, and pool wait in a
/// `Client`. One `EventLoop` per `Client`; never shared across threads.
pub struct EventLoop {
    runtime: Runtime,
}

impl EventLoop {
    /// Builds a new single-threaded runtime with the timer and I/O drivers
    /// enabled (the only drivers this crate needs).
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_io().enable_time().build().map_err(Error::Io)?;
        Ok(Self { runtime })
    }

    /// Blocks the calling thread running `future` to completion — the
    /// crate's only synchronous entry point, used once at the top of a
    /// program to drive the otherwise-fully-async client.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Schedules `future` to run concurrently with the caller, without
    /// blocking on it. Equivalent to [`crate::async_core::spawn`] but kept
    /// here too since a caller with only an `EventLoop` handle (no
    /// `async_core` import) still needs to fan work out.
    pub fn schedule<T>(&self, future: impl Future<Output = T> + Send + 'static) -> crate::async_core::JoinedTask<T>
    where
        T: Send + 'static,
    {
        let _guard = self.runtime.enter();
        crate::async_core::spawn(future)
    }

    /// Resolves `host:port` to a concrete socket address. Delegates to the
    /// free function [`resolve`], which callers without an `EventLoop`
    /// handle (e.g. [`crate::pool::Pool::dial`], which owns no runtime of
    /// its own and runs on whichever one it's `.await`ed from) can call
    /// directly.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        resolve(host, port).await
    }
}

/// Resolves `host:port` to a concrete socket address, taking the first
/// result (this crate connects to a single address per attempt; retry
/// across addresses is the pool's job, not the resolver's).
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port)).await.map_err(Error::Io)?;
    addrs.next().ok_or(Error::Protocol("DNS resolution returned no addresses"))
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new().expect("building a current-thread tokio runtime should not fail")
    }
}

/// Opens a plain TCP connection to `addr`. Callers that need TLS layer
/// [`crate::tls`] on top of the returned stream.
pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    TcpStream::connect(addr).await.map_err(Error::Io)
}

/// Sleeps for `duration`. The building block `async_core::timeout` races
/// against.
pub async fn schedule_later(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn run_drives_a_future_to_completion() {
        let ev = EventLoop::new().unwrap();
        let value = ev.run(async { 1 + 1 });
        assert_eq!(value, 2);
    }

    #[test]
    fn resolve_localhost() {
        let ev = EventLoop::new().unwrap();
        let addr = ev.run(ev.resolve("localhost", 27017)).unwrap();
        assert_eq!(addr.port(), 27017);
    }
}
