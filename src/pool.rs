//! Connection pool (component M): a mutex-protected idle freelist with
//! lazy checkout and error-driven eviction.
//!
//! Built around an `Arc<Mutex<..>>`-shared idle list rather than on
//! `r2d2`: `r2d2::ManageConnection` is a synchronous trait
//! (`connect`/`is_valid`/`has_broken` all take `&Self::Connection` by
//! blocking call), which cannot express "hand back a connection to a
//! single-threaded async event loop" without a thread per checkout. Instead
//! this pool keeps idle connections in a `tokio::sync::Mutex<Vec<_>>` and
//! lets checkout itself be the async operation.
//!
//! Pool size is intentionally unbounded: min/max pool size, max idle time
//! and max connecting are all out of scope, so `checkout` dials a fresh
//! connection any time the idle list is empty rather than waiting on a
//! permit.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::async_core::{let_value, then, timeout as async_timeout, StopToken, Task};
use crate::config::ConnectionConfiguration;
use crate::error::{Error, Result};
use crate::handshake::{build_hello_command, parse_hello_reply, ServerDescription};
use crate::wire::{read_message, write_message, OpMsg, RequestIdSource};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live, handshaken connection. Perishes (is dropped rather than
/// returned to the idle list) the moment any operation on it errors, since
/// this crate does not attempt mid-stream protocol resynchronization.
pub struct PooledConnection {
    stream: crate::tls::Stream,
    /// Stable for the lifetime of the underlying socket — unchanged across
    /// repeated checkout/return cycles, only incrementing when a fresh
    /// connection is dialed.
    pub connection_id: u64,
    pub description: ServerDescription,
    request_ids: Arc<RequestIdSource>,
    perished: bool,
}

impl PooledConnection {
    async fn handshake(mut stream: crate::tls::Stream, app_name: Option<&str>) -> Result<Self> {
        trace!("handshake(): sending hello");
        let request_ids = Arc::new(RequestIdSource::new());
        let hello = build_hello_command(app_name);
        let request_id = request_ids.next_id();
        write_message(&mut stream, &OpMsg::new(hello), request_id, 0).await?;
        let (header, reply) = read_message(&mut stream).await?;
        if header.response_to != request_id {
            return Err(Error::Protocol("hello reply did not answer the hello request"));
        }
        let description = parse_hello_reply(&reply.body)?;
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "handshake(): connection {connection_id}, max_wire_version {}, read_only {}",
            description.max_wire_version, description.read_only
        );
        Ok(Self { stream, connection_id, description, request_ids, perished: false })
    }

    /// Sends `command` and waits for its reply, marking this connection
    /// perished if anything goes wrong so it is never returned to the pool.
    pub async fn run_command(&mut self, command: OpMsg) -> Result<OpMsg> {
        let result = self.run_command_inner(command).await;
        if let Err(ref e) = result {
            warn!("run_command(): connection {} perished: {e} (status {})", self.connection_id, e.status());
            self.perished = true;
        }
        result
    }

    async fn run_command_inner(&mut self, command: OpMsg) -> Result<OpMsg> {
        let request_id = self.request_ids.next_id();
        write_message(&mut self.stream, &command, request_id, 0).await?;
        let (header, reply) = read_message(&mut self.stream).await?;
        if header.response_to != request_id {
            return Err(Error::Protocol("reply did not answer the request that was sent"));
        }
        Ok(reply)
    }

    #[must_use]
    pub fn is_perished(&self) -> bool {
        self.perished
    }
}

struct Target {
    host: String,
    port: u16,
}

/// An unbounded pool of handshaken connections to one server.
///
/// Checkout is lazy: a pool starts with zero live connections and dials a
/// fresh one on demand whenever the idle list is empty; there is no cap on
/// how many connections may be outstanding at once.
pub struct Pool {
    target: Target,
    app_name: Option<String>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    idle: Mutex<Vec<PooledConnection>>,
}

impl Pool {
    /// Builds a pool from a resolved [`ConnectionConfiguration`]. Fails only
    /// if TLS is requested without an explicit `tls_config` and the
    /// platform trust store can't be loaded.
    pub fn new(config: ConnectionConfiguration) -> Result<Self> {
        let ConnectionConfiguration { params, connect_timeout, handshake_timeout } = config;
        let tls_config = if params.tls {
            match params.tls_config {
                Some(cfg) => Some(cfg),
                None => Some(crate::tls::default_tls_config()?),
            }
        } else {
            None
        };
        Ok(Self {
            target: Target { host: params.host, port: params.port },
            app_name: params.app_name,
            tls_config,
            connect_timeout,
            handshake_timeout,
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Checks out a connection, reusing an idle one if available or dialing
    /// and handshaking a fresh one otherwise. Never waits on a size limit.
    pub async fn checkout(&self) -> Result<CheckedOut<'_>> {
        let existing = self.idle.lock().await.pop();
        let conn = match existing {
            Some(conn) => conn,
            None => self.dial().await?,
        };
        Ok(CheckedOut { pool: self, conn: Some(conn) })
    }

    /// Resolves the target, connects (racing a deadline), optionally
    /// upgrades to TLS, and runs the `hello` handshake (racing its own
    /// deadline) — composed through the async kernel's `let_value`/`then`
    /// rather than a flat `async fn` chain, so an error at any stage
    /// short-circuits the rest without the caller needing to inspect which
    /// stage failed.
    async fn dial(&self) -> Result<PooledConnection> {
        trace!("dial(): connecting to {}:{}", self.target.host, self.target.port);

        let host = self.target.host.clone();
        let port = self.target.port;
        let resolve_task: Task<Result<SocketAddr>> = Box::pin(async move { crate::event_loop::resolve(&host, port).await });

        let connect_timeout = self.connect_timeout;
        let connect_task: Task<Result<TcpStream>> = let_value(resolve_task, 0, move |addr_result| {
            Box::pin(async move {
                let addr = addr_result?;
                let connect_fut: Task<Result<TcpStream>> = Box::pin(crate::event_loop::connect(addr));
                async_timeout(connect_fut, connect_timeout, StopToken::default()).await.and_then(|inner| inner)
            })
        });

        let tls_config = self.tls_config.clone();
        let host_for_tls = self.target.host.clone();
        let app_name = self.app_name.clone();
        let handshake_timeout = self.handshake_timeout;
        let handshake_task: Task<Result<PooledConnection>> = let_value(connect_task, 0, move |tcp_result| {
            Box::pin(async move {
                let tcp = tcp_result?;
                let stream = match tls_config {
                    Some(cfg) => crate::tls::Stream::upgrade(tcp, cfg, &host_for_tls).await?,
                    None => crate::tls::Stream::Plain(tcp),
                };
                let handshake_fut: Task<Result<PooledConnection>> =
                    Box::pin(async move { PooledConnection::handshake(stream, app_name.as_deref()).await });
                async_timeout(handshake_fut, handshake_timeout, StopToken::default()).await.and_then(|inner| inner)
            })
        });

        let logged = then(handshake_task, 0, |result: Result<PooledConnection>| {
            match &result {
                Ok(conn) => debug!("dial(): connection {} ready (wire version {})", conn.connection_id, conn.description.max_wire_version),
                Err(e) => warn!("dial(): failed with status {}", e.status()),
            }
            result
        });
        logged.await
    }

    async fn release(&self, conn: PooledConnection) {
        if conn.is_perished() {
            return;
        }
        self.idle.lock().await.push(conn);
    }

    #[must_use]
    pub fn idle_count_blocking(&self) -> usize {
        self.idle.blocking_lock().len()
    }
}

/// An RAII checkout: returns its connection to the pool's idle list on
/// drop, unless the connection perished while checked out.
pub struct CheckedOut<'a> {
    pool: &'a Pool,
    conn: Option<PooledConnection>,
}

impl<'a> std::ops::Deref for CheckedOut<'a> {
    type Target = PooledConnection;
    fn deref(&self) -> &PooledConnection {
        self.conn.as_ref().expect("conn is only None after drop")
    }
}

impl<'a> std::ops::DerefMut for CheckedOut<'a> {
    fn deref_mut(&mut self) -> &mut PooledConnection {
        self.conn.as_mut().expect("conn is only None after drop")
    }
}

impl<'a> Drop for CheckedOut<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Dropping a future without awaiting it is fine here: `release`
            // only acquires an uncontended mutex and pushes, so spawning is
            // unnecessary ceremony for code that must run synchronously
            // from `drop`. `try_lock` degrades gracefully under contention
            // by simply not returning the connection to the pool — no
            // different from dropping it on a perish.
            if !conn.is_perished() {
                if let Ok(mut idle) = self.pool.idle.try_lock() {
                    idle.push(conn);
                }
            }
        }
    }
}

// `release` is kept for callers that can await (and therefore can tolerate
// lock contention) instead of relying on `Drop`'s best-effort `try_lock`.
impl Pool {
    pub async fn checkin(&self, conn: PooledConnection) {
        self.release(conn).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bson::{Document, Value};
    use crate::config::ConnectParams;

    fn local_config(addr: SocketAddr) -> ConnectionConfiguration {
        ConnectionConfiguration::new(ConnectParams::new(addr.ip().to_string(), addr.port()))
    }

    #[test]
    fn new_pool_starts_with_no_idle_connections() {
        let pool = Pool::new(local_config("127.0.0.1:27017".parse().unwrap())).unwrap();
        assert_eq!(pool.idle_count_blocking(), 0);
    }

    fn sample_hello_reply() -> Document {
        let mut d = Document::empty();
        let mut m = d.mutator();
        m.append("ok", &Value::Double(1.0)).unwrap();
        m.append("isWritablePrimary", &Value::Bool(true)).unwrap();
        m.append("maxBsonObjectSize", &Value::Int32(16_777_216)).unwrap();
        m.append("maxMessageSizeBytes", &Value::Int32(48_000_000)).unwrap();
        m.append("minWireVersion", &Value::Int32(0)).unwrap();
        m.append("maxWireVersion", &Value::Int32(17)).unwrap();
        drop(m);
        d
    }

    // Exercises the exact request/reply shape `PooledConnection::handshake`
    // drives, over an in-memory duplex pair instead of a live `mongod`
    // socket: a fake server task reads the `hello` request and answers it.
    #[tokio::test]
    async fn handshake_roundtrip_over_in_memory_stream() {
        let _ = flexi_logger::Logger::try_with_str("trace").and_then(flexi_logger::Logger::start);
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            let (header, request) = read_message(&mut server).await.unwrap();
            let view = request.body.view();
            assert!(view.get("hello").unwrap().is_some());
            let reply = OpMsg::new(sample_hello_reply());
            write_message(&mut server, &reply, header.request_id + 1, header.request_id).await.unwrap();
        });

        let request_ids = RequestIdSource::new();
        let hello = build_hello_command(Some("test-app"));
        let request_id = request_ids.next_id();
        write_message(&mut client, &OpMsg::new(hello), request_id, 0).await.unwrap();
        let (header, reply) = read_message(&mut client).await.unwrap();
        assert_eq!(header.response_to, request_id);
        let description = parse_hello_reply(&reply.body).unwrap();
        assert_eq!(description.max_wire_version, 17);
        assert!(!description.read_only);

        server_task.await.unwrap();
    }

    /// A minimal loopback `mongod` double: answers every connection's
    /// first message (the handshake's `hello`) with a canned reply, the
    /// same shape `sample_hello_reply` builds. Used for the pool-level
    /// tests below, which — unlike the unit tests elsewhere in this
    /// crate — exercise `Pool::dial` through the real `event_loop`
    /// resolve/connect path rather than an in-memory stream double, since
    /// `dial` now resolves and connects for real instead of taking an
    /// injectable stream.
    async fn spawn_fake_mongod() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    if let Ok((header, _request)) = read_message(&mut sock).await {
                        let reply = OpMsg::new(sample_hello_reply());
                        let _ = write_message(&mut sock, &reply, header.request_id + 1, header.request_id).await;
                    }
                });
            }
        });
        addr
    }

    // Scenario H: on two sequential checkout/return pairs, the second
    // checkout returns the same underlying member as the first, observed
    // by stable connection id.
    #[tokio::test]
    async fn sequential_checkout_return_reuses_the_same_connection() {
        let addr = spawn_fake_mongod().await;
        let pool = Pool::new(local_config(addr)).unwrap();

        let first_id = pool.checkout().await.unwrap().connection_id;
        assert_eq!(pool.idle_count_blocking(), 1);
        let second_id = pool.checkout().await.unwrap().connection_id;

        assert_eq!(first_id, second_id);
        assert_eq!(pool.idle_count_blocking(), 1);
    }

    // Invariant 11: after N checkouts and returns with no failures, the
    // pool holds at most `max(concurrent_in_flight)` idle members.
    #[tokio::test]
    async fn idle_list_never_grows_past_peak_concurrent_checkouts() {
        let addr = spawn_fake_mongod().await;
        let pool = Pool::new(local_config(addr)).unwrap();

        let a = pool.checkout().await.unwrap();
        let b = pool.checkout().await.unwrap();
        let c = pool.checkout().await.unwrap();
        assert_eq!(pool.idle_count_blocking(), 0);
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.idle_count_blocking(), 3);

        for _ in 0..5 {
            let _conn = pool.checkout().await.unwrap();
        }
        assert_eq!(pool.idle_count_blocking(), 3);
    }

    // A perished connection is dropped rather than reinserted, so the idle
    // list does not grow from failed checkouts.
    #[tokio::test]
    async fn perished_connection_is_never_reinserted() {
        let addr = spawn_fake_mongod().await;
        let pool = Pool::new(local_config(addr)).unwrap();

        let mut conn = pool.checkout().await.unwrap();
        // The fake server only answers the handshake's hello and then lets
        // the socket go idle, so a further command never gets a reply and
        // the read side errors out — perishing the connection.
        let bogus = OpMsg::new(Document::empty());
        let _ = conn.run_command(bogus).await;
        assert!(conn.is_perished());
        drop(conn);

        assert_eq!(pool.idle_count_blocking(), 0);
    }
}
