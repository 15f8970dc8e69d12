//! TLS stream adapter (component K): wraps a plain `TcpStream` or a
//! `tokio-rustls` client stream behind one type so the rest of the crate
//! (wire framing, handshake, pool) is written against a single `Stream`
//! type regardless of whether TLS is in use.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::{Error, Result};

/// Either half of a connection: plaintext, or TLS-wrapped. `read_some`/
/// `write_some` (via `AsyncRead`/`AsyncWrite`) behave identically either
/// way — only `connect` differs.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    /// Wraps an already-connected `tcp` socket in TLS, validating the peer
    /// certificate against `name`.
    pub async fn upgrade(tcp: TcpStream, config: Arc<rustls::ClientConfig>, name: &str) -> Result<Self> {
        let server_name = ServerName::try_from(name.to_owned()).map_err(Error::TlsInvalidName)?;
        let connector = TlsConnector::from(config);
        let tls = connector.connect(server_name, tcp).await.map_err(Error::Io)?;
        Ok(Stream::Tls(Box::new(tls)))
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Builds a `rustls::ClientConfig` trusting the platform's native roots.
/// Certificate-verification overlap with the handshake's own timeout is the
/// caller's concern (wrap `Stream::upgrade` in [`crate::async_core::timeout`]).
pub fn default_tls_config() -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        warn!("default_tls_config(): skipping an unreadable native certificate: {err}");
    }
    for cert in loaded.certs {
        roots.add(cert).map_err(Error::Tls)?;
    }
    if roots.len() == 0 {
        return Err(Error::Validation("no native root certificates could be loaded".to_owned()));
    }
    let config = rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    Ok(Arc::new(config))
}
