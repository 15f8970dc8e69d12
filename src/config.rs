//! Connection configuration (ambient stack: "Configuration"). Split into
//! a connection-parameters type and a timeout-knobs type layered on top of
//! it: this crate consumes an already-resolved set of parameters rather
//! than parsing a `mongodb://` URI itself — URI parsing is an external
//! collaborator's job, not this crate's.
//!
//! There is deliberately no pool-size knob here: min/max pool size, max
//! idle time and max connecting are all out of scope (the pool dials
//! unboundedly and never blocks a checkout on a size limit).

use std::sync::Arc;
use std::time::Duration;

/// Where and how to reach one server.
#[derive(Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// An explicit TLS client configuration (pinned CA, client certs, ...).
    /// When `tls` is set and this is `None`, the pool falls back to
    /// [`crate::tls::default_tls_config`] (the platform trust store).
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    pub app_name: Option<String>,
}

impl ConnectParams {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, tls: false, tls_config: None, app_name: None }
    }

    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Enables TLS with an explicit client configuration instead of the
    /// default platform trust store.
    #[must_use]
    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = true;
        self.tls_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("tls_config", &self.tls_config.as_ref().map(|_| "<set>"))
            .field("app_name", &self.app_name)
            .finish()
    }
}

/// Timeout knobs layered on top of [`ConnectParams`], threaded through to
/// [`crate::pool::Pool::dial`].
#[derive(Clone, Debug)]
pub struct ConnectionConfiguration {
    pub params: ConnectParams,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ConnectionConfiguration {
    #[must_use]
    pub fn new(params: ConnectParams) -> Self {
        Self {
            params,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_defaults_are_sane() {
        let cfg = ConnectionConfiguration::new(ConnectParams::new("localhost", 27017));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert!(!cfg.params.tls);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let params = ConnectParams::new("db.example.com", 27017).with_tls(true).with_app_name("svc");
        let cfg = ConnectionConfiguration::new(params).with_connect_timeout(Duration::from_secs(1));
        assert!(cfg.params.tls);
        assert_eq!(cfg.params.app_name.as_deref(), Some("svc"));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn with_tls_config_also_flips_the_tls_flag() {
        // A minimal config with no roots at all is enough to exercise the
        // builder wiring; it is never used to actually connect here.
        let config = Arc::new(rustls::ClientConfig::builder().with_root_certificates(rustls::RootCertStore::empty()).with_no_client_auth());
        let params = ConnectParams::new("db.example.com", 27017).with_tls_config(config);
        assert!(params.tls);
        assert!(params.tls_config.is_some());
    }
}
