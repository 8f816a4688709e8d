//! Connection info for node agent (kubelet) traffic.
//!
//! Requests to the agent's well-known port go through a transport this module
//! builds once from [`KubeletConfig`]; the resolver never picks the scheme or
//! port for those requests itself.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use regis_core::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Well-known port the node agent serves on.
pub const KUBELET_PORT: u16 = 10250;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// An HTTP transport a proxied request can be sent through.
pub trait RoundTripper: Send + Sync + fmt::Debug {
    /// Scheme the transport speaks: `https` when it carries TLS material.
    fn scheme(&self) -> &'static str;
    fn timeout(&self) -> Duration;
}

pub type SharedTransport = Arc<dyn RoundTripper>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsClientConfig {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl TlsClientConfig {
    /// A client certificate and its key come as a pair.
    pub fn check(&self) -> RegistryResult<()> {
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) | (None, Some(_)) => {
                Err(RegistryError::Internal("kubelet TLS cert_file and key_file must be set together".to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransport {
    tls: Option<TlsClientConfig>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn plain(timeout: Duration) -> Self { Self { tls: None, timeout } }

    pub fn with_tls(tls: TlsClientConfig, timeout: Duration) -> Self { Self { tls: Some(tls), timeout } }

    pub fn tls(&self) -> Option<&TlsClientConfig> { self.tls.as_ref() }
}

impl Default for HttpTransport {
    fn default() -> Self { Self::plain(DEFAULT_TIMEOUT) }
}

impl RoundTripper for HttpTransport {
    fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "https" } else { "http" }
    }

    fn timeout(&self) -> Duration { self.timeout }
}

/// Authoritative `(scheme, port, transport)` for reaching the agent on a host.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub scheme: String,
    pub port: u16,
    pub transport: SharedTransport,
}

pub trait ConnectionInfoGetter: Send + Sync {
    fn get_connection_info(&self, host: &str) -> RegistryResult<ConnectionInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeletConfig {
    pub port: u16,
    pub enable_https: bool,
    pub tls: TlsClientConfig,
    pub timeout: Duration,
}

impl Default for KubeletConfig {
    fn default() -> Self {
        Self { port: KUBELET_PORT, enable_https: true, tls: TlsClientConfig::default(), timeout: DEFAULT_TIMEOUT }
    }
}

impl KubeletConfig {
    /// Defaults overlaid with `REGIS_KUBELET_*` environment variables.
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Like [`from_env`](Self::from_env) over an arbitrary lookup; unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: FromStr>(raw: Option<String>) -> Option<T> { raw.and_then(|s| s.trim().parse().ok()) }

        let mut cfg = Self::default();
        if let Some(port) = parse(lookup("REGIS_KUBELET_PORT")) {
            cfg.port = port;
        }
        if let Some(https) = parse(lookup("REGIS_KUBELET_HTTPS")) {
            cfg.enable_https = https;
        }
        if let Some(secs) = parse::<u64>(lookup("REGIS_KUBELET_TIMEOUT_SECS")) {
            cfg.timeout = Duration::from_secs(secs);
        }
        let path = |key: &str| lookup(key).filter(|s| !s.is_empty()).map(PathBuf::from);
        cfg.tls.ca_file = path("REGIS_KUBELET_CA_FILE");
        cfg.tls.cert_file = path("REGIS_KUBELET_CERT_FILE");
        cfg.tls.key_file = path("REGIS_KUBELET_KEY_FILE");
        cfg
    }
}

/// Connection-info provider backed by one shared HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpKubeletClient {
    config: KubeletConfig,
    transport: SharedTransport,
}

impl HttpKubeletClient {
    pub fn new(config: KubeletConfig) -> RegistryResult<Self> {
        config.tls.check()?;
        let transport: SharedTransport = if config.enable_https {
            Arc::new(HttpTransport::with_tls(config.tls.clone(), config.timeout))
        } else {
            Arc::new(HttpTransport::plain(config.timeout))
        };
        debug!(port = config.port, https = config.enable_https, "kubelet client ready");
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &KubeletConfig { &self.config }

    pub fn transport(&self) -> SharedTransport { Arc::clone(&self.transport) }
}

impl ConnectionInfoGetter for HttpKubeletClient {
    fn get_connection_info(&self, host: &str) -> RegistryResult<ConnectionInfo> {
        debug!(host = %host, port = self.config.port, "kubelet connection info");
        Ok(ConnectionInfo {
            scheme: self.transport.scheme().to_string(),
            port: self.config.port,
            transport: Arc::clone(&self.transport),
        })
    }
}
