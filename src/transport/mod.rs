//! Transport handles and the dial path.
//!
//! The pool and the stream manager only see the [`Connection`] and
//! [`Connector`] traits. [`TonicConnector`] dials tonic channels over:
//! - TCP: `host:port` or full `http(s)://` URIs
//! - UDS: `/path`, `./path` or `unix:///path`

use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};
use tower::service_fn;
use tracing::debug;

use crate::error::DialError;

/// An opaque, cheaply cloneable handle to one transport connection.
///
/// Clones share the underlying connection. `close` is best-effort and never
/// fails.
pub trait Connection: Clone + Send + Sync + 'static {
    /// Release the connection.
    fn close(&self);
}

/// A tonic channel shuts down once its last clone is dropped. Owners drop
/// the handle right after closing it: the pool drains on close and the
/// stream slot is emptied or swapped.
impl Connection for Channel {
    fn close(&self) {
        debug!("Releasing gRPC channel");
    }
}

/// Dial path shared by pool construction and stream reconnects.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Conn: Connection;

    /// Establish a connection to `address`, giving up after `timeout`.
    async fn dial(&self, address: &str, timeout: Duration) -> Result<Self::Conn, DialError>;
}

/// Transport parameters applied to every dial.
///
/// The default dials plaintext with tonic's defaults.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    tls: Option<ClientTlsConfig>,
    user_agent: Option<String>,
    keep_alive_interval: Option<Duration>,
    tcp_nodelay: Option<bool>,
    concurrency_limit: Option<usize>,
}

impl DialOptions {
    /// Dial with TLS.
    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the user agent sent with every request.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Send HTTP/2 keep-alive pings at this interval.
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// Set `TCP_NODELAY` on TCP connections.
    pub fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = Some(enabled);
        self
    }

    /// Limit in-flight requests per connection.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// The TLS config, if any.
    pub fn tls(&self) -> Option<&ClientTlsConfig> {
        self.tls.as_ref()
    }

    /// Build a tonic endpoint for `uri` with these options applied.
    fn endpoint(&self, uri: String, timeout: Duration) -> Result<Endpoint, DialError> {
        let invalid = |address: &str, e: tonic::transport::Error| DialError::InvalidAddress {
            address: address.to_string(),
            message: e.to_string(),
        };

        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| invalid(&uri, e))?
            .connect_timeout(timeout);

        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.clone()).map_err(|e| invalid(&uri, e))?;
        }
        if let Some(user_agent) = &self.user_agent {
            endpoint = endpoint
                .user_agent(user_agent.clone())
                .map_err(|e| invalid(&uri, e))?;
        }
        if let Some(interval) = self.keep_alive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        if let Some(nodelay) = self.tcp_nodelay {
            endpoint = endpoint.tcp_nodelay(nodelay);
        }
        if let Some(limit) = self.concurrency_limit {
            endpoint = endpoint.concurrency_limit(limit);
        }
        Ok(endpoint)
    }
}

/// Where an address points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// TCP endpoint URI.
    Tcp(String),
    /// Unix domain socket path.
    Uds(String),
}

/// Resolve an address string into a dial target.
///
/// `host:port` gets `http://`, or `https://` when `tls` is set.
pub fn resolve_target(address: &str, tls: bool) -> Target {
    if address.starts_with('/') || address.starts_with("./") {
        return Target::Uds(address.to_string());
    }
    if let Some(path) = address.strip_prefix("unix://") {
        return Target::Uds(path.to_string());
    }
    if address.contains("://") {
        return Target::Tcp(address.to_string());
    }
    let scheme = if tls { "https" } else { "http" };
    Target::Tcp(format!("{}://{}", scheme, address))
}

/// Connector producing tonic channels.
#[derive(Debug, Clone, Default)]
pub struct TonicConnector {
    options: DialOptions,
}

impl TonicConnector {
    /// Create a connector that applies `options` to every dial.
    pub fn new(options: DialOptions) -> Self {
        Self { options }
    }

    async fn connect(&self, address: &str, timeout: Duration) -> Result<Channel, DialError> {
        match resolve_target(address, self.options.tls.is_some()) {
            Target::Tcp(uri) => Ok(self.options.endpoint(uri, timeout)?.connect().await?),
            Target::Uds(path) => {
                // The URI doesn't matter for UDS, but tonic requires a valid one
                let channel = self
                    .options
                    .endpoint("http://[::]:50051".to_string(), timeout)?
                    .connect_with_connector(service_fn(move |_: Uri| {
                        let path = path.clone();
                        async move { UnixStream::connect(path).await.map(TokioIo::new) }
                    }))
                    .await?;
                Ok(channel)
            }
        }
    }
}

#[async_trait]
impl Connector for TonicConnector {
    type Conn = Channel;

    async fn dial(&self, address: &str, timeout: Duration) -> Result<Channel, DialError> {
        let channel = tokio::time::timeout(timeout, self.connect(address, timeout))
            .await
            .map_err(|_| DialError::Timeout(timeout))??;
        debug!(address = %address, "Dialed gRPC channel");
        Ok(channel)
    }
}
