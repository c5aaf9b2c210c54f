//! Wrapper client: a short call pool plus one managed stream connection.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{info, warn};

use crate::call;
use crate::config::Config;
use crate::context::CallContext;
use crate::error::{CallError, Result, StreamError, WrapperError};
use crate::pool::ConnectionPool;
use crate::stream::StreamManager;
use crate::transport::{Connector, DialOptions, TonicConnector};
use crate::utils::retry::StatusSource;

/// Client-side resilience layer in front of one gRPC service.
///
/// Short calls are spread round-robin over `pool_size` pre-dialed
/// connections and retried on transient failures. Long-lived streams run on
/// a separate connection that is replaced when the stream logic fails.
///
/// The client is `Send + Sync`; share it behind an `Arc`.
pub struct WrapperClient<K: Connector = TonicConnector> {
    address: String,
    config: Config,
    pool: ConnectionPool<K::Conn>,
    stream: StreamManager<K>,
    closed: AtomicBool,
}

impl WrapperClient<TonicConnector> {
    /// Connect over plaintext with tonic's default transport settings.
    pub async fn connect(address: impl Into<String>, config: Config) -> Result<Self> {
        Self::connect_with_options(address, config, DialOptions::default()).await
    }

    /// Connect with explicit dial options, shared by every dial.
    pub async fn connect_with_options(
        address: impl Into<String>,
        config: Config,
        options: DialOptions,
    ) -> Result<Self> {
        Self::with_connector(address, config, TonicConnector::new(options)).await
    }
}

impl<K: Connector> WrapperClient<K> {
    /// Validate `config`, then dial `pool_size` short call connections and
    /// the stream connection, one after the other.
    ///
    /// The first failed dial aborts construction. Nothing is retried here;
    /// connections opened before the failure are closed.
    #[tracing::instrument(
        name = "grpc.connect",
        skip_all,
        fields(address = tracing::field::Empty, pool_size = config.pool_size)
    )]
    pub async fn with_connector(
        address: impl Into<String>,
        config: Config,
        connector: K,
    ) -> Result<Self> {
        let address = address.into();
        tracing::Span::current().record("address", address.as_str());
        config.validate()?;

        let pool =
            ConnectionPool::build(&connector, &address, config.pool_size, config.dial_timeout)
                .await?;

        let stream_conn = match connector.dial(&address, config.dial_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(address = %address, error = %e, "Stream connection failed, closing pool");
                pool.close_all().await;
                return Err(WrapperError::StreamDial(e));
            }
        };

        let stream = StreamManager::new(
            connector,
            address.clone(),
            stream_conn,
            config.dial_timeout,
            config.stream_retry,
            config.stream_backoff,
        );

        info!(
            address = %address,
            pool_size = config.pool_size,
            "Wrapper client connected"
        );

        Ok(Self {
            address,
            config,
            pool,
            stream,
            closed: AtomicBool::new(false),
        })
    }

    /// Run a short call with retries and no caller deadline.
    ///
    /// `call` receives a per-attempt context and a pool connection. Use
    /// [`CallContext::request`] to propagate the attempt deadline.
    pub async fn short_call<T, E, F, Fut>(&self, call: F) -> std::result::Result<T, CallError<E>>
    where
        E: StatusSource + From<Status> + Display,
        F: FnMut(CallContext, K::Conn) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.short_call_with_context(&CallContext::background(), call)
            .await
    }

    /// Run a short call under a caller context.
    ///
    /// Each attempt's deadline is the earlier of the caller deadline and a
    /// fresh `call_timeout`; cancelling the caller token aborts the running
    /// attempt.
    #[tracing::instrument(name = "grpc.short_call", skip_all, fields(address = %self.address))]
    pub async fn short_call_with_context<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        call: F,
    ) -> std::result::Result<T, CallError<E>>
    where
        E: StatusSource + From<Status> + Display,
        F: FnMut(CallContext, K::Conn) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if self.is_closed() {
            return Err(CallError::Closed);
        }
        call::execute(&self.pool, &self.config, ctx, call).await
    }

    /// Run long-lived stream logic, reconnecting after each failure up to
    /// `stream_retry` times. Returns once the logic returns `Ok`.
    #[tracing::instrument(name = "grpc.stream_call", skip_all, fields(address = %self.address))]
    pub async fn stream_call<E, F, Fut>(&self, logic: F) -> std::result::Result<(), StreamError<E>>
    where
        E: Display,
        F: FnMut(CallContext, K::Conn) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
    {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.stream.run(logic).await
    }

    /// [`stream_call`](Self::stream_call) that gives up once `token` is
    /// cancelled. The token reaches the logic through its context.
    #[tracing::instrument(name = "grpc.stream_call", skip_all, fields(address = %self.address))]
    pub async fn stream_call_with_cancellation<E, F, Fut>(
        &self,
        token: CancellationToken,
        logic: F,
    ) -> std::result::Result<(), StreamError<E>>
    where
        E: Display,
        F: FnMut(CallContext, K::Conn) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
    {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        self.stream.run_with_cancellation(token, logic).await
    }

    /// Release every pool connection and the stream connection.
    ///
    /// Best-effort and idempotent: only the first call closes anything.
    /// Later calls on the client fail with `Closed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.close_all().await;
        self.stream.close().await;
        info!(address = %self.address, "Wrapper client closed");
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Target address shared by every dial.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of pooled short call connections.
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// The connector used for stream reconnects.
    pub fn connector(&self) -> &K {
        self.stream.connector()
    }
}
