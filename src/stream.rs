//! Managed long-lived stream connection with reconnect.
//!
//! One connection lives in the stream slot. When the stream logic fails the
//! manager waits `stream_backoff`, dials a replacement and swaps it in, then
//! lets the logic run again, up to `stream_retry` reconnects.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::StreamError;
use crate::transport::{Connection, Connector};
use crate::utils::retry::stream_backoff;

/// Owner of the single stream connection.
///
/// The slot lock is held only to read or replace the handle, never across
/// the stream logic or a dial. Meant for one stream caller at a time:
/// concurrent callers stay memory-safe but reconnect independently.
pub struct StreamManager<K: Connector> {
    connector: K,
    address: String,
    slot: Mutex<Option<K::Conn>>,
    dial_timeout: Duration,
    max_reconnects: u32,
    reconnect_delay: Duration,
}

impl<K: Connector> StreamManager<K> {
    /// Take ownership of an already-dialed stream connection.
    pub fn new(
        connector: K,
        address: impl Into<String>,
        conn: K::Conn,
        dial_timeout: Duration,
        max_reconnects: u32,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            address: address.into(),
            slot: Mutex::new(Some(conn)),
            dial_timeout,
            max_reconnects,
            reconnect_delay,
        }
    }

    /// The connector shared by every reconnect.
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Clone of the current stream connection. `None` once closed.
    pub async fn current(&self) -> Option<K::Conn> {
        self.slot.lock().await.clone()
    }

    /// Run `logic` until it returns `Ok`, reconnecting after each failure.
    pub async fn run<E, F, Fut>(&self, logic: F) -> Result<(), StreamError<E>>
    where
        E: Display,
        F: FnMut(CallContext, K::Conn) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.run_until(None, logic).await
    }

    /// Like [`run`](Self::run), stopping with `StreamError::Cancelled` once
    /// `token` fires. Cancellation aborts the running logic or the reconnect
    /// delay; an in-flight dial is bounded by the dial timeout instead.
    pub async fn run_with_cancellation<E, F, Fut>(
        &self,
        token: CancellationToken,
        logic: F,
    ) -> Result<(), StreamError<E>>
    where
        E: Display,
        F: FnMut(CallContext, K::Conn) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.run_until(Some(token), logic).await
    }

    async fn run_until<E, F, Fut>(
        &self,
        token: Option<CancellationToken>,
        mut logic: F,
    ) -> Result<(), StreamError<E>>
    where
        E: Display,
        F: FnMut(CallContext, K::Conn) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let token = token.unwrap_or_default();
        let mut delays = stream_backoff(self.reconnect_delay, self.max_reconnects);
        let mut attempt: u32 = 0;

        loop {
            let conn = self.current().await.ok_or(StreamError::Closed)?;
            let ctx = CallContext::with_cancellation(token.child_token());

            let err = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StreamError::Cancelled),
                result = logic(ctx, conn) => match result {
                    Ok(()) => {
                        debug!(address = %self.address, attempt, "Stream finished");
                        return Ok(());
                    }
                    Err(e) => e,
                },
            };

            let Some(delay) = delays.next() else {
                warn!(
                    address = %self.address,
                    attempts = attempt,
                    error = %err,
                    "Stream reconnects exhausted"
                );
                return Err(StreamError::ReconnectsExhausted {
                    attempts: attempt,
                    last: err,
                });
            };

            attempt += 1;
            warn!(
                address = %self.address,
                attempt,
                max_reconnects = self.max_reconnects,
                error = %err,
                delay = ?delay,
                "Stream failed, reconnecting"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StreamError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.connector.dial(&self.address, self.dial_timeout).await {
                Ok(fresh) => {
                    if !self.swap(fresh).await {
                        return Err(StreamError::Closed);
                    }
                    info!(address = %self.address, attempt, "Stream connection replaced");
                }
                Err(dial_err) => {
                    // The existing connection is reused for the next cycle.
                    warn!(
                        address = %self.address,
                        attempt,
                        error = %dial_err,
                        "Stream reconnect dial failed, keeping current connection"
                    );
                }
            }
        }
    }

    /// Install `fresh` and close the handle it displaced.
    ///
    /// Returns false, closing `fresh`, if the manager was closed meanwhile.
    async fn swap(&self, fresh: K::Conn) -> bool {
        let old = {
            let mut slot = self.slot.lock().await;
            match slot.as_mut() {
                Some(current) => std::mem::replace(current, fresh),
                None => {
                    fresh.close();
                    return false;
                }
            }
        };
        old.close();
        true
    }

    /// Close the stream connection. Later runs fail with `StreamError::Closed`.
    pub async fn close(&self) {
        if let Some(conn) = self.slot.lock().await.take() {
            conn.close();
        }
    }
}
