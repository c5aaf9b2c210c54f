//! Fixed-size connection pool with round-robin selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::WrapperError;
use crate::transport::{Connection, Connector};

/// Pre-dialed connections shared by short calls.
///
/// The cursor always stays in `[0, len)`. Handles are never health-checked:
/// a connection that just failed is handed out again on its next turn.
/// [`close_all`](Self::close_all) drains the pool, after which `next`
/// yields nothing.
#[derive(Debug)]
pub struct ConnectionPool<C> {
    conns: RwLock<Vec<C>>,
    size: usize,
    cursor: AtomicUsize,
}

impl<C: Connection> ConnectionPool<C> {
    /// Dial `size` connections one after the other.
    ///
    /// The first failure closes the connections opened so far and aborts.
    pub async fn build<K>(
        connector: &K,
        address: &str,
        size: usize,
        dial_timeout: Duration,
    ) -> Result<Self, WrapperError>
    where
        K: Connector<Conn = C>,
    {
        let mut conns = Vec::with_capacity(size);
        for index in 0..size {
            match connector.dial(address, dial_timeout).await {
                Ok(conn) => {
                    debug!(address = %address, index, "Dialed short call connection");
                    conns.push(conn);
                }
                Err(source) => {
                    warn!(
                        address = %address,
                        index,
                        error = %source,
                        "Short call connection failed, closing {} opened",
                        conns.len()
                    );
                    conns.iter().for_each(|c| c.close());
                    return Err(WrapperError::PoolDial { index, source });
                }
            }
        }
        Ok(Self::from_connections(conns))
    }

    /// Wrap already-dialed connections.
    pub fn from_connections(conns: Vec<C>) -> Self {
        Self {
            size: conns.len(),
            conns: RwLock::new(conns),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of connections the pool was built with.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if the pool was built without connections.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Return the connection under the cursor and advance it.
    ///
    /// Returns `None` for an empty or closed pool.
    pub async fn next(&self) -> Option<C> {
        let conns = self.conns.read().await;
        let len = conns.len();
        if len == 0 {
            return None;
        }
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|i| i);
        conns.get(index).cloned()
    }

    /// Close and drop every pooled connection.
    ///
    /// Clones still held by in-flight calls keep their connection until
    /// those calls finish.
    pub async fn close_all(&self) {
        let conns = std::mem::take(&mut *self.conns.write().await);
        conns.iter().for_each(|c| c.close());
        debug!(closed = conns.len(), "Short call pool drained");
    }
}
