//! Test utilities and mock implementations.
//!
//! `MockConnector` hands out numbered `MockConnection`s and records every
//! dial and close so tests can assert on connection lifecycles without a
//! real server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tonic::{Code, Status};

use crate::error::DialError;
use crate::transport::{Connection, Connector};
use crate::utils::retry::StatusSource;

/// Connection handle identified by its dial number.
#[derive(Debug, Clone)]
pub struct MockConnection {
    pub id: usize,
    closes: Arc<AtomicUsize>,
}

impl MockConnection {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of live clones of this connection.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.closes)
    }
}

impl Connection for MockConnection {
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that records dials and can fail chosen dial numbers.
#[derive(Default)]
pub struct MockConnector {
    dials: AtomicUsize,
    failing: RwLock<HashSet<usize>>,
    connections: RwLock<Vec<MockConnection>>,
    timeouts: RwLock<Vec<Duration>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given dial numbers (0-based, counting every dial) fail.
    pub fn failing_dials(dials: &[usize]) -> Self {
        Self {
            failing: RwLock::new(dials.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Every connection handed out so far, in dial order.
    pub async fn connections(&self) -> Vec<MockConnection> {
        self.connections.read().await.clone()
    }

    pub async fn dial_timeouts(&self) -> Vec<Duration> {
        self.timeouts.read().await.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn dial(&self, _address: &str, timeout: Duration) -> Result<MockConnection, DialError> {
        let n = self.dials.fetch_add(1, Ordering::SeqCst);
        self.timeouts.write().await.push(timeout);

        if self.failing.read().await.contains(&n) {
            return Err(DialError::Refused(format!("mock dial {} refused", n)));
        }

        let conn = MockConnection {
            id: n,
            closes: Arc::new(AtomicUsize::new(0)),
        };
        self.connections.write().await.push(conn.clone());
        Ok(conn)
    }
}

/// Caller error with or without a gRPC status.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("grpc: {0}")]
    Grpc(#[from] Status),
    #[error("plain failure")]
    Plain,
}

impl StatusSource for TestError {
    fn status_code(&self) -> Option<Code> {
        match self {
            TestError::Grpc(status) => Some(status.code()),
            TestError::Plain => None,
        }
    }
}
