//! Error types for the wrapper client.

use std::time::Duration;

use tonic::Code;

use crate::utils::retry::StatusSource;

/// Result type for client construction.
pub type Result<T> = std::result::Result<T, WrapperError>;

/// Failure to establish a transport connection.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// The address could not be turned into a gRPC endpoint.
    #[error("invalid address {address}: {message}")]
    InvalidAddress { address: String, message: String },

    /// The dial did not complete within the dial timeout.
    #[error("dial timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level error from tonic.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Socket error from a custom connector.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connector refused to produce a connection.
    #[error("connection refused: {0}")]
    Refused(String),
}

/// Errors raised while building or validating a client.
#[derive(Debug, thiserror::Error)]
pub enum WrapperError {
    /// Configuration rejected before any dial.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A short call pool connection failed to dial.
    #[error("failed to dial short call connection {index}: {source}")]
    PoolDial {
        index: usize,
        #[source]
        source: DialError,
    },

    /// The initial stream connection failed to dial.
    #[error("failed to dial stream connection: {0}")]
    StreamDial(#[source] DialError),
}

/// Terminal failure of a short call.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// The caller logic failed with a non-retryable error.
    #[error(transparent)]
    Rejected(E),

    /// Every attempt failed with a retryable error.
    #[error("short call failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The caller cancelled while the executor was backing off.
    #[error("short call cancelled during backoff after {attempts} attempts: {last}")]
    Cancelled {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The client was closed.
    #[error("client is closed")]
    Closed,
}

impl<E> CallError<E> {
    /// Returns the last error produced by the caller logic, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            CallError::Rejected(e)
            | CallError::RetriesExhausted { last: e, .. }
            | CallError::Cancelled { last: e, .. } => Some(e),
            CallError::Closed => None,
        }
    }

    /// Returns the number of attempts made before giving up.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            CallError::RetriesExhausted { attempts, .. } | CallError::Cancelled { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }

    /// Returns true if the retry budget was exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, CallError::RetriesExhausted { .. })
    }
}

impl<E: StatusSource> StatusSource for CallError<E> {
    fn status_code(&self) -> Option<Code> {
        self.last_error().and_then(StatusSource::status_code)
    }
}

/// Terminal failure of a managed stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError<E> {
    /// Every stream cycle failed. `last` is the final logic error.
    #[error("stream call failed after {attempts} reconnect attempts: {last}")]
    ReconnectsExhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// The caller cancelled the stream.
    #[error("stream call cancelled")]
    Cancelled,

    /// The client was closed.
    #[error("client is closed")]
    Closed,
}

impl<E> StreamError<E> {
    /// Returns the error from the last stream cycle.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            StreamError::ReconnectsExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl<E: StatusSource> StatusSource for StreamError<E> {
    fn status_code(&self) -> Option<Code> {
        self.last_error().and_then(StatusSource::status_code)
    }
}
