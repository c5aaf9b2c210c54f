//! Retry utilities: retryable error classification and backoff schedules.
//!
//! Short calls back off geometrically from a fixed 100ms start. The managed
//! stream reconnects on a constant delay built with `backon`.

use std::error::Error;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use tonic::{Code, Status};

/// First delay between short call attempts, independent of the call timeout.
pub const SHORT_CALL_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Extracts a gRPC status code from an error.
///
/// Errors that carry no status code are never retried.
pub trait StatusSource {
    /// Returns the gRPC status code carried by this error, if any.
    fn status_code(&self) -> Option<Code>;
}

impl StatusSource for Status {
    fn status_code(&self) -> Option<Code> {
        Some(self.code())
    }
}

impl StatusSource for Box<dyn Error + Send + Sync> {
    fn status_code(&self) -> Option<Code> {
        let mut current: Option<&(dyn Error + 'static)> = Some(self.as_ref());
        while let Some(err) = current {
            if let Some(status) = err.downcast_ref::<Status>() {
                return Some(status.code());
            }
            current = err.source();
        }
        None
    }
}

/// Determines if a gRPC status code signals a transient failure.
///
/// Retryable codes:
/// - `Unavailable`: server temporarily unreachable
/// - `DeadlineExceeded`: attempt ran out of time
/// - `ResourceExhausted`: server shedding load
pub fn is_retryable_code(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted
    )
}

/// Determines if a gRPC error is retryable.
pub fn is_retryable_status(status: &Status) -> bool {
    is_retryable_code(status.code())
}

/// Determines if any error is retryable. Errors without a status code are not.
pub fn is_retryable<E: StatusSource + ?Sized>(err: &E) -> bool {
    err.status_code().is_some_and(is_retryable_code)
}

/// Geometric delay sequence: `initial`, `initial * f`, `initial * f^2`, ...
///
/// Each step multiplies the nanosecond count and truncates, saturating at
/// the largest representable delay.
#[derive(Debug, Clone)]
pub struct GeometricBackoff {
    next: Duration,
    factor: f64,
}

impl GeometricBackoff {
    /// Create a schedule starting at `initial`.
    pub fn new(initial: Duration, factor: f64) -> Self {
        Self {
            next: initial,
            factor,
        }
    }

    /// Schedule used between short call attempts.
    pub fn for_short_calls(factor: f64) -> Self {
        Self::new(SHORT_CALL_INITIAL_BACKOFF, factor)
    }

    /// Return the current delay and scale the following one.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        let scaled = current.as_nanos() as f64 * self.factor;
        self.next = Duration::from_nanos(scaled as u64);
        current
    }
}

impl Iterator for GeometricBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Constant delay between stream reconnects, limited to `max_reconnects` delays.
pub fn stream_backoff(delay: Duration, max_reconnects: u32) -> impl Iterator<Item = Duration> {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(max_reconnects as usize)
        .build()
}
