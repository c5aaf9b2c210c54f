//! Caller context: deadline plus cancellation.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal handed to caller logic.
///
/// A short call derives one child context per attempt; the managed stream
/// runs its logic under a context without a deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl CallContext {
    /// A context with no deadline that is never cancelled on its own.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancellation: CancellationToken::new(),
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context cancelled through `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancellation: token,
        }
    }

    /// Derive a child whose deadline is the earlier of ours and `now + timeout`.
    ///
    /// Cancelling this context also cancels the child.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let local = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(local),
            None => local,
        };
        Self {
            deadline: Some(deadline),
            cancellation: self.cancellation.child_token(),
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns true once the context is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Build a tonic request carrying the remaining time as its gRPC timeout.
    pub fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        if let Some(remaining) = self.remaining() {
            request.set_timeout(remaining);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_background_has_no_deadline() {
        let ctx = CallContext::background();
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_takes_local_timeout_when_parent_is_unbounded() {
        let ctx = CallContext::background();
        let child = ctx.child_with_timeout(Duration::from_millis(300));
        assert_eq!(child.remaining(), Some(Duration::from_millis(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_parent_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_millis(100));
        let child = ctx.child_with_timeout(Duration::from_secs(5));
        assert_eq!(child.deadline(), ctx.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_takes_earlier_local_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        let child = ctx.child_with_timeout(Duration::from_millis(100));
        assert_eq!(child.remaining(), Some(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_saturates_at_zero() {
        let ctx = CallContext::with_timeout(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_cancellation(token.clone());
        let child = ctx.child_with_timeout(Duration::from_secs(1));
        token.cancel();
        assert!(child.is_cancelled());
        child.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_timeout() {
        let ctx = CallContext::with_timeout(Duration::from_secs(2));
        let request = ctx.request(());
        let timeout = request
            .metadata()
            .get("grpc-timeout")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        assert!(timeout.is_some());
    }

    #[tokio::test]
    async fn test_request_without_deadline_has_no_timeout() {
        let request = CallContext::background().request(());
        assert!(request.metadata().get("grpc-timeout").is_none());
    }
}
