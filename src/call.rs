//! Short call executor: round-robin over the pool with bounded retries.

use std::fmt::Display;
use std::future::Future;

use tonic::Status;
use tracing::{debug, warn};

use crate::config::Config;
use crate::context::CallContext;
use crate::error::CallError;
use crate::pool::ConnectionPool;
use crate::transport::Connection;
use crate::utils::retry::{is_retryable, GeometricBackoff, StatusSource};

/// Run `call` against the pool until it succeeds, fails non-retryably, or
/// `config.max_retries + 1` attempts are spent.
///
/// Each attempt gets a fresh deadline of `config.call_timeout` (capped by the
/// caller's deadline) and races the caller's cancellation. Expiry and
/// cancellation surface as `DeadlineExceeded` and `Cancelled` statuses.
pub async fn execute<C, T, E, F, Fut>(
    pool: &ConnectionPool<C>,
    config: &Config,
    ctx: &CallContext,
    mut call: F,
) -> Result<T, CallError<E>>
where
    C: Connection,
    E: StatusSource + From<Status> + Display,
    F: FnMut(CallContext, C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = GeometricBackoff::for_short_calls(config.backoff_factor);
    let attempts = config.max_retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let conn = pool.next().await.ok_or(CallError::Closed)?;
        let attempt_ctx = ctx.child_with_timeout(config.call_timeout);

        let err = match run_attempt(&attempt_ctx, call(attempt_ctx.clone(), conn)).await {
            Ok(value) => {
                debug!(attempt, "Short call succeeded");
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_retryable(&err) {
            debug!(attempt, error = %err, "Short call failed with non-retryable error");
            return Err(CallError::Rejected(err));
        }
        if attempt >= attempts {
            warn!(attempts, error = %err, "Short call retries exhausted");
            return Err(CallError::RetriesExhausted {
                attempts,
                last: err,
            });
        }

        let delay = backoff.next_delay();
        warn!(
            attempt,
            max_attempts = attempts,
            error = %err,
            delay = ?delay,
            "Short call failed, retrying"
        );

        if config.interruptible_backoff {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => {
                    return Err(CallError::Cancelled { attempts: attempt, last: err });
                }
            }
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Race one attempt against its deadline and cancellation.
async fn run_attempt<T, E, Fut>(ctx: &CallContext, attempt: Fut) -> Result<T, E>
where
    E: From<Status>,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = ctx.deadline();
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(E::from(Status::cancelled("short call cancelled"))),
        result = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, attempt)
                    .await
                    .unwrap_or_else(|_| {
                        Err(E::from(Status::deadline_exceeded("short call attempt timed out")))
                    }),
                None => attempt.await,
            }
        } => result,
    }
}
