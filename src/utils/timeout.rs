//! Async timeout wrappers and protocol timing defaults.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How long the retransmission sender waits for ACK/NACK replies per round.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a receiver keeps answering END/duplicates after sending DONE.
pub const DONE_LINGER: Duration = Duration::from_secs(2);

/// Run `future`, failing with `ProtocolError::Timeout` after `duration`.
///
/// A zero duration disables the timeout and waits indefinitely.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if duration.is_zero() {
        return future.await;
    }
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Run `future` until the absolute `deadline`, returning `None` on expiry.
pub async fn until_deadline<F, T>(future: F, deadline: Instant) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout_at(deadline, future).await.ok()
}
