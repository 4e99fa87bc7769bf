//! # Cancellation
//!
//! "Context" in the Go sense is modelled as a [`CancellationToken`] passed
//! alongside [`crate::options::Options`]: every suspension point in the
//! pipelines (a Kubernetes API call, a provider token exchange, a
//! single-flight cache producer) races against it, so a cancelled caller
//! unblocks immediately instead of waiting out the underlying I/O.
//!
//! A token that is already cancelled when a suspension point is reached
//! short-circuits before the underlying future is even polled, matching
//! the "already-cancelled context" case for a single-flight leader: the
//! producer call never actually happens.

pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Race `fut` against `ctx`'s cancellation, returning [`Error::Cancelled`]
/// if `ctx` fires first (or was already cancelled before `fut` was
/// polled).
pub(crate) async fn race<T>(
    ctx: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T> {
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        () = ctx.cancelled() => Err(Error::Cancelled),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_the_future_result_when_not_cancelled() {
        let ctx = CancellationToken::new();
        let result = race(&ctx, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn an_already_cancelled_token_short_circuits() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = race(&ctx, async { 42 }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_mid_flight_wins_the_race() {
        let ctx = CancellationToken::new();
        let child = ctx.clone();
        let result = race(&ctx, async move {
            child.cancel();
            std::future::pending::<()>().await;
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
