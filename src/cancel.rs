//! Cooperative cancellation on top of [`CancellationToken`].
//!
//! Cancelling never interrupts a call that is already running; callers check
//! the token before starting the next unit of work and discard results that
//! arrive after it was cancelled.

use crate::error::{BlogcastError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Checkpoints used between units of work.
pub trait CancelCheck {
    /// `Err(Cancelled)` once the token is cancelled.
    fn check(&self) -> Result<()>;

    /// Replace a late result, success or failure, with `Err(Cancelled)`.
    fn settle<T>(&self, result: Result<T>) -> Result<T>;
}

impl CancelCheck for CancellationToken {
    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BlogcastError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn settle<T>(&self, result: Result<T>) -> Result<T> {
        self.check()?;
        result
    }
}

/// Sleep for `delay`, waking early with `Err(Cancelled)`.
pub async fn sleep_unless_cancelled(token: &CancellationToken, delay: Duration) -> Result<()> {
    tokio::select! {
        _ = token.cancelled() => Err(BlogcastError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());

        other.cancel();
        assert!(matches!(token.check(), Err(BlogcastError::Cancelled)));
    }

    #[test]
    fn test_settle_drops_late_failure() {
        let token = CancellationToken::new();
        let early: Result<()> = Err(BlogcastError::Fatal("boom".into()));
        assert!(matches!(token.settle(early), Err(BlogcastError::Fatal(_))));

        token.cancel();
        let late: Result<()> = Err(BlogcastError::Fatal("boom".into()));
        assert!(matches!(token.settle(late), Err(BlogcastError::Cancelled)));
        assert!(matches!(token.settle(Ok(3)), Err(BlogcastError::Cancelled)));
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = sleep_unless_cancelled(&token, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(BlogcastError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
