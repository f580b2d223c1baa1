//! Cancellation scope
//!
//! A [`Scope`] bounds every suspension point of a call: HTTP sends, lock
//! backoff and task polling all race against it.

use super::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Same scope with a deadline. An earlier existing deadline is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the scope has already ended
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Sleep for `duration` unless the scope ends first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Drive `fut` to completion unless the scope ends first
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = deadline => Err(Error::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_sleep_completes_without_cancellation() {
        let scope = Scope::default();
        assert_ok!(scope.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let scope = Scope::new(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let start = std::time::Instant::now();
        let result = scope.sleep(Duration::from_secs(10)).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_sleep() {
        let scope = Scope::default().with_deadline(Instant::now() + Duration::from_millis(20));
        let result = scope.sleep(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_earlier_deadline_is_kept() {
        let soon = Instant::now() + Duration::from_millis(10);
        let later = soon + Duration::from_secs(60);
        let scope = Scope::default().with_deadline(soon).with_deadline(later);
        assert_eq!(scope.deadline(), Some(soon));
    }

    #[test]
    fn test_check_after_cancel() {
        let token = CancellationToken::new();
        let scope = Scope::new(token.clone());
        assert_ok!(scope.check());
        token.cancel();
        assert_err!(scope.check());
    }
}
