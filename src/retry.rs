use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BootstrapError;

/// Fixed-interval, unbounded polling loop. There is no attempt limit; the
/// only ways out are a successful attempt or cancellation.
pub struct Poller {
    interval: Duration,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    /// Run `attempt` until it yields `Some(value)`, sleeping `interval`
    /// between tries. Cancellation wins over the sleep and surfaces as
    /// `Interrupted`.
    pub async fn poll_until<T, F, Fut>(&self, mut attempt: F) -> Result<T, BootstrapError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(BootstrapError::Interrupted);
            }
            if let Some(value) = attempt().await {
                return Ok(value);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(BootstrapError::Interrupted),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn immediate_success_returns_value() {
        let poller = Poller::new(Duration::from_millis(1), CancellationToken::new());
        let result = poller.poll_until(|| async { Some(42) }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let poller = Poller::new(Duration::from_millis(1), CancellationToken::new());
        let mut tries = 0;
        let result = poller
            .poll_until(move || {
                tries += 1;
                let done = tries >= 3;
                async move { if done { Some(tries) } else { None } }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
    }

    #[tokio::test]
    async fn pre_cancelled_token_interrupts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let poller = Poller::new(Duration::from_millis(1), cancel);
        let result: Result<(), _> = poller.poll_until(|| async { None }).await;
        assert!(matches!(result, Err(BootstrapError::Interrupted)));
    }

    #[tokio::test]
    async fn cancellation_during_sleep_interrupts() {
        let cancel = CancellationToken::new();
        let poller = Poller::new(Duration::from_secs(60), cancel.clone());
        let handle = tokio::spawn(async move {
            poller.poll_until(|| async { None::<()> }).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BootstrapError::Interrupted)));
    }
}
