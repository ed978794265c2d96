use crate::error::{PushError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `fut` until it completes or `cancel` fires, whichever comes first.
/// A fired token wins even when the future is also ready.
pub async fn with_cancel<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PushError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let value = with_cancel(&cancel, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = with_cancel(&cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(PushError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = with_cancel(&cancel, async { Ok(1) }).await;
        assert_eq!(result, Err(PushError::Cancelled));
    }
}
