//! Cancellation
//!
//! One signal, raised by Ctrl-C, that every pipeline stage races against.

use crate::domain::error::BleError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation signal shared by every pipeline stage
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Returns `false` if it was already requested.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless cancellation comes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, BleError>
    where
        F: Future<Output = Result<T, BleError>>,
    {
        tokio::select! {
            _ = self.cancelled() => Err(BleError::Cancelled),
            result = fut => result,
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        assert!(handle.cancel());
        assert!(!clone.cancel());
        assert!(clone.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let handle = CancelHandle::new();
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result: Result<(), BleError> = handle
            .run(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BleError::Cancelled)));
    }
}
