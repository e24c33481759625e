//! Pipeline cancellation.

use tokio::sync::watch;

/// Triggers cancellation of a running pipeline.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by stages that can be interrupted.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Cancellation { rx })
    }

    /// A cancellation that never fires.
    pub fn never() -> Cancellation {
        let (_, cancellation) = Self::new();
        cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_resolves_waiter() {
        let (handle, mut cancellation) = Cancellation::new();
        let waiter = tokio::spawn(async move {
            cancellation.cancelled().await;
        });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter resolved")
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let mut cancellation = Cancellation::never();
        assert!(!cancellation.is_cancelled());
        let result =
            tokio::time::timeout(Duration::from_millis(50), cancellation.cancelled()).await;
        assert!(result.is_err());
    }
}
