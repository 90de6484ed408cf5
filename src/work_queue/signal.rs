//! Cooperative stop signal.

use tokio::sync::watch;

/// Clonable stop flag shared between a worker and whoever controls it.
///
/// Once raised it stays raised. Waiters wake immediately.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Ask every holder of this signal to stop.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has been raised.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so this only errors if we are being dropped.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Raise the signal on Ctrl-C.
    pub fn stop_on_ctrl_c(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing in-flight items");
                signal.stop();
            }
        });
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_wakes_waiters() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.stopped().await })
        };
        signal.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_stopped());

        // Already raised: resolves at once.
        signal.stopped().await;
    }
}
