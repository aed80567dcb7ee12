//! Per-chain stop signal
//!
//! Every blocking point in a listener or writer races its work against
//! [`StopSignal::stopped`]. Dropping the [`StopHandle`] counts as a stop.

use std::time::Duration;
use tokio::sync::watch;

/// Owner side: fires the signal for one chain
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

/// Observer side, cloned into each task of a chain
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    /// A new observer of this handle
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once the chain is told to stop
    pub async fn stopped(&mut self) {
        // Err means the handle is gone, which is a stop as well
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless stopped first. Returns false when stopped.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stopped() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_wakes_observers() {
        let (handle, mut signal) = stop_channel();
        assert!(!signal.is_stopped());

        let waiter = tokio::spawn(async move {
            signal.stopped().await;
        });
        handle.stop();
        waiter.await.unwrap();
        assert!(handle.signal().is_stopped());
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_stop() {
        let (handle, signal) = stop_channel();
        drop(handle);
        assert!(signal.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_stop() {
        let (_handle, mut signal) = stop_channel();
        assert!(signal.sleep(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_stop() {
        let (handle, mut signal) = stop_channel();
        let sleeper = tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await });
        tokio::task::yield_now().await;
        handle.stop();
        assert!(!sleeper.await.unwrap());
    }
}
