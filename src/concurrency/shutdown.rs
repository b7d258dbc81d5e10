//! Broadcast shutdown signaling for worker coordination.
//!
//! Abstracts a tokio watch channel into a stop-flag type shared by the pipeline
//! coordinator and all workers. The flag is set at most once; repeated shutdown requests
//! are no-ops. Receivers can poll the flag without blocking or await its transition.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel, owned by the pipeline coordinator.
#[derive(Debug, Clone)]
pub struct ShutdownTx {
    tx: watch::Sender<bool>,
}

impl ShutdownTx {
    /// Requests shutdown of every subscribed worker.
    ///
    /// Idempotent: the flag only ever transitions `false -> true`, so calling this a
    /// second time has no effect and does not re-notify receivers that already stopped.
    pub fn shutdown(&self) {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                return false;
            }

            *stopped = true;
            true
        });
    }

    /// Creates a new receiver observing this shutdown flag.
    ///
    /// Receivers subscribed after shutdown was requested still observe the stopped state.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver side of the shutdown channel, held by every worker.
#[derive(Debug, Clone)]
pub struct ShutdownRx {
    rx: watch::Receiver<bool>,
}

impl ShutdownRx {
    /// Non-blocking read of the stop flag, usable from any task.
    pub fn should_stop(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// Resolves immediately if the flag is already set. A dropped transmitter is treated
    /// as a shutdown request, since no coordinator is left to drive the pipeline.
    pub async fn stopped(&mut self) {
        if *self.rx.borrow() {
            return;
        }

        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}

/// Outcome of an operation that may have been interrupted by shutdown.
///
/// Used at worker boundaries to distinguish expected shutdown unblocking from real
/// values, so shutdown never masquerades as a fault.
#[derive(Debug)]
pub enum ShutdownResult<T> {
    Ok(T),
    Shutdown,
}

/// Creates a new shutdown channel in the running (not stopped) state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx { tx }, ShutdownRx { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_is_observed_by_all_receivers() {
        let (tx, mut rx_a) = create_shutdown_channel();
        let mut rx_b = tx.subscribe();

        assert!(!rx_a.should_stop());
        assert!(!rx_b.should_stop());

        tx.shutdown();

        rx_a.stopped().await;
        rx_b.stopped().await;
        assert!(rx_a.should_stop());
        assert!(rx_b.should_stop());
    }

    #[tokio::test]
    async fn second_shutdown_request_is_a_noop() {
        let (tx, rx) = create_shutdown_channel();

        tx.shutdown();
        tx.shutdown();

        assert!(rx.should_stop());
    }

    #[tokio::test]
    async fn late_subscriber_observes_stopped_state() {
        let (tx, _rx) = create_shutdown_channel();
        tx.shutdown();

        let mut late = tx.subscribe();
        assert!(late.should_stop());

        // Must resolve immediately rather than wait for another transition.
        tokio::time::timeout(Duration::from_secs(1), late.stopped())
            .await
            .expect("stopped() should resolve for a late subscriber");
    }
}
