// src/live/shutdown.rs
//
// Cooperative stop request for the control loop, backed by a tokio watch
// channel. The loop checks it between iterations and races it against
// the dwell sleep.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop was requested. Pends forever if every handle
    /// was dropped without triggering.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
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
    async fn trigger_wakes_waiter() {
        let (handle, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());
        let waiter = tokio::spawn(async move {
            signal.wait().await;
            true
        });
        handle.trigger();
        assert!(waiter.await.unwrap());
        assert!(handle.signal().is_triggered());
    }

    #[tokio::test]
    async fn never_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(fired.is_err());
    }
}
