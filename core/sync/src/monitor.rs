//! Connectivity watching as explicit message passing.
//!
//! Connectivity sources (a browser bridge, a socket prober, tests) report
//! transitions to the `NetworkMonitor`; the handle's task consumes them,
//! flips the shared online flag, and triggers a queue drain on reconnect.
//! Going offline only flips the flag; writers consult it to choose
//! optimistic-cache-only vs. immediate-send behavior.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::DrainReport;

/// A connectivity transition observed by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Connectivity returned.
    Online,
    /// Connectivity was lost.
    Offline,
}

/// Reporting side of the connectivity watcher.
pub struct NetworkMonitor {
    event_tx: mpsc::Sender<ConnectivityEvent>,
    online: Arc<AtomicBool>,
}

impl NetworkMonitor {
    /// Create a monitor and the handle for its background task.
    ///
    /// `online` is shared with the engine so writers observe the flag
    /// without going through the watcher task.
    pub fn new(online: Arc<AtomicBool>) -> (Self, NetworkMonitorHandle) {
        let (event_tx, event_rx) = mpsc::channel(16);

        let monitor = Self {
            event_tx,
            online: online.clone(),
        };
        let handle = NetworkMonitorHandle { event_rx, online };

        (monitor, handle)
    }

    /// Current connectivity flag.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Report a connectivity transition to the watcher task.
    pub async fn report(&self, event: ConnectivityEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!("Connectivity watcher not running; {:?} dropped", event);
        }
    }
}

/// Handle for the connectivity watcher background task.
pub struct NetworkMonitorHandle {
    event_rx: mpsc::Receiver<ConnectivityEvent>,
    online: Arc<AtomicBool>,
}

impl NetworkMonitorHandle {
    /// Run the watcher loop.
    ///
    /// This should be spawned in a tokio task. `drain_fn` is invoked on
    /// every `Online` event; duplicate events are harmless because the
    /// drain itself is single-flight.
    pub async fn run<F, Fut>(mut self, drain_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DrainReport> + Send,
    {
        info!("Connectivity watcher started");

        while let Some(event) = self.event_rx.recv().await {
            match event {
                ConnectivityEvent::Offline => {
                    self.online.store(false, Ordering::SeqCst);
                    info!("Connectivity lost; writes will queue locally");
                }
                ConnectivityEvent::Online => {
                    self.online.store(true, Ordering::SeqCst);
                    info!("Connectivity restored; draining queue");
                    let report = drain_fn().await;
                    debug!(
                        "Reconnect drain: {} attempted, {} acked, {} failed",
                        report.attempted, report.acked, report.failed
                    );
                }
            }
        }

        info!("Connectivity watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_online_event_triggers_drain() {
        let online = Arc::new(AtomicBool::new(false));
        let (monitor, handle) = NetworkMonitor::new(online.clone());

        let drains = Arc::new(AtomicU32::new(0));
        let counter = drains.clone();
        let task = tokio::spawn(async move {
            handle
                .run(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        DrainReport::default()
                    }
                })
                .await;
        });

        monitor.report(ConnectivityEvent::Online).await;
        // Drop the sender so the watcher loop ends.
        drop(monitor);
        task.await.unwrap();

        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert!(online.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_offline_event_only_flips_flag() {
        let online = Arc::new(AtomicBool::new(true));
        let (monitor, handle) = NetworkMonitor::new(online.clone());

        let drains = Arc::new(AtomicU32::new(0));
        let counter = drains.clone();
        let task = tokio::spawn(async move {
            handle
                .run(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        DrainReport::default()
                    }
                })
                .await;
        });

        monitor.report(ConnectivityEvent::Offline).await;
        drop(monitor);
        task.await.unwrap();

        assert_eq!(drains.load(Ordering::SeqCst), 0);
        assert!(!online.load(Ordering::SeqCst));
    }
}
