//! Application lifecycle surface: wires the reconciler to the registry
//! feed at login and detaches it again at logout.

use super::reconciler::Reconciler;
use super::registry::FeedGuard;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One authenticated session's notification machinery.
///
/// Holds the live registry feed and the single task consuming it.
/// Snapshots are processed strictly in delivery order, one pass at a time;
/// a pass that mutates the registry causes the feed to re-fire and the
/// follow-up pass to settle.
pub struct NotificationSession {
    reconciler: Arc<Reconciler>,
    feed_guard: Option<FeedGuard>,
    pump: Option<JoinHandle<()>>,
}

impl NotificationSession {
    /// Attach the registry feed and start the pass-consumer task.
    pub fn start(reconciler: Arc<Reconciler>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let feed_guard = reconciler
            .registry()
            .subscribe(reconciler.user_id(), tx);

        let worker = reconciler.clone();
        let pump = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                let outcome = worker.reconcile(snapshot).await;
                log::debug!("Reconciliation pass finished: {:?}", outcome);
            }
            log::debug!("Registration feed closed");
        });

        log::info!("Notification session started");
        Self {
            reconciler,
            feed_guard: Some(feed_guard),
            pump: Some(pump),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Detach from the feed and reset the derived stores (logout). Safe to
    /// call more than once.
    pub async fn detach(&mut self) {
        if let Some(guard) = self.feed_guard.take() {
            guard.detach();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.reconciler.reset().await;
        log::info!("Notification session detached");
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        if let Some(guard) = self.feed_guard.take() {
            guard.detach();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
