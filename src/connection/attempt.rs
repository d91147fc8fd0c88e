//! Cancellable handle shared by accept and connect attempts

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::error;

/// Handle to an in-flight attempt task
pub(crate) struct AttemptHandle {
    pub id: u64,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl AttemptHandle {
    pub fn new(id: u64, cancel_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            id,
            cancel_tx: Some(cancel_tx),
            task,
        }
    }

    /// Cancel the attempt and wait until its socket is released
    pub async fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            // Receiver is gone if the task already finished
            let _ = tx.send(());
        }
        self.join().await;
    }

    /// Wait for an attempt that already reported its outcome
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("[LINK] Attempt {} panicked", self.id);
            }
        }
    }
}
