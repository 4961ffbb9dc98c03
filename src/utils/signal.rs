use std::sync::Arc;

use tokio::sync::watch;

/// One-shot readiness latch.
///
/// Firing is idempotent, so a component may release readiness both after its
/// first successful sync and again on stop without special casing.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
