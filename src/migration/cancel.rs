//! Cooperative cancellation of a running migration.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected handle/signal pair.
pub fn cancellation() -> (CancellationHandle, CancellationSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancellationHandle { tx: Arc::new(tx) },
        CancellationSignal { rx: Some(rx) },
    )
}

/// Requests cancellation. Cloneable; any clone may cancel.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    /// Request cancellation. The running migration stops before its next batch.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another signal observing this handle.
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: Some(self.tx.subscribe()),
        }
    }
}

/// Observed by the batch runner between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
