// ABOUTME: Cooperative abort signal shared by the orchestrator, hooks, and rollouts.
// ABOUTME: Triggered from signal handlers; checked at safe points and awaited in selects.

use tokio::sync::watch;

/// Triggers an abort. Cloneable; any clone can fire it.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

/// Observes an abort.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/signal pair.
pub fn channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (
        AbortHandle {
            tx: std::sync::Arc::new(tx),
        },
        AbortSignal { rx },
    )
}

impl AbortHandle {
    /// Request an abort. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// A new signal observing this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once an abort is requested. Never resolves if the handle is
    /// dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
