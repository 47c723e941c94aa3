//! Cancellation tokens and run superseding

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

/// Owner side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/token pair
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new token observing this handle
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        let (_, token) = cancel_pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

type ActiveRuns = Arc<Mutex<HashMap<String, (Uuid, CancelHandle)>>>;

/// Tracks in-flight runs per workflow and branch so a newer run supersedes
/// an older one.
#[derive(Debug, Clone, Default)]
pub struct RunCoordinator {
    active: ActiveRuns,
}

/// Registration of one run with a [`RunCoordinator`]
///
/// Dropping the ticket unregisters the run unless a newer run already took
/// its place.
#[derive(Debug)]
pub struct RunTicket {
    key: String,
    id: Uuid,
    handle: CancelHandle,
    active: ActiveRuns,
}

impl RunCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run, cancelling any in-flight run with the same key
    pub fn begin(&self, workflow: &str, branch: &str) -> RunTicket {
        let key = format!("{}@{}", workflow, branch);
        let id = Uuid::new_v4();
        let (handle, _) = cancel_pair();

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((previous, previous_handle)) = active.insert(key.clone(), (id, handle.clone())) {
            info!("Run {} superseded by {} for {}", previous, id, key);
            previous_handle.cancel();
        }

        RunTicket {
            key,
            id,
            handle,
            active: self.active.clone(),
        }
    }

    /// Number of runs currently registered
    pub fn active_runs(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl RunTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }

    pub fn token(&self) -> CancelToken {
        self.handle.token()
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.get(&self.key).is_some_and(|(id, _)| *id == self.id) {
            active.remove(&self.key);
        }
    }
}
