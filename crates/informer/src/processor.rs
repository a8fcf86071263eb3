//! Fan-out processor: an unbounded pending queue plus a two-stage pipeline
//! per listener, so a slow handler never blocks the producer or its peers.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use beluga_core::{EventHandler, Notification};
use futures::FutureExt;
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

/// Holds every registered listener and clones each produced notification
/// into their queues.
pub(crate) struct SharedProcessor<T> {
    listeners: RwLock<Vec<Arc<ProcessorListener<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> SharedProcessor<T> {
    pub(crate) fn new() -> Self {
        Self { listeners: RwLock::new(Vec::new()) }
    }

    /// Register a listener. Callers serialize this against `run` through the
    /// informer's lifecycle lock; once running, the set is read-only.
    pub(crate) fn add_listener(&self, handler: Arc<dyn EventHandler<T>>) {
        // Process-wide sequence so per-listener metric labels stay distinct
        // across informer instances.
        static LISTENER_SEQ: AtomicUsize = AtomicUsize::new(0);
        let id = LISTENER_SEQ.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push(Arc::new(ProcessorListener::new(id, handler)));
    }

    /// Hand `notification` to every listener's pending queue and return
    /// without waiting for delivery.
    pub(crate) fn distribute(&self, notification: Notification<T>) {
        counter!("informer_notifications_total", 1u64);
        let listeners = self.listeners.read();
        for listener in listeners.iter() {
            listener.add(notification.clone());
        }
    }

    /// Spawn the pipeline stages for every registered listener; they run
    /// independently until `shutdown` fires.
    pub(crate) fn run(&self, shutdown: watch::Receiver<()>) {
        let listeners = self.listeners.read();
        debug!(listeners = listeners.len(), "starting listener pipelines");
        for listener in listeners.iter() {
            listener.spawn(shutdown.clone());
        }
    }
}

/// One registered handler plus its pending queue.
///
/// The pending queue is unbounded: a stalled listener accumulates memory
/// without bound rather than ever back-pressuring the producer.
pub(crate) struct ProcessorListener<T> {
    id: usize,
    handler: Arc<dyn EventHandler<T>>,
    pending_tx: mpsc::UnboundedSender<Notification<T>>,
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<Notification<T>>>>,
    depth: Arc<AtomicUsize>,
}

impl<T: Clone + Send + Sync + 'static> ProcessorListener<T> {
    fn new(id: usize, handler: Arc<dyn EventHandler<T>>) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            id,
            handler,
            pending_tx,
            pending_rx: Mutex::new(Some(pending_rx)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append to the pending queue. Never blocks. A send error means the
    /// pipeline already shut down, where queued notifications are discarded
    /// anyway.
    fn add(&self, notification: Notification<T>) {
        if self.pending_tx.send(notification).is_ok() {
            let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
            gauge!("informer_listener_pending", depth as f64, "listener" => self.id.to_string());
        }
    }

    fn spawn(&self, shutdown: watch::Receiver<()>) {
        let Some(pending_rx) = self.pending_rx.lock().take() else {
            // Pipeline already running.
            return;
        };
        // Single-slot hand-off between the relay and delivery stages: the
        // queue side pops without holding anything a handler call depends on,
        // and the handler side never touches the queue.
        let (next_tx, next_rx) = mpsc::channel(1);
        spawn_guarded(
            "relay",
            relay(self.id, self.depth.clone(), pending_rx, next_tx, shutdown.clone()),
        );
        spawn_guarded("deliver", deliver(self.handler.clone(), next_rx, shutdown));
    }
}

/// Pop notifications off the pending queue and hand them, one at a time, to
/// the delivery stage. Suspends while the queue is empty and while a
/// hand-off is pending; both suspensions are interrupted by `shutdown`.
async fn relay<T: Send + 'static>(
    id: usize,
    depth: Arc<AtomicUsize>,
    mut pending: mpsc::UnboundedReceiver<Notification<T>>,
    next: mpsc::Sender<Notification<T>>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        let notification = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            n = pending.recv() => match n {
                Some(n) => n,
                // Producer side dropped; nothing more will arrive.
                None => break,
            },
        };
        let remaining = depth.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!("informer_listener_pending", remaining as f64, "listener" => id.to_string());
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            sent = next.send(notification) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!("relay stage stopped");
}

/// Take notifications from the hand-off slot and dispatch them to the
/// handler, strictly one at a time. A slow handler delays only this
/// listener.
async fn deliver<T: Send + 'static>(
    handler: Arc<dyn EventHandler<T>>,
    mut next: mpsc::Receiver<Notification<T>>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        let notification = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            n = next.recv() => match n {
                Some(n) => n,
                None => break,
            },
        };
        counter!("informer_deliveries_total", 1u64);
        match notification {
            Notification::Add { new } => handler.on_add(new).await,
            Notification::Update { old, new } => handler.on_update(old, new).await,
            Notification::Delete { old } => handler.on_delete(old).await,
        }
    }
    debug!("delivery stage stopped");
}

/// Spawn a pipeline stage with a panic boundary: a fault inside one
/// listener's stage is reported and contained, never propagated to the
/// producer or to other listeners.
fn spawn_guarded<F>(stage: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(payload) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(stage, panic = %msg, "listener pipeline stage panicked");
        }
    });
}
