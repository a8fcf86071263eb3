//! Beluga shared informer: one delta stream, one authoritative store, many
//! independent listeners.
//!
//! A single upstream stream of object deltas is reconciled into one keyed
//! in-RAM store and fanned out, in order, to every registered handler, so
//! that many controllers can share one cache and one watch instead of each
//! keeping duplicates.
//!
//! One behavioral caveat carries through the whole design: when a handler
//! runs, the shared store is AT LEAST as fresh as the notification that
//! triggered it, but it may be fresher. After an add followed by a delete,
//! the store may no longer hold the object an `on_add` call is describing.
//! Handlers must not expect the store to exactly match their notification.

#![forbid(unsafe_code)]

mod processor;

use std::sync::Arc;

use beluga_core::{Delta, DeltaKind, EventHandler, Notification};
use beluga_store::{KeyFunc, MemoryStore, Store, StoreError};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use processor::SharedProcessor;

/// Errors surfaced by the informer's public surface.
#[derive(Debug, thiserror::Error)]
pub enum InformerError {
    #[error("informer has already started")]
    AlreadyStarted,
}

/// Shared watch-cache fan-out core.
///
/// Constructed around a push-style delta source (a channel of ordered delta
/// batches) and the source's own "initial list complete" signal. Handlers
/// register before [`run`](SharedInformer::run); the store handle can be
/// read at any time.
pub struct SharedInformer<T> {
    store: Arc<MemoryStore<T>>,
    processor: SharedProcessor<T>,
    deltas: Mutex<Option<mpsc::Receiver<Vec<Delta<T>>>>>,
    synced: watch::Receiver<bool>,
    started: Mutex<bool>,
}

impl<T: Clone + Send + Sync + 'static> SharedInformer<T> {
    /// Build an informer over a fresh store keyed by `key_fn`.
    ///
    /// `deltas` yields batches ordered oldest-to-newest; `synced` is owned by
    /// the upstream source and flips to `true` once its initial list has been
    /// fully delivered.
    pub fn new(
        key_fn: KeyFunc<T>,
        deltas: mpsc::Receiver<Vec<Delta<T>>>,
        synced: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store: Arc::new(MemoryStore::new(key_fn)),
            processor: SharedProcessor::new(),
            deltas: Mutex::new(Some(deltas)),
            synced,
            started: Mutex::new(false),
        }
    }

    /// Register a handler for the notification stream.
    ///
    /// Calls to one handler are sequential and in production order, with no
    /// coordination between handlers. Fails once `run` has been invoked: a
    /// listener attached mid-stream would silently have missed everything
    /// before it.
    pub fn add_event_handler(
        &self,
        handler: Arc<dyn EventHandler<T>>,
    ) -> Result<(), InformerError> {
        let started = self.started.lock();
        if *started {
            return Err(InformerError::AlreadyStarted);
        }
        self.processor.add_listener(handler);
        Ok(())
    }

    /// Handle to the shared store. Mutated only by the informer's own
    /// reconciliation; treat reads as eventually consistent.
    pub fn store(&self) -> Arc<dyn Store<T>> {
        self.store.clone()
    }

    /// Whether the upstream source has completed its initial list. Forwarded
    /// verbatim; the informer computes no sync state of its own.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Cloneable sync-status accessor, detached from the informer's lifetime.
    pub fn sync_handle(&self) -> SyncHandle {
        SyncHandle { synced: self.synced.clone() }
    }

    /// Drive the informer until `shutdown` fires or the delta stream closes.
    ///
    /// Marks the informer started (permanently rejecting new handlers),
    /// spawns every listener pipeline, then reconciles delta batches as they
    /// arrive. A store failure aborts the failing batch, is logged, and the
    /// loop moves on; nothing here panics the process.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) {
        let mut deltas = {
            let mut started = self.started.lock();
            let Some(rx) = self.deltas.lock().take() else {
                warn!("informer run invoked more than once; ignoring");
                return;
            };
            *started = true;
            self.processor.run(shutdown.clone());
            rx
        };
        info!("informer started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("shutdown fired; stopping informer");
                    break;
                }
                batch = deltas.recv() => match batch {
                    Some(batch) => {
                        if let Err(err) = self.apply_deltas(batch) {
                            warn!(error = %err, "delta batch aborted");
                        }
                    }
                    None => {
                        debug!("delta stream closed; stopping informer");
                        break;
                    }
                },
            }
        }
    }

    /// Reconcile one batch, oldest first: mutate the store, classify the
    /// change, and broadcast the classified notification. The first store
    /// failure aborts the remainder of the batch.
    fn apply_deltas(&self, batch: Vec<Delta<T>>) -> Result<(), StoreError> {
        for delta in batch {
            match delta.kind {
                DeltaKind::Sync | DeltaKind::Added | DeltaKind::Updated => {
                    if let Some(old) = self.store.get(&delta.object)? {
                        self.store.update(delta.object.clone())?;
                        self.processor
                            .distribute(Notification::Update { old, new: delta.object });
                    } else {
                        self.store.add(delta.object.clone())?;
                        self.processor.distribute(Notification::Add { new: delta.object });
                    }
                }
                DeltaKind::Deleted => {
                    self.store.delete(&delta.object)?;
                    self.processor.distribute(Notification::Delete { old: delta.object });
                }
            }
        }
        Ok(())
    }
}

/// Stand-in for the informer when a caller only needs to gate on the
/// upstream "initial list complete" signal.
#[derive(Clone)]
pub struct SyncHandle {
    synced: watch::Receiver<bool>,
}

impl SyncHandle {
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the source reports synced. Returns `false` if the source
    /// went away without ever syncing.
    pub async fn wait_synced(&mut self) -> bool {
        loop {
            if *self.synced.borrow_and_update() {
                return true;
            }
            if self.synced.changed().await.is_err() {
                return false;
            }
        }
    }
}
