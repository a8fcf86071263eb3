//! Beluga core types: the delta/notification data model shared by the
//! store and the informer, plus the event-handler contract.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Kind of change carried by a [`Delta`], as tagged by the upstream
/// watch/list stream. `Sync` marks a periodic full redelivery and is
/// reconciled exactly like `Added`/`Updated`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Sync,
    Added,
    Updated,
    Deleted,
}

/// One change event from the upstream stream. Batches of deltas are ordered
/// oldest-to-newest and must be applied in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta<T> {
    pub kind: DeltaKind,
    pub object: T,
}

impl<T> Delta<T> {
    pub fn new(kind: DeltaKind, object: T) -> Self {
        Self { kind, object }
    }
}

/// Classified change produced by reconciling one delta against the store.
/// Produced exactly once per delta; immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification<T> {
    Add { new: T },
    Update { old: T, new: T },
    Delete { old: T },
}

/// Callback set invoked by a listener pipeline.
///
/// Calls for one handler are strictly sequential and in production order,
/// but no particular task or thread identity is guaranteed, and the shared
/// store may already be fresher than the notification by the time a callback
/// runs. A slow handler only delays its own pipeline.
#[async_trait::async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn on_add(&self, new: T);
    async fn on_update(&self, old: T, new: T);
    async fn on_delete(&self, old: T);
}

/// Lightweight object as carried by a watch stream: identity plus the raw
/// JSON payload. Keyed by namespace+name (see `beluga-store`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiteObj {
    pub namespace: Option<String>,
    pub name: String,
    /// Raw object payload as received from the stream.
    pub raw: serde_json::Value,
}

impl LiteObj {
    pub fn new(namespace: Option<&str>, name: &str, raw: serde_json::Value) -> Self {
        Self { namespace: namespace.map(|s| s.to_string()), name: name.to_string(), raw }
    }
}

pub mod prelude {
    pub use super::{Delta, DeltaKind, EventHandler, LiteObj, Notification};
}
