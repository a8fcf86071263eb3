//! Minimal fan-out demo: two handlers sharing one informer, one of them slow.
//!
//! Run with: `cargo run -p beluga-informer --example fanout`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use beluga_core::{Delta, DeltaKind, EventHandler, LiteObj};
use beluga_informer::SharedInformer;
use beluga_store::{namespace_key, KeyFunc, Store};
use tokio::sync::{mpsc, watch};
use tracing::info;

struct Logger {
    name: &'static str,
    delay: Duration,
}

#[async_trait::async_trait]
impl EventHandler<LiteObj> for Logger {
    async fn on_add(&self, new: LiteObj) {
        tokio::time::sleep(self.delay).await;
        info!(handler = self.name, obj = %new.name, "add");
    }
    async fn on_update(&self, old: LiteObj, new: LiteObj) {
        tokio::time::sleep(self.delay).await;
        info!(handler = self.name, from = %old.name, to = %new.name, "update");
    }
    async fn on_delete(&self, old: LiteObj) {
        tokio::time::sleep(self.delay).await;
        info!(handler = self.name, obj = %old.name, "delete");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let key_fn: KeyFunc<LiteObj> = Arc::new(namespace_key);
    let (delta_tx, delta_rx) = mpsc::channel(16);
    let (synced_tx, synced_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let informer = Arc::new(SharedInformer::new(key_fn, delta_rx, synced_rx));
    informer.add_event_handler(Arc::new(Logger { name: "brisk", delay: Duration::ZERO }))?;
    informer.add_event_handler(Arc::new(Logger { name: "sleepy", delay: Duration::from_millis(100) }))?;

    let run = {
        let informer = informer.clone();
        tokio::spawn(async move { informer.run(shutdown_rx).await })
    };

    // Pretend initial list: two objects, then mark synced.
    let objs = |name: &str, v: i64| LiteObj::new(Some("demo"), name, serde_json::json!({ "v": v }));
    delta_tx
        .send(vec![
            Delta::new(DeltaKind::Sync, objs("alpha", 1)),
            Delta::new(DeltaKind::Sync, objs("beta", 1)),
        ])
        .await?;
    let _ = synced_tx.send(true);

    // Live changes.
    delta_tx.send(vec![Delta::new(DeltaKind::Updated, objs("alpha", 2))]).await?;
    delta_tx.send(vec![Delta::new(DeltaKind::Deleted, objs("beta", 1))]).await?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!(cached = informer.store().len(), synced = informer.has_synced(), "final state");

    let _ = shutdown_tx.send(());
    run.await?;
    Ok(())
}
