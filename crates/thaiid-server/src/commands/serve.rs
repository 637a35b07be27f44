use anyhow::Context;
use thaiid_card::CardReader;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;

use crate::broadcaster::{self, run_broadcaster, Hub};
use crate::config::ServeArgs;
use crate::events::PresenceEvent;
use crate::presence::{PresenceTiming, PresenceWorker};

/// Run the presence worker and the WebSocket server. Returns only on failure.
pub async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let addr = args.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "WebSocket server listening");

    let hub = Hub::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    PresenceWorker::spawn(
        CardReader::lazy,
        args.read.read_options(),
        PresenceTiming::default(),
        events_tx,
    )
    .context("Failed to start presence worker")?;

    tokio::spawn(broadcaster::serve(listener, hub.clone()));
    forward_events(hub, events_rx).await
}

/// Publish worker events. Only returns once the worker is gone, which is an error.
async fn forward_events(hub: Hub, events: UnboundedReceiver<PresenceEvent>) -> anyhow::Result<()> {
    run_broadcaster(hub, events).await;
    anyhow::bail!("Presence worker stopped")
}
