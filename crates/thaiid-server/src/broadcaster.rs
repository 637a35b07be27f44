//! Fan-out of presence events to WebSocket subscribers

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::events::PresenceEvent;

/// Pause after a failed accept, so a persistent fault does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Default)]
struct HubState {
    /// Serialized latest reader status, replayed to new subscribers
    last_status: Option<String>,
    subscribers: HashMap<u64, UnboundedSender<String>>,
    next_id: u64,
}

/// Subscriber registry plus the last reader status snapshot
#[derive(Clone, Default)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
}

/// A subscriber's queue of serialized messages
pub struct Subscription {
    pub id: u64,
    pub messages: UnboundedReceiver<String>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. The current reader status, if any, is the
    /// first message in its queue.
    pub fn subscribe(&self) -> Subscription {
        let (tx, messages) = mpsc::unbounded_channel();
        let mut state = self.lock();

        if let Some(snapshot) = &state.last_status {
            // `messages` is still held here, so the send cannot fail
            let _ = tx.send(snapshot.clone());
        }

        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, tx);

        Subscription { id, messages }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.remove(&id);
    }

    /// Serialize `event` once and queue it for every subscriber. Subscribers
    /// whose queue is gone are dropped.
    pub fn publish(&self, event: &PresenceEvent) {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Event serialization failed");
                return;
            }
        };

        let mut state = self.lock();
        if event.reader_status().is_some() {
            state.last_status = Some(text.clone());
        }

        state.subscribers.retain(|id, tx| {
            let delivered = tx.send(text.clone()).is_ok();
            if !delivered {
                debug!(subscriber = id, "Dropping subscriber");
            }
            delivered
        });
    }

    #[cfg(test)]
    pub fn last_status(&self) -> Option<String> {
        self.lock().last_status.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Publish every event from the presence worker, in order
pub async fn run_broadcaster(hub: Hub, mut events: UnboundedReceiver<PresenceEvent>) {
    while let Some(event) = events.recv().await {
        hub.publish(&event);
    }
    info!("Presence worker gone, broadcaster stopping");
}

/// Accept WebSocket subscribers forever
pub async fn serve(listener: TcpListener, hub: Hub) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(stream, peer, hub.clone()));
            }
            Err(err) => {
                warn!(error = %err, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: Hub) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!(%peer, error = %err, "WebSocket handshake failed");
            return;
        }
    };

    let (mut sink, mut incoming) = ws.split();
    let Subscription { id, mut messages } = hub.subscribe();
    info!(%peer, subscriber = id, subscribers = hub.subscriber_count(), "Subscriber connected");

    loop {
        tokio::select! {
            outgoing = messages.recv() => match outgoing {
                Some(text) => {
                    if let Err(err) = sink.send(Message::text(text)).await {
                        debug!(%peer, error = %err, "Send failed");
                        break;
                    }
                }
                None => break,
            },
            received = incoming.next() => match received {
                Some(Ok(Message::Close(_))) | None => break,
                // Client messages carry no meaning
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%peer, error = %err, "Receive failed");
                    break;
                }
            },
        }
    }

    hub.unsubscribe(id);
    info!(%peer, subscriber = id, "Subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use thaiid_card::CardRecord;
    use tokio::time::timeout;

    fn parse(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_new_subscriber_gets_snapshot_first() {
        let hub = Hub::new();
        hub.publish(&PresenceEvent::reader_found("R"));

        let mut sub = hub.subscribe();
        let first = parse(&sub.messages.try_recv().unwrap());
        assert_eq!(first["type"], "reader_status");
        assert_eq!(first["status"], "found");
        assert!(sub.messages.try_recv().is_err());
    }

    #[test]
    fn test_no_snapshot_before_any_status() {
        let hub = Hub::new();
        let mut sub = hub.subscribe();
        assert!(sub.messages.try_recv().is_err());
        assert!(hub.last_status().is_none());
    }

    #[test]
    fn test_snapshot_tracks_status_only() {
        let hub = Hub::new();
        hub.publish(&PresenceEvent::reader_found("R"));
        hub.publish(&PresenceEvent::card_data("R", CardRecord::default()));
        hub.publish(&PresenceEvent::reader_not_found());
        hub.publish(&PresenceEvent::card_data("R", CardRecord::default()));

        let snapshot = parse(&hub.last_status().unwrap());
        assert_eq!(snapshot["status"], "not_found");
    }

    #[test]
    fn test_publish_reaches_all_in_order() {
        let hub = Hub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(&PresenceEvent::reader_found("R"));
        hub.publish(&PresenceEvent::card_data("R", CardRecord::default()));

        for sub in [&mut a, &mut b] {
            assert_eq!(parse(&sub.messages.try_recv().unwrap())["type"], "reader_status");
            assert_eq!(parse(&sub.messages.try_recv().unwrap())["type"], "card_data");
        }
    }

    #[test]
    fn test_gone_subscriber_is_pruned() {
        let hub = Hub::new();
        let gone = hub.subscribe();
        let mut kept = hub.subscribe();
        drop(gone);

        hub.publish(&PresenceEvent::reader_not_found());

        assert_eq!(hub.subscriber_count(), 1);
        assert!(kept.messages.try_recv().is_ok());
    }

    #[test]
    fn test_unsubscribe() {
        let hub = Hub::new();
        let sub = hub.subscribe();
        hub.unsubscribe(sub.id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcaster_drains_channel() {
        let hub = Hub::new();
        let mut sub = hub.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(PresenceEvent::reader_found("R")).unwrap();
        tx.send(PresenceEvent::reader_not_found()).unwrap();
        drop(tx);

        run_broadcaster(hub.clone(), rx).await;

        assert_eq!(parse(&sub.messages.recv().await.unwrap())["status"], "found");
        assert_eq!(parse(&sub.messages.recv().await.unwrap())["status"], "not_found");
    }

    fn text_frame(frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) -> serde_json::Value {
        match frame {
            Some(Ok(Message::Text(text))) => parse(&text),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_websocket_subscriber() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = Hub::new();
        hub.publish(&PresenceEvent::reader_found("ACS ACR39U"));
        tokio::spawn(serve(listener, hub.clone()));

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();

        let snapshot = timeout(Duration::from_secs(5), client.next()).await.unwrap();
        let snapshot = text_frame(snapshot);
        assert_eq!(snapshot["status"], "found");
        assert_eq!(snapshot["reader_name"], "ACS ACR39U");

        let record = CardRecord {
            name_th: "สมชาย".to_string(),
            ..Default::default()
        };
        hub.publish(&PresenceEvent::card_data("ACS ACR39U", record));

        let data = timeout(Duration::from_secs(5), client.next()).await.unwrap();
        let data = text_frame(data);
        assert_eq!(data["type"], "card_data");
        assert_eq!(data["data"]["name_th"], "สมชาย");

        client.close(None).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while hub.subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
