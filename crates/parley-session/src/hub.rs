use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A new [`parley_core::Message`] was appended.
pub const EVENT_MESSAGE: &str = "message";
/// The session's complete call history changed.
pub const EVENT_HISTORY: &str = "history";

/// Outbound queue depth per subscriber. A subscriber that falls this far
/// behind is dropped rather than backing up the broadcast path.
const SUBSCRIBER_QUEUE: usize = 256;

/// One frame pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

struct Subscriber {
    session_id: String,
    tx: mpsc::Sender<PushFrame>,
}

/// Per-session fan-out of typed events.
#[derive(Default)]
pub struct PushHub {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl PushHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a subscriber for one session; returns its id and the frame
    /// stream. The stream closing means the subscriber was dropped.
    pub async fn register(&self, session_id: &str) -> (Uuid, mpsc::Receiver<PushFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers.write().await.insert(
            id,
            Subscriber {
                session_id: session_id.to_string(),
                tx,
            },
        );
        info!(subscriber = %id, session_id = %session_id, "subscriber registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: Uuid) {
        if self.subscribers.write().await.remove(&id).is_some() {
            info!(subscriber = %id, "subscriber unregistered");
        }
    }

    /// Enqueues an event to every live subscriber of `session_id`. Full or
    /// closed queues drop their subscriber.
    pub async fn broadcast(&self, session_id: &str, kind: &str, data: serde_json::Value) {
        let frame = PushFrame {
            kind: kind.to_string(),
            session_id: session_id.to_string(),
            data,
            timestamp: Utc::now(),
        };

        let mut dead = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sub) in subscribers.iter() {
                if sub.session_id != session_id {
                    continue;
                }
                if let Err(e) = sub.tx.try_send(frame.clone()) {
                    warn!(subscriber = %id, error = %e, "subscriber lagging, dropping");
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                subscribers.remove(&id);
            }
        }
        debug!(session_id = %session_id, kind = %kind, "event broadcast");
    }

    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .values()
            .filter(|s| s.session_id == session_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_session_subscribers_only() {
        let hub = PushHub::new();
        let (_id_a, mut rx_a) = hub.register("sess_a").await;
        let (_id_b, mut rx_b) = hub.register("sess_b").await;

        hub.broadcast("sess_a", EVENT_MESSAGE, serde_json::json!({"x": 1}))
            .await;

        let frame = rx_a.recv().await.unwrap();
        assert_eq!(frame.kind, "message");
        assert_eq!(frame.session_id, "sess_a");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let hub = PushHub::new();
        let (id, mut rx) = hub.register("sess_a").await;
        hub.unregister(id).await;
        // Sender dropped: the stream ends.
        assert!(rx.recv().await.is_none());
        assert_eq!(hub.subscriber_count("sess_a").await, 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let hub = PushHub::new();
        let (_id, mut rx) = hub.register("sess_a").await;

        // Never draining: overflow the bounded queue.
        for i in 0..(SUBSCRIBER_QUEUE + 10) {
            hub.broadcast("sess_a", EVENT_MESSAGE, serde_json::json!(i))
                .await;
        }
        assert_eq!(hub.subscriber_count("sess_a").await, 0);

        // The queued frames are still readable, then the stream ends.
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE);
    }

    #[tokio::test]
    async fn test_frame_wire_shape() {
        let frame = PushFrame {
            kind: "history".into(),
            session_id: "sess_a".into(),
            data: serde_json::json!([]),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "history");
        assert_eq!(json["sessionId"], "sess_a");
        assert!(json.get("timestamp").is_some());
    }
}
