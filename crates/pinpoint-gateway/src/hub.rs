//! WebSocket hub: a broadcast channel keyed by family and device.
//!
//! Deliveries are published once per topic; each connected socket filters
//! the broadcast stream down to its own `(family, device)` subscription.
//! Slow clients lag and drop messages rather than block the hub.

use async_trait::async_trait;
use tokio::sync::broadcast;

use pinpoint_engine::{PublishError, PublishSink};

const HUB_CAPACITY: usize = 256;

/// One published delivery.
#[derive(Debug, Clone)]
pub struct HubMessage {
    /// Family the delivery belongs to.
    pub family: String,
    /// Device topic: a device name, or `"all"` for the family-wide copy.
    pub device: String,
    /// The serialized delivery payload.
    pub payload: String,
}

/// Fan-out hub shared by all WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsHub {
    tx: broadcast::Sender<HubMessage>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the raw broadcast stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.tx.subscribe()
    }

    /// Publish one payload. A hub with no subscribers drops it silently.
    pub fn broadcast(&self, family: &str, device: &str, payload: &str) {
        let _ = self.tx.send(HubMessage {
            family: family.to_string(),
            device: device.to_string(),
            payload: payload.to_string(),
        });
    }
}

#[async_trait]
impl PublishSink for WsHub {
    fn name(&self) -> &'static str {
        "websockets"
    }

    async fn publish(&self, family: &str, device: &str, payload: &str)
        -> Result<(), PublishError> {
        self.broadcast(family, device, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_messages() {
        let hub = WsHub::new();
        let mut rx = hub.subscribe();

        hub.broadcast("home", "phone", "{}");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.family, "home");
        assert_eq!(msg.device, "phone");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let hub = WsHub::new();
        hub.broadcast("home", "phone", "{}");
    }
}
