//! Delivery fan-out: pushing predictions to WebSocket and MQTT sinks.
//!
//! Deliveries are fire-and-forget. Handlers enqueue onto a bounded work
//! channel; a single worker task drains it and publishes to each sink with
//! a per-call bound. Shutdown closes the channel and waits for the drain,
//! so no delivery leaks on process exit. No ordering is guaranteed across
//! sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use pinpoint_core::{LocationPrediction, SensorData};

/// Bound on each individual sink publish.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Deliveries queued while the worker is busy before senders see backpressure.
const QUEUE_DEPTH: usize = 256;

/// A sink publish failure. Logged, never surfaced to callers.
#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

/// An unreliable fan-out sink.
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Short sink name for log lines.
    fn name(&self) -> &'static str;

    /// Push one payload for `(family, device)`. Best effort.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink rejects or cannot reach its peer.
    async fn publish(&self, family: &str, device: &str, payload: &str)
        -> Result<(), PublishError>;
}

/// The document delivered to every sink.
///
/// `location` and `time` duplicate `guesses[0].location` and
/// `sensors.timestamp`; first-generation clients read them from the top
/// level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    /// The fingerprint the guesses were computed from.
    pub sensors: SensorData,
    /// Guesses in descending probability order.
    pub guesses: Vec<LocationPrediction>,
    /// Top-guess location.
    pub location: String,
    /// Fingerprint timestamp, milliseconds.
    pub time: i64,
}

struct Delivery {
    family: String,
    device: String,
    payload: String,
}

/// Fan-out worker over a bounded delivery queue.
pub struct DeliveryFanout {
    tx: Mutex<Option<mpsc::Sender<Delivery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryFanout {
    /// Spawn the fan-out worker over the given sinks.
    ///
    /// The WebSocket sink receives each payload twice: once for the device
    /// and once for the family-wide `"all"` topic. The MQTT sink, when
    /// present, receives the device topic only.
    #[must_use]
    pub fn new(ws: Arc<dyn PublishSink>, mqtt: Option<Arc<dyn PublishSink>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Delivery>(QUEUE_DEPTH);
        let worker = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                for device in [delivery.device.as_str(), "all"] {
                    publish_bounded(ws.as_ref(), &delivery.family, device, &delivery.payload)
                        .await;
                }
                if let Some(mqtt) = &mqtt {
                    publish_bounded(
                        mqtt.as_ref(),
                        &delivery.family,
                        &delivery.device,
                        &delivery.payload,
                    )
                    .await;
                }
            }
        });
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue one delivery. Drops (with a log line) after shutdown or when
    /// the queue is closed.
    pub async fn send(&self, family: &str, device: &str, payload: String) {
        let tx = self.tx.lock().await.clone();
        let Some(tx) = tx else {
            tracing::warn!(%family, %device, "delivery after shutdown dropped");
            return;
        };
        let delivery = Delivery {
            family: family.to_string(),
            device: device.to_string(),
            payload,
        };
        if tx.send(delivery).await.is_err() {
            tracing::warn!(%family, %device, "delivery queue closed, dropped");
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        self.tx.lock().await.take();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "delivery worker did not stop cleanly");
            }
        }
    }
}

async fn publish_bounded(sink: &dyn PublishSink, family: &str, device: &str, payload: &str) {
    match tokio::time::timeout(PUBLISH_TIMEOUT, sink.publish(family, device, payload)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(sink = sink.name(), %family, %device, error = %e, "publish failed");
        }
        Err(_) => {
            tracing::warn!(sink = sink.name(), %family, %device, "publish timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        published: StdMutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl PublishSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn publish(
            &self,
            family: &str,
            device: &str,
            payload: &str,
        ) -> Result<(), PublishError> {
            self.published.lock().unwrap().push((
                family.to_string(),
                device.to_string(),
                payload.to_string(),
            ));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl PublishSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn publish(&self, _: &str, _: &str, _: &str) -> Result<(), PublishError> {
            Err(PublishError("broker gone".to_string()))
        }
    }

    #[tokio::test]
    async fn ws_sink_receives_device_and_all_topics() {
        let ws = Arc::new(RecordingSink::default());
        let fanout = DeliveryFanout::new(ws.clone(), None);

        fanout.send("home", "phone", "{}".to_string()).await;
        fanout.shutdown().await;

        let published = ws.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].1, "phone");
        assert_eq!(published[1].1, "all");
        assert!(published.iter().all(|(family, _, _)| family == "home"));
    }

    #[tokio::test]
    async fn mqtt_sink_receives_device_topic_only() {
        let ws = Arc::new(RecordingSink::default());
        let mqtt = Arc::new(RecordingSink::default());
        let fanout = DeliveryFanout::new(ws.clone(), Some(mqtt.clone()));

        fanout.send("home", "phone", "{}".to_string()).await;
        fanout.shutdown().await;

        assert_eq!(mqtt.published.lock().unwrap().len(), 1);
        assert_eq!(mqtt.published.lock().unwrap()[0].1, "phone");
    }

    #[tokio::test]
    async fn sink_failure_is_absorbed() {
        let fanout = DeliveryFanout::new(Arc::new(FailingSink), None);
        fanout.send("home", "phone", "{}".to_string()).await;
        fanout.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_pending_deliveries() {
        let ws = Arc::new(RecordingSink::default());
        let fanout = DeliveryFanout::new(ws.clone(), None);

        for i in 0..10 {
            fanout.send("home", &format!("d{i}"), "{}".to_string()).await;
        }
        fanout.shutdown().await;

        assert_eq!(ws.published.lock().unwrap().len(), 20);
        // Sends after shutdown are dropped, not errors.
        fanout.send("home", "late", "{}".to_string()).await;
    }
}
