//! MQTT sink and per-family broker access management.

use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};

use pinpoint_store::schema::keys;
use pinpoint_store::FamilyStore;

use crate::fanout::{PublishError, PublishSink};

const PASSPHRASE_LEN: usize = 16;

/// MQTT publisher over a shared async client.
///
/// The event loop runs on a background task; a lost broker connection is
/// retried there and publishes fail soft in the meantime.
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Connect to a broker and spawn the event loop.
    #[must_use]
    pub fn connect(host: &str, port: u16) -> Self {
        let mut options = MqttOptions::new("pinpoint-server", host, port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut event_loop) = AsyncClient::new(options, 32);
        tokio::spawn(async move {
            loop {
                if let Err(e) = event_loop.poll().await {
                    tracing::debug!(error = %e, "mqtt event loop error, reconnecting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        Self { client }
    }
}

#[async_trait]
impl PublishSink for MqttPublisher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn publish(
        &self,
        family: &str,
        device: &str,
        payload: &str,
    ) -> Result<(), PublishError> {
        let topic = format!("{family}/location/{device}");
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes())
            .await
            .map_err(|e| PublishError(e.to_string()))
    }
}

/// Grant (or rotate) MQTT access for a family.
///
/// Generates a fresh passphrase, stores it in the family keystore and
/// returns it to hand to the caller.
///
/// # Errors
///
/// Returns an error if the keystore write fails.
pub fn add_family(store: &FamilyStore) -> Result<String, pinpoint_store::StoreError> {
    let passphrase: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSPHRASE_LEN)
        .map(char::from)
        .collect();
    store.set(keys::MQTT_PASSPHRASE, &passphrase)?;
    Ok(passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_family_stores_and_rotates_passphrase() {
        let dir = TempDir::new().unwrap();
        let store = FamilyStore::open(dir.path(), "home").unwrap();

        let first = add_family(&store).unwrap();
        assert_eq!(first.len(), PASSPHRASE_LEN);
        assert_eq!(store.get::<String>(keys::MQTT_PASSPHRASE).unwrap(), first);

        let second = add_family(&store).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.get::<String>(keys::MQTT_PASSPHRASE).unwrap(), second);
    }
}
