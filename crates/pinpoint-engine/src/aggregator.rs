//! Windowed aggregation of passive scanner reports.
//!
//! Scanners upload *what they see*; predictions need a timeline keyed by
//! *what is being seen*. The aggregator batches scanner reports per family
//! for one time block, then transposes them: every observed
//! `(category, MAC)` becomes a synthetic tracked device named
//! `"<category>-<mac>"` whose readings are keyed by the scanners that saw
//! it (`"<scanner>-<category>"`).
//!
//! Window state lives in the family keystore under `"ReverseRollingData"`;
//! every read-modify-write of that record is serialized by a per-family
//! mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

use pinpoint_core::{normalize_name, Gps, ReverseRollingData, SensorData};
use pinpoint_store::schema::keys;
use pinpoint_store::StoreError;

use crate::error::Result;
use crate::pipeline::IngestPipeline;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Settings update for a family's passive path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReverseSettings {
    /// Family to configure. Required.
    pub family: String,
    /// Tracked device to mark or unmark for learning.
    #[serde(default)]
    pub device: String,
    /// Location label assigned to the device's synthesized fingerprints.
    #[serde(default)]
    pub location: String,
    /// Latitude to attach to the device's synthesized fingerprints.
    #[serde(default)]
    pub lat: f64,
    /// Longitude to attach to the device's synthesized fingerprints.
    #[serde(default)]
    pub lon: f64,
    /// Altitude to attach to the device's synthesized fingerprints.
    #[serde(default)]
    pub alt: f64,
    /// New window length in seconds, when positive.
    #[serde(default)]
    pub window: i64,
    /// New minimum-passive threshold, when non-zero.
    #[serde(default)]
    pub minimum_passive: i64,
}

/// Per-family windowed buffer of passive observations.
pub struct ReverseAggregator {
    pipeline: Arc<IngestPipeline>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    clock: Clock,
}

impl ReverseAggregator {
    /// Create an aggregator feeding the given pipeline.
    #[must_use]
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self::with_clock(pipeline, Arc::new(Utc::now))
    }

    /// Create an aggregator with an injected clock.
    #[must_use]
    pub fn with_clock(pipeline: Arc<IngestPipeline>, clock: Clock) -> Self {
        Self {
            pipeline,
            locks: StdMutex::new(HashMap::new()),
            clock,
        }
    }

    fn family_lock(&self, family: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(family.to_string()).or_default())
    }

    /// Append one scanner report to the family's open window, opening one
    /// if needed. Returns the number of readings recorded.
    ///
    /// # Errors
    ///
    /// Returns validation and storage errors.
    pub async fn record(&self, mut s: SensorData) -> Result<usize> {
        s.normalize();
        s.validate()?;
        let count = s.fingerprint_count();
        let family = s.family.clone();

        let lock = self.family_lock(&family);
        let _guard = lock.lock().await;

        let store = self.pipeline.open_store(&family)?;
        let mut rolling = load_rolling(&store, &family)?;
        if !rolling.has_data {
            rolling.timestamp = (self.clock)();
            rolling.datas.clear();
            rolling.has_data = true;
        }
        rolling.datas.push(s);
        store.set(keys::REVERSE_ROLLING, &rolling)?;

        tracing::debug!(%family, readings = count, "recorded passive fingerprint");
        Ok(count)
    }

    /// Transpose and ingest the family's window if it has expired.
    ///
    /// Returns the number of synthesized fingerprints ingested. The store
    /// handle is released before the child ingests run; each child re-opens
    /// its own.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the window read-modify-write; child
    /// ingest failures are logged and skipped.
    pub async fn flush(&self, family: &str) -> Result<usize> {
        let family = normalize_name(family);
        let lock = self.family_lock(&family);
        let _guard = lock.lock().await;

        let (synthesized, minimum) = {
            let store = self.pipeline.open_store(&family)?;
            let mut rolling = load_rolling(&store, &family)?;
            let now = (self.clock)();
            if !rolling.has_data || now - rolling.timestamp <= rolling.time_block() {
                return Ok(0);
            }
            tracing::debug!(
                %family,
                samples = rolling.datas.len(),
                "window expired, transposing"
            );
            let synthesized = transpose(
                &family,
                &rolling.datas,
                &rolling.device_location,
                &rolling.device_gps,
                now.timestamp_millis(),
            );
            rolling.has_data = false;
            rolling.datas.clear();
            store.set(keys::REVERSE_ROLLING, &rolling)?;
            (synthesized, rolling.minimum_passive)
        };

        let mut ingested = 0;
        for (tracked, data) in synthesized {
            let readings = i64::try_from(data.fingerprint_count()).unwrap_or(i64::MAX);
            if readings < minimum {
                tracing::debug!(
                    %family,
                    %tracked,
                    readings,
                    minimum,
                    "skipped synthesized fingerprint, not enough points"
                );
                continue;
            }
            match self.pipeline.process(data, false) {
                Ok(()) => ingested += 1,
                Err(e) => tracing::warn!(%family, %tracked, error = %e, "problem saving"),
            }
        }
        Ok(ingested)
    }

    /// Apply a settings update to the family's window record and return a
    /// human-readable summary.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn update_settings(&self, mut settings: ReverseSettings) -> Result<String> {
        settings.family = normalize_name(&settings.family);
        settings.device = normalize_name(&settings.device);
        settings.location = normalize_name(&settings.location);
        let family = settings.family.clone();

        let lock = self.family_lock(&family);
        let _guard = lock.lock().await;

        let store = self.pipeline.open_store(&family)?;
        let mut rolling = load_rolling(&store, &family)?;

        let mut message = String::new();
        if !settings.device.is_empty() {
            if settings.location.is_empty() {
                rolling.device_location.remove(&settings.device);
                message = format!("switched to tracking for {family}");
            } else {
                message = format!(
                    "set location to '{}' for {family} for learning with device '{}'",
                    settings.location, settings.device
                );
                rolling
                    .device_location
                    .insert(settings.device.clone(), settings.location.clone());
                if settings.lat != 0.0 && settings.lon != 0.0 {
                    rolling.device_gps.insert(
                        settings.device.clone(),
                        Gps {
                            lat: settings.lat,
                            lon: settings.lon,
                            alt: settings.alt,
                        },
                    );
                }
            }
            message.push_str(". ");
        }
        message.push_str(&format!(
            "now learning on {} devices",
            rolling.device_location.len()
        ));

        if settings.window > 0 {
            rolling.time_block_secs = settings.window;
        }
        message.push_str(&format!(
            " with time block of {} seconds",
            rolling.time_block().num_seconds()
        ));

        if settings.minimum_passive != 0 {
            rolling.minimum_passive = settings.minimum_passive;
            message.push_str(&format!(
                " and minimum passive of {}",
                rolling.minimum_passive
            ));
        }

        store.set(keys::REVERSE_ROLLING, &rolling)?;
        tracing::debug!(%family, %message, "updated passive settings");
        Ok(message)
    }
}

fn load_rolling(
    store: &pinpoint_store::FamilyStore,
    family: &str,
) -> Result<ReverseRollingData> {
    let mut rolling = match store.get::<ReverseRollingData>(keys::REVERSE_ROLLING) {
        Ok(rolling) => rolling,
        Err(StoreError::NotFound(_)) => ReverseRollingData::new(family),
        Err(e) => return Err(e.into()),
    };
    if rolling.time_block_secs == 0 {
        rolling.time_block_secs = pinpoint_core::DEFAULT_TIME_BLOCK_SECS;
    }
    Ok(rolling)
}

/// Transpose one window of scanner reports into synthetic per-device
/// fingerprints keyed by tracked name.
///
/// Duplicate observations of the same `(scanner, category, MAC)` within a
/// window overwrite; last wins.
#[must_use]
pub fn transpose(
    family: &str,
    datas: &[SensorData],
    device_location: &BTreeMap<String, String>,
    device_gps: &BTreeMap<String, Gps>,
    now_ms: i64,
) -> BTreeMap<String, SensorData> {
    let mut sensor_map: BTreeMap<String, SensorData> = BTreeMap::new();
    for data in datas {
        for (category, readings) in &data.sensors {
            for (mac, rssi) in readings {
                let tracked = format!("{category}-{mac}");
                let entry = sensor_map.entry(tracked.clone()).or_insert_with(|| {
                    SensorData {
                        family: family.to_string(),
                        device: tracked.clone(),
                        timestamp: now_ms,
                        location: device_location.get(&tracked).cloned().unwrap_or_default(),
                        gps: device_gps.get(&tracked).copied().unwrap_or_default(),
                        ..SensorData::default()
                    }
                });
                entry
                    .sensors
                    .entry(category.clone())
                    .or_default()
                    .insert(format!("{}-{category}", data.device), *rssi);
            }
        }
    }
    sensor_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NaiveBayes;
    use crate::fanout::DeliveryFanout;
    use crate::fanout::{PublishError, PublishSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tempfile::TempDir;

    struct NullSink;

    #[async_trait]
    impl PublishSink for NullSink {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn publish(&self, _: &str, _: &str, _: &str) -> std::result::Result<(), PublishError> {
            Ok(())
        }
    }

    struct Harness {
        aggregator: ReverseAggregator,
        pipeline: Arc<IngestPipeline>,
        now_ms: Arc<AtomicI64>,
    }

    fn harness(dir: &TempDir) -> Harness {
        let fanout = Arc::new(DeliveryFanout::new(Arc::new(NullSink), None));
        let pipeline = Arc::new(IngestPipeline::new(
            dir.path().to_path_buf(),
            Arc::new(NaiveBayes),
            fanout,
        ));
        let now_ms = Arc::new(AtomicI64::new(1_700_000_000_000));
        let clock_ms = Arc::clone(&now_ms);
        let aggregator = ReverseAggregator::with_clock(
            Arc::clone(&pipeline),
            Arc::new(move || {
                chrono::TimeZone::timestamp_millis_opt(&Utc, clock_ms.load(Ordering::SeqCst))
                    .unwrap()
            }),
        );
        Harness {
            aggregator,
            pipeline,
            now_ms,
        }
    }

    fn scan(device: &str, readings: &[(&str, f64)]) -> SensorData {
        let mut s = SensorData {
            timestamp: 1,
            family: "home".to_string(),
            device: device.to_string(),
            ..SensorData::default()
        };
        let inner = s.sensors.entry("bluetooth".to_string()).or_default();
        for (mac, rssi) in readings {
            inner.insert((*mac).to_string(), *rssi);
        }
        s
    }

    #[test]
    fn transpose_inverts_scanner_and_mac() {
        let datas = vec![
            scan("s1", &[("aa:bb", -50.0)]),
            scan("s2", &[("aa:bb", -70.0), ("cc:dd", -55.0)]),
        ];
        let synthesized = transpose(
            "home",
            &datas,
            &BTreeMap::new(),
            &BTreeMap::new(),
            9_000,
        );

        assert_eq!(synthesized.len(), 2);

        let tracked = &synthesized["bluetooth-aa:bb"];
        assert_eq!(tracked.device, "bluetooth-aa:bb");
        assert_eq!(tracked.family, "home");
        assert_eq!(tracked.timestamp, 9_000);
        let readings = &tracked.sensors["bluetooth"];
        assert_eq!(readings.len(), 2);
        assert!((readings["s1-bluetooth"] - -50.0).abs() < 1e-9);
        assert!((readings["s2-bluetooth"] - -70.0).abs() < 1e-9);

        let other = &synthesized["bluetooth-cc:dd"];
        assert_eq!(other.sensors["bluetooth"].len(), 1);
        assert!((other.sensors["bluetooth"]["s2-bluetooth"] - -55.0).abs() < 1e-9);
    }

    #[test]
    fn transpose_last_wins_within_window() {
        let datas = vec![
            scan("s1", &[("aa:bb", -50.0)]),
            scan("s1", &[("aa:bb", -58.0)]),
        ];
        let synthesized = transpose(
            "home",
            &datas,
            &BTreeMap::new(),
            &BTreeMap::new(),
            9_000,
        );
        let readings = &synthesized["bluetooth-aa:bb"].sensors["bluetooth"];
        assert_eq!(readings.len(), 1);
        assert!((readings["s1-bluetooth"] - -58.0).abs() < 1e-9);
    }

    #[test]
    fn transpose_applies_learning_labels_and_gps() {
        let mut device_location = BTreeMap::new();
        device_location.insert("bluetooth-aa:bb".to_string(), "kitchen".to_string());
        let mut device_gps = BTreeMap::new();
        device_gps.insert(
            "bluetooth-aa:bb".to_string(),
            Gps {
                lat: 1.0,
                lon: 2.0,
                alt: 0.0,
            },
        );

        let datas = vec![scan("s1", &[("aa:bb", -50.0), ("cc:dd", -60.0)])];
        let synthesized = transpose("home", &datas, &device_location, &device_gps, 9_000);

        let learning = &synthesized["bluetooth-aa:bb"];
        assert_eq!(learning.location, "kitchen");
        assert!((learning.gps.lat - 1.0).abs() < 1e-9);

        let tracking = &synthesized["bluetooth-cc:dd"];
        assert_eq!(tracking.location, "");
        assert!(tracking.gps.is_zero());
    }

    #[tokio::test]
    async fn record_rejects_empty_sensors() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);
        let s = SensorData {
            timestamp: 1,
            family: "home".to_string(),
            device: "s1".to_string(),
            ..SensorData::default()
        };
        assert!(h.aggregator.record(s).await.is_err());
    }

    #[tokio::test]
    async fn window_flushes_only_after_expiry() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        h.aggregator
            .record(scan("s1", &[("aa:bb", -50.0)]))
            .await
            .unwrap();
        h.now_ms.fetch_add(1_000, Ordering::SeqCst);
        h.aggregator
            .record(scan("s2", &[("aa:bb", -70.0), ("cc:dd", -55.0)]))
            .await
            .unwrap();

        // Window still open: nothing to flush.
        assert_eq!(h.aggregator.flush("home").await.unwrap(), 0);

        // Advance past the 90 s default block.
        h.now_ms.fetch_add(95_000, Ordering::SeqCst);
        assert_eq!(h.aggregator.flush("home").await.unwrap(), 2);

        let store = h.pipeline.open_store("home").unwrap();
        let tracked = store.get_latest("bluetooth-aa:bb").unwrap();
        let readings = &tracked.sensors["bluetooth"];
        assert_eq!(readings.len(), 2);
        assert!((readings["s1-bluetooth"] - -50.0).abs() < 1e-9);
        assert!((readings["s2-bluetooth"] - -70.0).abs() < 1e-9);
        assert!(store.get_latest("bluetooth-cc:dd").is_ok());

        // The window reset: a second flush is a no-op.
        assert_eq!(h.aggregator.flush("home").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn minimum_passive_suppresses_sparse_fingerprints() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        h.aggregator
            .update_settings(ReverseSettings {
                family: "home".to_string(),
                minimum_passive: 2,
                ..ReverseSettings::default()
            })
            .await
            .unwrap();

        h.aggregator
            .record(scan("s1", &[("aa:bb", -50.0)]))
            .await
            .unwrap();
        h.aggregator
            .record(scan("s2", &[("aa:bb", -70.0), ("cc:dd", -55.0)]))
            .await
            .unwrap();

        h.now_ms.fetch_add(95_000, Ordering::SeqCst);
        assert_eq!(h.aggregator.flush("home").await.unwrap(), 1);

        let store = h.pipeline.open_store("home").unwrap();
        assert!(store.get_latest("bluetooth-aa:bb").is_ok());
        // Seen by one scanner only: below the threshold, never persisted.
        assert!(store.get_latest("bluetooth-cc:dd").is_err());
    }

    #[tokio::test]
    async fn settings_assign_gps_to_synthesized_fingerprints() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        h.aggregator
            .update_settings(ReverseSettings {
                family: "home".to_string(),
                device: "bluetooth-aa:bb".to_string(),
                location: "porch".to_string(),
                lat: 1.0,
                lon: 2.0,
                ..ReverseSettings::default()
            })
            .await
            .unwrap();

        h.aggregator
            .record(scan("s1", &[("aa:bb", -50.0)]))
            .await
            .unwrap();
        h.now_ms.fetch_add(95_000, Ordering::SeqCst);
        h.aggregator.flush("home").await.unwrap();

        let store = h.pipeline.open_store("home").unwrap();
        let tracked = store.get_latest("bluetooth-aa:bb").unwrap();
        assert_eq!(tracked.location, "porch");
        // GPS landed in the gps table via the ingest path.
        let by_location = store.get_location_gps().unwrap();
        assert!((by_location["porch"].lat - 1.0).abs() < 1e-9);
        assert!((by_location["porch"].lon - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn settings_window_and_removal() {
        let dir = TempDir::new().unwrap();
        let h = harness(&dir);

        let message = h
            .aggregator
            .update_settings(ReverseSettings {
                family: "home".to_string(),
                device: "bluetooth-aa:bb".to_string(),
                location: "kitchen".to_string(),
                window: 30,
                ..ReverseSettings::default()
            })
            .await
            .unwrap();
        assert!(message.contains("learning on 1 devices"));
        assert!(message.contains("30 seconds"));

        // Dropping the location switches the device back to tracking.
        let message = h
            .aggregator
            .update_settings(ReverseSettings {
                family: "home".to_string(),
                device: "bluetooth-aa:bb".to_string(),
                ..ReverseSettings::default()
            })
            .await
            .unwrap();
        assert!(message.contains("switched to tracking"));
        assert!(message.contains("learning on 0 devices"));

        let store = h.pipeline.open_store("home").unwrap();
        let rolling: ReverseRollingData = store.get(keys::REVERSE_ROLLING).unwrap();
        assert!(rolling.device_location.is_empty());
        assert_eq!(rolling.time_block_secs, 30);
    }
}
