//! Classifier contract and the baseline naive-Bayes implementation.
//!
//! The engine treats classification as a pure function of a fingerprint and
//! a store snapshot. [`Classifier`] is the seam: swap in an external
//! analysis backend by implementing it. [`NaiveBayes`] is the built-in
//! baseline: per-location histograms over bucketed RSSI values, calibrated
//! from the labeled fingerprints in the store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pinpoint_core::{BinaryStats, Gps, LocationAnalysis, LocationPrediction, SensorData};
use pinpoint_store::schema::keys;
use pinpoint_store::{FamilyStore, StoreError};

/// A result type using `ClassifierError`.
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Errors raised by classifier operations.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// No calibrated model exists for this family yet.
    #[error("model missing")]
    ModelMissing,

    /// The family has no labeled fingerprints to calibrate from.
    #[error("no training data")]
    NoTrainingData,

    /// Storage layer error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The model could not be encoded or decoded.
    #[error("model encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One active device grouped under a location.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveDevice {
    /// Device name.
    pub device: String,
    /// When the device was last observed.
    pub timestamp: DateTime<Utc>,
    /// Probability of the grouping guess.
    pub probability: f64,
    /// Minutes the device has been active.
    pub active_mins: f64,
}

/// Devices currently placed at one location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationDevices {
    /// The location label.
    pub location: String,
    /// Devices at this location, most recent first.
    pub devices: Vec<ActiveDevice>,
}

/// The classification seam.
///
/// `analyze` must be pure with respect to the store snapshot; `calibrate`
/// is the only operation that mutates model state.
pub trait Classifier: Send + Sync {
    /// Classify a fingerprint against the family's calibrated model.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::ModelMissing` if the family was never
    /// calibrated.
    fn analyze(&self, s: &SensorData, store: &FamilyStore) -> Result<LocationAnalysis>;

    /// Rebuild the model from the family's labeled fingerprints. Blocking.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::NoTrainingData` if nothing is labeled.
    fn calibrate(&self, store: &FamilyStore, quiet: bool) -> Result<()>;

    /// Group recently-seen devices by their predicted location.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn get_by_location(
        &self,
        store: &FamilyStore,
        minutes_ago: i64,
        active_only: bool,
        max_devices_per_location: usize,
        device_counts: &HashMap<String, i64>,
    ) -> Result<Vec<LocationDevices>>;

    /// GPS coordinate per labeled location, for prediction enrichment.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn get_gps_data(&self, store: &FamilyStore) -> Result<HashMap<String, Gps>>;
}

/// RSSI bucket width in dBm. Readings this close apart are treated as the
/// same observation.
const BUCKET_WIDTH: f64 = 5.0;

/// Additive smoothing applied to unseen (reading, bucket) pairs.
const SMOOTHING: f64 = 0.5;

/// Name under which this algorithm reports its confusion metrics.
const ALGORITHM: &str = "naive_bayes";

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocationStats {
    fingerprints: u64,
    // composite reading key ("<category>-<mac>") → RSSI bucket → count
    buckets: BTreeMap<String, BTreeMap<i64, u64>>,
}

/// Per-family model: one histogram set per labeled location.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BayesModel {
    locations: BTreeMap<String, LocationStats>,
}

impl BayesModel {
    fn train(data: &[SensorData]) -> Self {
        let mut model = Self::default();
        for s in data {
            let stats = model.locations.entry(s.location.clone()).or_default();
            stats.fingerprints += 1;
            for (key, bucket) in observations(s) {
                *stats.buckets.entry(key).or_default().entry(bucket).or_default() += 1;
            }
        }
        model
    }

    /// Posterior probabilities per location, best first.
    fn classify(&self, s: &SensorData) -> Vec<LocationPrediction> {
        if self.locations.is_empty() {
            return Vec::new();
        }
        let total: u64 = self.locations.values().map(|l| l.fingerprints).sum();
        let readings: Vec<(String, i64)> = observations(s).collect();

        let mut scores: Vec<(String, f64)> = self
            .locations
            .iter()
            .map(|(location, stats)| {
                #[allow(clippy::cast_precision_loss)]
                let prior = (stats.fingerprints as f64 / total as f64).ln();
                let likelihood: f64 = readings
                    .iter()
                    .map(|(key, bucket)| {
                        let count = stats
                            .buckets
                            .get(key)
                            .and_then(|b| b.get(bucket))
                            .copied()
                            .unwrap_or(0);
                        #[allow(clippy::cast_precision_loss)]
                        let p = (count as f64 + SMOOTHING)
                            / (stats.fingerprints as f64 + 2.0 * SMOOTHING);
                        p.ln()
                    })
                    .sum();
                (location.clone(), prior + likelihood)
            })
            .collect();

        // Softmax over log-scores, stabilized around the maximum.
        let max = scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut norm = 0.0;
        for (_, score) in &mut scores {
            *score = (*score - max).exp();
            norm += *score;
        }
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scores
            .into_iter()
            .map(|(location, score)| LocationPrediction {
                location,
                probability: score / norm,
                active_mins: 0.0,
            })
            .collect()
    }
}

/// Composite reading keys and RSSI buckets of one fingerprint.
fn observations(s: &SensorData) -> impl Iterator<Item = (String, i64)> + '_ {
    s.sensors.iter().flat_map(|(category, readings)| {
        readings.iter().map(move |(mac, value)| {
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (value / BUCKET_WIDTH).round() as i64;
            (format!("{category}-{mac}"), bucket)
        })
    })
}

/// Baseline classifier. Stateless; the model lives in the family keystore.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveBayes;

impl NaiveBayes {
    fn load_model(store: &FamilyStore) -> Result<BayesModel> {
        match store.get::<String>(keys::CLASSIFIER_MODEL) {
            Ok(encoded) => Ok(serde_json::from_str(&encoded)?),
            Err(StoreError::NotFound(_)) => Err(ClassifierError::ModelMissing),
            Err(e) => Err(e.into()),
        }
    }
}

impl Classifier for NaiveBayes {
    fn analyze(&self, s: &SensorData, store: &FamilyStore) -> Result<LocationAnalysis> {
        let model = Self::load_model(store)?;
        Ok(LocationAnalysis {
            guesses: model.classify(s),
        })
    }

    fn calibrate(&self, store: &FamilyStore, quiet: bool) -> Result<()> {
        let data = store.get_all_for_classification()?;
        if data.is_empty() {
            return Err(ClassifierError::NoTrainingData);
        }
        let model = BayesModel::train(&data);

        // Self-classification over the training set yields the efficacy
        // numbers surfaced on /efficacy.
        let mut confusion: HashMap<String, BinaryStats> = HashMap::new();
        let mut per_location: HashMap<String, (u64, u64)> = HashMap::new();
        let mut correct = 0_u64;
        for s in &data {
            let guessed = model
                .classify(s)
                .first()
                .map(|g| g.location.clone())
                .unwrap_or_default();
            let hit = guessed == s.location;
            correct += u64::from(hit);
            let tally = per_location.entry(s.location.clone()).or_default();
            tally.0 += u64::from(hit);
            tally.1 += 1;
            for location in model.locations.keys() {
                let stats = confusion.entry(location.clone()).or_default();
                match (*location == s.location, *location == guessed) {
                    (true, true) => stats.true_positives += 1,
                    (true, false) => stats.false_negatives += 1,
                    (false, true) => stats.false_positives += 1,
                    (false, false) => stats.true_negatives += 1,
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let percent_correct = correct as f64 / data.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let accuracy_breakdown: HashMap<String, f64> = per_location
            .into_iter()
            .map(|(location, (hits, total))| (location, hits as f64 / total as f64))
            .collect();
        let efficacy: HashMap<&str, &HashMap<String, BinaryStats>> =
            HashMap::from([(ALGORITHM, &confusion)]);

        store.set(keys::CLASSIFIER_MODEL, &serde_json::to_string(&model)?)?;
        store.set(keys::ACCURACY_BREAKDOWN, &accuracy_breakdown)?;
        store.set(keys::ALGORITHM_EFFICACY, &efficacy)?;
        store.set(keys::PERCENT_CORRECT, &percent_correct)?;
        store.set(keys::LAST_CALIBRATION_TIME, &Utc::now())?;

        if !quiet {
            tracing::info!(
                family = %store.family(),
                fingerprints = data.len(),
                locations = model.locations.len(),
                percent_correct,
                "calibrated"
            );
        }
        Ok(())
    }

    fn get_by_location(
        &self,
        store: &FamilyStore,
        minutes_ago: i64,
        active_only: bool,
        max_devices_per_location: usize,
        device_counts: &HashMap<String, i64>,
    ) -> Result<Vec<LocationDevices>> {
        let sensors = store.get_sensor_from_greater_time(minutes_ago * 60 * 1000)?;

        let mut grouped: BTreeMap<String, Vec<ActiveDevice>> = BTreeMap::new();
        for s in sensors {
            if active_only && device_counts.get(&s.device).copied().unwrap_or(0) == 0 {
                continue;
            }
            let guesses = match store.get_prediction(s.timestamp) {
                Ok(guesses) => guesses,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let Some(best) = guesses.first() else {
                continue;
            };
            let Some(timestamp) = chrono::TimeZone::timestamp_millis_opt(&Utc, s.timestamp).single()
            else {
                continue;
            };
            grouped.entry(best.location.clone()).or_default().push(ActiveDevice {
                device: s.device,
                timestamp,
                probability: best.probability,
                active_mins: best.active_mins,
            });
        }

        Ok(grouped
            .into_iter()
            .map(|(location, mut devices)| {
                devices.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                if max_devices_per_location > 0 {
                    devices.truncate(max_devices_per_location);
                }
                LocationDevices { location, devices }
            })
            .collect())
    }

    fn get_gps_data(&self, store: &FamilyStore) -> Result<HashMap<String, Gps>> {
        Ok(store.get_location_gps()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn labeled(timestamp: i64, location: &str, readings: &[(&str, f64)]) -> SensorData {
        let mut s = SensorData {
            timestamp,
            family: "home".to_string(),
            device: "phone".to_string(),
            location: location.to_string(),
            ..SensorData::default()
        };
        let inner = s.sensors.entry("bluetooth".to_string()).or_default();
        for (mac, value) in readings {
            inner.insert((*mac).to_string(), *value);
        }
        s
    }

    fn trained_store(dir: &TempDir) -> FamilyStore {
        let store = FamilyStore::open(dir.path(), "home").unwrap();
        for (i, rssi) in [-40.0, -41.0, -39.0].iter().enumerate() {
            store
                .add_sensor(&labeled(i as i64 + 1, "kitchen", &[("aa:bb", *rssi)]))
                .unwrap();
        }
        for (i, rssi) in [-70.0, -71.0].iter().enumerate() {
            store
                .add_sensor(&labeled(i as i64 + 10, "bedroom", &[("cc:dd", *rssi)]))
                .unwrap();
        }
        NaiveBayes.calibrate(&store, true).unwrap();
        store
    }

    #[test]
    fn analyze_without_model_reports_missing() {
        let dir = TempDir::new().unwrap();
        let store = FamilyStore::open(dir.path(), "home").unwrap();
        let s = labeled(1, "", &[("aa:bb", -40.0)]);
        assert!(matches!(
            NaiveBayes.analyze(&s, &store),
            Err(ClassifierError::ModelMissing)
        ));
    }

    #[test]
    fn calibrate_requires_labeled_data() {
        let dir = TempDir::new().unwrap();
        let store = FamilyStore::open(dir.path(), "home").unwrap();
        assert!(matches!(
            NaiveBayes.calibrate(&store, true),
            Err(ClassifierError::NoTrainingData)
        ));
    }

    #[test]
    fn repeat_fingerprint_classifies_to_its_location() {
        let dir = TempDir::new().unwrap();
        let store = trained_store(&dir);

        let probe = labeled(100, "", &[("aa:bb", -40.0)]);
        let analysis = NaiveBayes.analyze(&probe, &store).unwrap();
        let best = analysis.best().unwrap();
        assert_eq!(best.location, "kitchen");
        assert!(best.probability >= 0.5, "probability {}", best.probability);

        // Guesses descend and sum to one.
        let sum: f64 = analysis.guesses.iter().map(|g| g.probability).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(analysis.guesses.windows(2).all(|w| w[0].probability >= w[1].probability));
    }

    #[test]
    fn calibrate_stores_efficacy() {
        let dir = TempDir::new().unwrap();
        let store = trained_store(&dir);

        let percent: f64 = store.get(keys::PERCENT_CORRECT).unwrap();
        assert!(percent > 0.9);

        let breakdown: HashMap<String, f64> = store.get(keys::ACCURACY_BREAKDOWN).unwrap();
        assert!(breakdown.contains_key("kitchen"));
        assert!(breakdown.contains_key("bedroom"));

        let efficacy: HashMap<String, HashMap<String, BinaryStats>> =
            store.get(keys::ALGORITHM_EFFICACY).unwrap();
        let kitchen = &efficacy[ALGORITHM]["kitchen"];
        assert_eq!(kitchen.true_positives, 3);
        assert_eq!(kitchen.false_negatives, 0);

        assert!(store.get::<DateTime<Utc>>(keys::LAST_CALIBRATION_TIME).is_ok());
    }

    #[test]
    fn by_location_groups_predictions() {
        let dir = TempDir::new().unwrap();
        let store = trained_store(&dir);

        let tracked = labeled(5000, "", &[("aa:bb", -40.0)]);
        store.add_sensor(&tracked).unwrap();
        let analysis = NaiveBayes.analyze(&tracked, &store).unwrap();
        store.add_prediction(5000, &analysis.guesses).unwrap();

        let counts = store.get_device_counts().unwrap();
        let grouped = NaiveBayes
            .get_by_location(&store, 60, false, 3, &counts)
            .unwrap();
        let kitchen = grouped.iter().find(|g| g.location == "kitchen").unwrap();
        assert!(kitchen.devices.iter().any(|d| d.device == "phone"));
    }
}
