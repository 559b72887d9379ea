//! The fingerprint ingest pipeline.
//!
//! `process` is the single entry point for both active and passive paths:
//! validate, persist, then (unless the caller asked to just save) hand the
//! fingerprint to a detached delivery that classifies it and fans the
//! prediction out. Persistence failures surface to the caller; delivery
//! failures are logged and absorbed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use pinpoint_core::{Gps, LocationAnalysis, SensorData};
use pinpoint_store::FamilyStore;

use crate::classifier::{Classifier, ClassifierError};
use crate::error::{EngineError, Result};
use crate::fanout::{DeliveryFanout, DeliveryPayload};

/// Bound on one classification pass inside a detached delivery.
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Latitude/longitude sentinel when no GPS is known for the top guess.
const NO_GPS: Gps = Gps {
    lat: -1.0,
    lon: -1.0,
    alt: 0.0,
};

/// Validates, persists and dispatches fingerprints.
pub struct IngestPipeline {
    data_dir: PathBuf,
    classifier: Arc<dyn Classifier>,
    fanout: Arc<DeliveryFanout>,
    // Labeled fingerprints per family since the last calibration. The write
    // lock also serializes concurrent recalibration triggers.
    learned: RwLock<HashMap<String, u64>>,
}

impl IngestPipeline {
    /// Create a pipeline rooted at a data directory.
    #[must_use]
    pub fn new(
        data_dir: PathBuf,
        classifier: Arc<dyn Classifier>,
        fanout: Arc<DeliveryFanout>,
    ) -> Self {
        Self {
            data_dir,
            classifier,
            fanout,
            learned: RwLock::new(HashMap::new()),
        }
    }

    /// The directory family databases live under.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The classifier behind this pipeline.
    #[must_use]
    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    /// Open the store of a family under this pipeline's data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_store(&self, family: &str) -> Result<FamilyStore> {
        Ok(FamilyStore::open(&self.data_dir, family)?)
    }

    /// Ingest one fingerprint.
    ///
    /// When `just_save` is false a detached delivery classifies the
    /// fingerprint and fans the prediction out; its failures never reach
    /// this caller.
    ///
    /// # Errors
    ///
    /// Returns validation and persistence errors.
    pub fn process(self: &Arc<Self>, mut s: SensorData, just_save: bool) -> Result<()> {
        s.normalize();
        s.validate()?;

        let store = self.open_store(&s.family)?;
        store.add_sensor(&s)?;
        if !s.gps.is_zero() {
            store.set_gps(&s)?;
        }
        drop(store);

        if !s.location.is_empty() {
            self.note_learned(&s.family);
        }

        if !just_save {
            let this = Arc::clone(self);
            let family = s.family.clone();
            tokio::spawn(async move {
                if let Err(e) = this.deliver(s).await {
                    tracing::warn!(%family, error = %e, "delivery failed");
                }
            });
        }
        Ok(())
    }

    /// Active-mode locate: persist the fingerprint, classify it and store
    /// the prediction.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NoGuesses` on an empty analysis, plus any
    /// validation, storage or classifier error.
    pub fn locate(&self, mut s: SensorData) -> Result<LocationAnalysis> {
        s.normalize();
        s.validate()?;

        let store = self.open_store(&s.family)?;
        store.add_sensor(&s)?;
        let analysis = self.analyze_with_recovery(&s, &store)?;
        if analysis.guesses.is_empty() {
            return Err(EngineError::NoGuesses);
        }
        store.add_prediction(s.timestamp, &analysis.guesses)?;
        Ok(analysis)
    }

    /// Classify and fan out one saved fingerprint. Bounded; called from a
    /// detached task.
    ///
    /// # Errors
    ///
    /// Returns analysis, timeout and encoding errors; callers log them.
    pub async fn deliver(self: &Arc<Self>, mut s: SensorData) -> Result<()> {
        let this = Arc::clone(self);
        let probe = s.clone();
        let analysis = tokio::time::timeout(
            ANALYZE_TIMEOUT,
            tokio::task::spawn_blocking(move || {
                let store = this.open_store(&probe.family)?;
                this.analyze_with_recovery(&probe, &store)
            }),
        )
        .await
        .map_err(|_| EngineError::Timeout("analysis"))?
        .map_err(|e| EngineError::Internal(format!("analysis task failed: {e}")))??;

        if analysis.guesses.is_empty() {
            return Err(EngineError::NoGuesses);
        }
        let best_location = analysis.guesses[0].location.clone();

        // Enrich the outgoing fingerprint with the top guess's coordinate.
        let store = self.open_store(&s.family)?;
        let gps_data = self.classifier.get_gps_data(&store)?;
        drop(store);
        match gps_data.get(&best_location) {
            Some(gps) => {
                s.gps.lat = gps.lat;
                s.gps.lon = gps.lon;
            }
            None => s.gps = NO_GPS,
        }

        let family = s.family.clone();
        let device = s.device.clone();
        let payload = DeliveryPayload {
            time: s.timestamp,
            location: best_location,
            guesses: analysis.guesses,
            sensors: s,
        };
        let encoded = serde_json::to_string(&payload)?;
        self.fanout.send(&family, &device, encoded).await;
        Ok(())
    }

    /// Classify, recovering once from a missing model by calibrating.
    ///
    /// # Errors
    ///
    /// Returns the classifier error if recovery also fails.
    pub fn analyze_with_recovery(
        &self,
        s: &SensorData,
        store: &FamilyStore,
    ) -> Result<LocationAnalysis> {
        match self.classifier.analyze(s, store) {
            Err(ClassifierError::ModelMissing) => {
                tracing::debug!(family = %store.family(), "model missing, calibrating");
                self.calibrate(store)?;
                Ok(self.classifier.analyze(s, store)?)
            }
            other => Ok(other?),
        }
    }

    /// Rebuild the family's model. Concurrent triggers serialize on the
    /// learned-counter lock; the counter resets on success.
    ///
    /// # Errors
    ///
    /// Returns classifier errors (notably `NoTrainingData`).
    pub fn calibrate(&self, store: &FamilyStore) -> Result<()> {
        let mut learned = self
            .learned
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.classifier.calibrate(store, true)?;
        learned.insert(store.family().to_string(), 0);
        Ok(())
    }

    /// Labeled fingerprints seen for a family since its last calibration.
    #[must_use]
    pub fn learned_since_calibration(&self, family: &str) -> u64 {
        self.learned
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(family)
            .copied()
            .unwrap_or(0)
    }

    fn note_learned(&self, family: &str) {
        let mut learned = self
            .learned
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *learned.entry(family.to_string()).or_default() += 1;
    }
}
