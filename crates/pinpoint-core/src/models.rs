//! Domain types for fingerprints, predictions and passive-window state.
//!
//! These types cross every crate boundary: the gateway binds them from JSON,
//! the store persists them, the engine transposes and classifies them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default passive-window length in seconds, substituted whenever a stored
/// window record carries a zero block.
pub const DEFAULT_TIME_BLOCK_SECS: i64 = 90;

/// Inner reading map of one sensor category: MAC address to RSSI-like value.
pub type SensorValues = BTreeMap<String, f64>;

/// Readings of one fingerprint: sensor category to its reading map.
pub type SensorReadings = BTreeMap<String, SensorValues>;

/// Normalize a user-supplied identifier: trimmed and lowercased.
///
/// Applied to families, devices and locations at every boundary.
#[must_use]
pub fn normalize_name(s: &str) -> String {
    s.trim().to_lowercase()
}

/// A GPS coordinate. `(0, 0)` latitude/longitude means "absent".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Gps {
    /// Latitude in degrees.
    #[serde(default)]
    pub lat: f64,
    /// Longitude in degrees.
    #[serde(default)]
    pub lon: f64,
    /// Altitude in meters.
    #[serde(default)]
    pub alt: f64,
}

impl Gps {
    /// Whether this coordinate is the "absent" sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// The atomic observation: one timestamped multi-sensor fingerprint
/// emitted by a scanning device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorData {
    /// Milliseconds since the Unix epoch, UTC.
    #[serde(default)]
    pub timestamp: i64,
    /// Tenant/site namespace. Lowercased and trimmed.
    #[serde(default)]
    pub family: String,
    /// Reporting (or tracked) device name, unique within a family.
    #[serde(default)]
    pub device: String,
    /// Optional location label, used for learning.
    #[serde(default)]
    pub location: String,
    /// Optional GPS coordinate of the observation.
    #[serde(default)]
    pub gps: Gps,
    /// Sparse readings keyed by sensor category, then by MAC.
    #[serde(default)]
    pub sensors: SensorReadings,
}

impl SensorData {
    /// Lowercase and trim the family, device and location in place.
    pub fn normalize(&mut self) {
        self.family = normalize_name(&self.family);
        self.device = normalize_name(&self.device);
        self.location = normalize_name(&self.location);
    }

    /// Total number of readings across all sensor categories.
    #[must_use]
    pub fn fingerprint_count(&self) -> usize {
        self.sensors.values().map(BTreeMap::len).sum()
    }

    /// Check that the fingerprint is persistable.
    ///
    /// # Errors
    ///
    /// Returns an error if the family is empty, the timestamp is not
    /// positive, or every reading map is empty.
    pub fn validate(&self) -> Result<(), CoreError> {
        if normalize_name(&self.family).is_empty() {
            return Err(CoreError::EmptyFamily);
        }
        if self.timestamp <= 0 {
            return Err(CoreError::BadTimestamp);
        }
        if self.fingerprint_count() == 0 {
            return Err(CoreError::NoFingerprints);
        }
        Ok(())
    }
}

/// One guess of a location analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPrediction {
    /// The guessed location label.
    pub location: String,
    /// Probability of the guess, in `[0, 1]`.
    pub probability: f64,
    /// Minutes the device has been active at this location.
    #[serde(default)]
    pub active_mins: f64,
}

/// The ordered result of classifying a fingerprint, best guess first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationAnalysis {
    /// Guesses in descending probability order.
    pub guesses: Vec<LocationPrediction>,
}

impl LocationAnalysis {
    /// The top guess, if any.
    #[must_use]
    pub fn best(&self) -> Option<&LocationPrediction> {
        self.guesses.first()
    }
}

/// Per-family window state for the passive/reverse path, stored in the
/// keystore under `"ReverseRollingData"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseRollingData {
    /// Family this window belongs to. A window never spans families.
    pub family: String,
    /// Window-open instant.
    pub timestamp: DateTime<Utc>,
    /// Window length in seconds. Zero on load resets to the default.
    pub time_block_secs: i64,
    /// Whether a window is currently open.
    pub has_data: bool,
    /// Raw scanner observations accumulated in the open window.
    pub datas: Vec<SensorData>,
    /// Tracked name to location label; presence marks learning mode.
    pub device_location: BTreeMap<String, String>,
    /// Tracked name to GPS coordinate, applied to synthesized fingerprints.
    pub device_gps: BTreeMap<String, Gps>,
    /// Synthesized fingerprints with fewer total readings are dropped.
    pub minimum_passive: i64,
}

impl Default for ReverseRollingData {
    fn default() -> Self {
        Self {
            family: String::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            time_block_secs: DEFAULT_TIME_BLOCK_SECS,
            has_data: false,
            datas: Vec::new(),
            device_location: BTreeMap::new(),
            device_gps: BTreeMap::new(),
            minimum_passive: 0,
        }
    }
}

impl ReverseRollingData {
    /// A fresh window record for the given family.
    #[must_use]
    pub fn new(family: &str) -> Self {
        Self {
            family: family.to_string(),
            ..Self::default()
        }
    }

    /// The effective window length, substituting the default for zero.
    #[must_use]
    pub fn time_block(&self) -> chrono::Duration {
        let secs = if self.time_block_secs == 0 {
            DEFAULT_TIME_BLOCK_SECS
        } else {
            self.time_block_secs
        };
        chrono::Duration::seconds(secs)
    }
}

/// Confusion-matrix counts for one location, produced by calibration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BinaryStats {
    /// Fingerprints of this location classified as this location.
    pub true_positives: u64,
    /// Fingerprints of this location classified elsewhere.
    pub false_negatives: u64,
    /// Fingerprints of other locations classified as this location.
    pub false_positives: u64,
    /// Fingerprints of other locations classified elsewhere.
    pub true_negatives: u64,
}

impl BinaryStats {
    /// Sensitivity (`tp / (tp + fn)`), or zero when undefined.
    #[must_use]
    pub fn sensitivity(&self) -> f64 {
        let denom = self.true_positives + self.false_negatives;
        if denom == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.true_positives as f64 / denom as f64
        }
    }
}
