//! Schema definitions and well-known keystore keys.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Columns every `sensors` table carries regardless of observed categories.
pub const BASE_SENSOR_COLUMNS: [&str; 4] = ["timestamp", "deviceid", "locationid", "status"];

/// Well-known keystore keys.
pub mod keys {
    /// Serialized [`crate::KeyCompressor`] dictionary.
    pub const SENSOR_SIZER: &str = "sensorDataStringSizer";
    /// Per-family passive-window state.
    pub const REVERSE_ROLLING: &str = "ReverseRollingData";
    /// Serialized classifier model.
    pub const CLASSIFIER_MODEL: &str = "ClassifierModel";
    /// Instant of the last successful calibration.
    pub const LAST_CALIBRATION_TIME: &str = "LastCalibrationTime";
    /// Per-location self-classification accuracy.
    pub const ACCURACY_BREAKDOWN: &str = "AccuracyBreakdown";
    /// Per-algorithm, per-location confusion metrics.
    pub const ALGORITHM_EFFICACY: &str = "AlgorithmEfficacy";
    /// Overall self-classification accuracy.
    pub const PERCENT_CORRECT: &str = "PercentCorrect";
    /// Passphrase granting MQTT access to this family's topics.
    pub const MQTT_PASSPHRASE: &str = "mqttPassphrase";
}

/// Create all tables and indexes for a new family database.
///
/// The `sensors` table starts with only the base columns; category columns
/// are added on demand by `add_sensor` and never dropped.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS keystore (
            key   TEXT NOT NULL PRIMARY KEY,
            value TEXT
        );
        CREATE INDEX IF NOT EXISTS keystore_idx ON keystore(key);

        CREATE TABLE IF NOT EXISTS sensors (
            timestamp  INTEGER NOT NULL PRIMARY KEY,
            deviceid   TEXT,
            locationid TEXT,
            status     TEXT DEFAULT 'active',
            UNIQUE(timestamp)
        );
        CREATE INDEX IF NOT EXISTS sensors_devices ON sensors(deviceid);

        CREATE TABLE IF NOT EXISTS location_predictions (
            timestamp  INTEGER NOT NULL PRIMARY KEY,
            prediction TEXT,
            UNIQUE(timestamp)
        );

        CREATE TABLE IF NOT EXISTS devices (
            id   TEXT PRIMARY KEY,
            name TEXT UNIQUE
        );
        CREATE INDEX IF NOT EXISTS devices_name ON devices(name);

        CREATE TABLE IF NOT EXISTS locations (
            id   TEXT PRIMARY KEY,
            name TEXT UNIQUE
        );

        CREATE TABLE IF NOT EXISTS gps (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER,
            mac       TEXT,
            loc       TEXT,
            lat       REAL,
            lon       REAL,
            alt       REAL
        );
        ",
    )
    .map_err(StoreError::sql("create_tables"))
}

/// Check that a sensor category is usable as a column name.
///
/// Categories come from client JSON and are spliced into DDL, so only a
/// conservative identifier shape is accepted.
///
/// # Errors
///
/// Returns `StoreError::InvalidCategory` otherwise.
pub fn validate_category(category: &str) -> Result<()> {
    let ok = !category.is_empty()
        && category.len() <= 64
        && category
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !BASE_SENSOR_COLUMNS.contains(&category);
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidCategory(category.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_validation() {
        assert!(validate_category("bluetooth").is_ok());
        assert!(validate_category("wifi_5ghz").is_ok());
        assert!(validate_category("").is_err());
        assert!(validate_category("Bluetooth").is_err());
        assert!(validate_category("blue tooth").is_err());
        assert!(validate_category("x; DROP TABLE sensors").is_err());
        assert!(validate_category("timestamp").is_err());
    }

    #[test]
    fn tables_create_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }
}
