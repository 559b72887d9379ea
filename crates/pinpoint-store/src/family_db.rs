//! Per-family SQLite store.
//!
//! One [`FamilyStore`] wraps one family database. Handles are cheap: they
//! are opened per request and dropped at request end; SQLite (in WAL mode)
//! provides the concurrency underneath.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use pinpoint_core::{normalize_name, LocationPrediction, SensorData, SensorReadings};

use crate::compress::KeyCompressor;
use crate::error::{Result, StoreError};
use crate::schema::{self, keys, BASE_SENSOR_COLUMNS};

const DB_SUFFIX: &str = ".sqlite3.db";

/// A handle on one family's database.
pub struct FamilyStore {
    conn: Connection,
    family: String,
}

impl FamilyStore {
    /// Open (creating if necessary) the database for a family.
    ///
    /// The family name is normalized first; the database file lives under
    /// `data_dir` with a base58-encoded filename so the family list can be
    /// recovered from the directory (see [`list_families`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the family is empty after normalization or the
    /// database cannot be opened.
    pub fn open<P: AsRef<Path>>(data_dir: P, family: &str) -> Result<Self> {
        let family = normalize_name(family);
        if family.is_empty() {
            return Err(StoreError::EmptyFamily);
        }

        std::fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            op: "open",
            source,
        })?;
        let path = data_dir.as_ref().join(db_file_name(&family));

        let conn = Connection::open(path).map_err(StoreError::sql("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::sql("open"))?;
        schema::create_tables(&conn)?;

        Ok(Self { conn, family })
    }

    /// The normalized family this store belongs to.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    // =========================================================================
    // Keystore
    // =========================================================================

    /// Set a JSON-encoded value in the keystore. Upserts.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the upsert fails.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value).map_err(StoreError::json("set"))?;
        kv_set(&self.conn, "set", key, &encoded)
    }

    /// Get the value associated with a key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let encoded = self
            .conn
            .query_row(
                "SELECT value FROM keystore WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::sql("get"))?
            .ok_or(StoreError::NotFound("get"))?;
        serde_json::from_str(&encoded).map_err(StoreError::json("get"))
    }

    /// Fetch several keystore values at once, keyed by their keys.
    ///
    /// Absent keys are simply missing from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decoding fails.
    pub fn get_many(&self, wanted: &[&str]) -> Result<HashMap<String, serde_json::Value>> {
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; wanted.len()].join(",");
        let sql = format!("SELECT key, value FROM keystore WHERE key IN ({placeholders})");
        let mut stmt = self.conn.prepare(&sql).map_err(StoreError::sql("get_many"))?;
        let rows = stmt
            .query_map(params_from_iter(wanted.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(StoreError::sql("get_many"))?;

        let mut values = HashMap::new();
        for row in rows {
            let (key, encoded) = row.map_err(StoreError::sql("get_many"))?;
            let value = serde_json::from_str(&encoded).map_err(StoreError::json("get_many"))?;
            values.insert(key, value);
        }
        Ok(values)
    }

    /// List keystore keys matching a SQL `LIKE` pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_keys(&self, like: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM keystore WHERE key LIKE ?1")
            .map_err(StoreError::sql("get_keys"))?;
        let rows = stmt
            .query_map(params![like], |row| row.get::<_, String>(0))
            .map_err(StoreError::sql("get_keys"))?;
        rows.collect::<std::result::Result<_, _>>()
            .map_err(StoreError::sql("get_keys"))
    }

    // =========================================================================
    // Sensors
    // =========================================================================

    /// Current columns of the `sensors` table, base columns included.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be inspected.
    pub fn sensor_columns(&self) -> Result<Vec<String>> {
        let stmt = self
            .conn
            .prepare("SELECT * FROM sensors LIMIT 1")
            .map_err(StoreError::sql("sensor_columns"))?;
        Ok(stmt.column_names().iter().map(ToString::to_string).collect())
    }

    /// Insert or update one fingerprint.
    ///
    /// Unseen sensor categories widen the table with new columns (add-only);
    /// reading maps are compressed through the key dictionary. The dictionary
    /// extension and the row that depends on it commit in one transaction,
    /// dictionary first, so readers never observe a row encoded under an
    /// unpersisted dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if a category is not a valid column name or any
    /// statement fails; the transaction rolls back as a unit.
    pub fn add_sensor(&self, s: &SensorData) -> Result<()> {
        let existing: HashSet<String> = self.sensor_columns()?.into_iter().collect();

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(StoreError::sql("add_sensor"))?;

        for category in s.sensors.keys() {
            schema::validate_category(category)?;
            if !existing.contains(category) {
                tx.execute(
                    &format!("ALTER TABLE sensors ADD COLUMN {category} TEXT"),
                    [],
                )
                .map_err(StoreError::sql("add_sensor"))?;
                tracing::debug!(family = %self.family, %category, "widened sensors table");
            }
        }

        let mut compressor = load_compressor(&tx)?;
        let mut columns: Vec<&str> = BASE_SENSOR_COLUMNS.to_vec();
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Integer(s.timestamp),
            SqlValue::Text(ensure_id(&tx, "devices", &s.device)?),
            SqlValue::Text(if s.location.is_empty() {
                String::new()
            } else {
                ensure_id(&tx, "locations", &s.location)?
            }),
            SqlValue::Text("active".to_string()),
        ];
        for (category, readings) in &s.sensors {
            columns.push(category);
            values.push(SqlValue::Text(compressor.shrink_map_to_string(readings)));
        }

        if compressor.is_dirty() {
            let encoded = serde_json::to_string(&compressor.save()?)
                .map_err(StoreError::json("add_sensor"))?;
            kv_set(&tx, "add_sensor", keys::SENSOR_SIZER, &encoded)?;
        }

        let placeholders = vec!["?"; columns.len()].join(",");
        let updates = columns
            .iter()
            .skip(1) // timestamp is the conflict key
            .map(|c| format!("{c}=excluded.{c}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "INSERT INTO sensors ({}) VALUES ({placeholders})
             ON CONFLICT(timestamp) DO UPDATE SET {updates}",
            columns.join(",")
        );
        tx.execute(&sql, params_from_iter(values.iter()))
            .map_err(StoreError::sql("add_sensor"))?;

        tx.commit().map_err(StoreError::sql("add_sensor"))
    }

    /// Latest fingerprint for a device.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the device has no fingerprints.
    pub fn get_latest(&self, device: &str) -> Result<SensorData> {
        let id = short_id(&normalize_name(device));
        self.query_sensors(
            "get_latest",
            "SELECT * FROM sensors WHERE deviceid = ?1 ORDER BY timestamp DESC LIMIT 1",
            params![id],
        )?
        .into_iter()
        .next()
        .ok_or(StoreError::NotFound("get_latest"))
    }

    /// Fingerprint stored at an exact timestamp.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no row carries that timestamp.
    pub fn get_sensor_from_time(&self, timestamp: i64) -> Result<SensorData> {
        self.query_sensors(
            "get_sensor_from_time",
            "SELECT * FROM sensors WHERE timestamp = ?1",
            params![timestamp],
        )?
        .into_iter()
        .next()
        .ok_or(StoreError::NotFound("get_sensor_from_time"))
    }

    /// Timestamp of the most recent fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` on an empty table.
    pub fn get_last_sensor_timestamp(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT timestamp FROM sensors ORDER BY timestamp DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::sql("get_last_sensor_timestamp"))?
            .ok_or(StoreError::NotFound("get_last_sensor_timestamp"))
    }

    /// Latest fingerprint per device within `window_ms` of the newest row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails; an empty table yields an empty
    /// list.
    pub fn get_sensor_from_greater_time(&self, window_ms: i64) -> Result<Vec<SensorData>> {
        let latest = match self.get_last_sensor_timestamp() {
            Ok(ts) => ts,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let minimum = latest - window_ms;
        tracing::debug!(family = %self.family, minimum, "window query");
        self.query_sensors(
            "get_sensor_from_greater_time",
            "SELECT * FROM sensors WHERE timestamp IN
               (SELECT MAX(timestamp) FROM sensors WHERE timestamp > ?1 GROUP BY deviceid)
             ORDER BY timestamp DESC",
            params![minimum],
        )
    }

    /// All fingerprints, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_fingerprints(&self) -> Result<Vec<SensorData>> {
        self.query_sensors(
            "get_all_fingerprints",
            "SELECT * FROM sensors ORDER BY timestamp",
            params![],
        )
    }

    /// Fingerprints usable as training data: labeled and active.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_for_classification(&self) -> Result<Vec<SensorData>> {
        self.query_sensors(
            "get_all_for_classification",
            "SELECT * FROM sensors WHERE locationid != '' AND status = 'active'
             ORDER BY timestamp",
            params![],
        )
    }

    /// Unlabeled fingerprints (tracking traffic).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all_not_for_classification(&self) -> Result<Vec<SensorData>> {
        self.query_sensors(
            "get_all_not_for_classification",
            "SELECT * FROM sensors WHERE locationid = '' ORDER BY timestamp",
            params![],
        )
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Number of labeled fingerprints.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn total_learned_count(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT count(timestamp) FROM sensors WHERE locationid != ''",
                [],
                |row| row.get(0),
            )
            .map_err(StoreError::sql("total_learned_count"))
    }

    /// Fingerprint counts per location name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_location_counts(&self) -> Result<HashMap<String, i64>> {
        let id_to_name = self.get_id_to_name("locations")?;
        let mut stmt = self
            .conn
            .prepare("SELECT locationid, count(timestamp) FROM sensors GROUP BY locationid")
            .map_err(StoreError::sql("get_location_counts"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StoreError::sql("get_location_counts"))?;

        let mut counts = HashMap::new();
        for row in rows {
            let (id, count) = row.map_err(StoreError::sql("get_location_counts"))?;
            if let Some(name) = id_to_name.get(&id) {
                counts.insert(name.clone(), count);
            }
        }
        Ok(counts)
    }

    /// Fingerprint counts per device name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_device_counts(&self) -> Result<HashMap<String, i64>> {
        self.device_counts_query(
            "get_device_counts",
            "SELECT devices.name, count(sensors.timestamp) FROM sensors
             INNER JOIN devices ON sensors.deviceid = devices.id
             GROUP BY sensors.deviceid",
            params![],
        )
    }

    /// Fingerprint counts restricted to the named devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_device_counts_from_devices(
        &self,
        devices: &[String],
    ) -> Result<HashMap<String, i64>> {
        if devices.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; devices.len()].join(",");
        let sql = format!(
            "SELECT devices.name, count(sensors.timestamp) FROM sensors
             INNER JOIN devices ON sensors.deviceid = devices.id
             WHERE devices.name IN ({placeholders})
             GROUP BY sensors.deviceid"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(StoreError::sql("get_device_counts_from_devices"))?;
        let rows = stmt
            .query_map(params_from_iter(devices.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StoreError::sql("get_device_counts_from_devices"))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (name, count) = row.map_err(StoreError::sql("get_device_counts_from_devices"))?;
            counts.insert(name, count);
        }
        Ok(counts)
    }

    /// Device names ordered by observation count, busiest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_devices(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT devices.name FROM sensors
                 INNER JOIN devices ON sensors.deviceid = devices.id
                 GROUP BY devices.name ORDER BY count(devices.name) DESC",
            )
            .map_err(StoreError::sql("get_devices"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::sql("get_devices"))?;
        rows.collect::<std::result::Result<_, _>>()
            .map_err(StoreError::sql("get_devices"))
    }

    /// When each device was last observed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_device_last_seen(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT devices.name, MAX(sensors.timestamp) FROM sensors
                 INNER JOIN devices ON sensors.deviceid = devices.id
                 GROUP BY devices.name",
            )
            .map_err(StoreError::sql("get_device_last_seen"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StoreError::sql("get_device_last_seen"))?;

        let mut last_seen = HashMap::new();
        for row in rows {
            let (name, ts) = row.map_err(StoreError::sql("get_device_last_seen"))?;
            if let Some(when) = Utc.timestamp_millis_opt(ts).single() {
                last_seen.insert(name, when);
            }
        }
        Ok(last_seen)
    }

    fn device_counts_query(
        &self,
        op: &'static str,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<HashMap<String, i64>> {
        let mut stmt = self.conn.prepare(sql).map_err(StoreError::sql(op))?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StoreError::sql(op))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (name, count) = row.map_err(StoreError::sql(op))?;
            counts.insert(name, count);
        }
        Ok(counts)
    }

    // =========================================================================
    // Predictions
    // =========================================================================

    /// Insert or update the prediction stored for a timestamp.
    ///
    /// Probabilities are truncated (not rounded) to two decimals before
    /// storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the guess list is empty or the upsert fails.
    pub fn add_prediction(&self, timestamp: i64, guesses: &[LocationPrediction]) -> Result<()> {
        if guesses.is_empty() {
            return Err(StoreError::InvalidArgument("no predictions to add"));
        }
        let truncated: Vec<LocationPrediction> = guesses
            .iter()
            .map(|g| LocationPrediction {
                probability: (g.probability * 100.0).floor() / 100.0,
                ..g.clone()
            })
            .collect();
        let encoded =
            serde_json::to_string(&truncated).map_err(StoreError::json("add_prediction"))?;
        self.conn
            .execute(
                "INSERT INTO location_predictions (timestamp, prediction) VALUES (?1, ?2)
                 ON CONFLICT(timestamp) DO UPDATE SET prediction = ?2",
                params![timestamp, encoded],
            )
            .map_err(StoreError::sql("add_prediction"))?;
        Ok(())
    }

    /// The prediction stored for a timestamp.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no prediction exists.
    pub fn get_prediction(&self, timestamp: i64) -> Result<Vec<LocationPrediction>> {
        let encoded = self
            .conn
            .query_row(
                "SELECT prediction FROM location_predictions WHERE timestamp = ?1",
                params![timestamp],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::sql("get_prediction"))?
            .ok_or(StoreError::NotFound("get_prediction"))?;
        serde_json::from_str(&encoded).map_err(StoreError::json("get_prediction"))
    }

    // =========================================================================
    // GPS
    // =========================================================================

    /// Record one GPS row per `(category, MAC)` of a fingerprint.
    ///
    /// All rows commit in a single transaction; any failure rolls back the
    /// whole set.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails.
    pub fn set_gps(&self, s: &SensorData) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(StoreError::sql("set_gps"))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO gps (timestamp, mac, loc, lat, lon, alt)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(StoreError::sql("set_gps"))?;
            for (category, readings) in &s.sensors {
                for mac in readings.keys() {
                    stmt.execute(params![
                        s.timestamp,
                        format!("{category}-{mac}"),
                        s.location,
                        s.gps.lat,
                        s.gps.lon,
                        s.gps.alt,
                    ])
                    .map_err(StoreError::sql("set_gps"))?;
                }
            }
        }
        tx.commit().map_err(StoreError::sql("set_gps"))
    }

    /// Mean GPS coordinate per labeled location.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_location_gps(&self) -> Result<HashMap<String, pinpoint_core::Gps>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT loc, AVG(lat), AVG(lon), AVG(alt) FROM gps
                 WHERE loc != '' GROUP BY loc",
            )
            .map_err(StoreError::sql("get_location_gps"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    pinpoint_core::Gps {
                        lat: row.get(1)?,
                        lon: row.get(2)?,
                        alt: row.get(3)?,
                    },
                ))
            })
            .map_err(StoreError::sql("get_location_gps"))?;
        let mut by_location = HashMap::new();
        for row in rows {
            let (loc, gps) = row.map_err(StoreError::sql("get_location_gps"))?;
            by_location.insert(loc, gps);
        }
        Ok(by_location)
    }

    // =========================================================================
    // Id tables
    // =========================================================================

    /// Id of a named element in `devices` or `locations`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the name is unknown.
    pub fn get_id(&self, table: &str, name: &str) -> Result<String> {
        let sql = format!("SELECT id FROM {table} WHERE name = ?1");
        self.conn
            .query_row(&sql, params![name], |row| row.get(0))
            .optional()
            .map_err(StoreError::sql("get_id"))?
            .ok_or(StoreError::NotFound("get_id"))
    }

    /// Name of an element in `devices` or `locations` by id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the id is unknown.
    pub fn get_name(&self, table: &str, id: &str) -> Result<String> {
        let sql = format!("SELECT name FROM {table} WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()
            .map_err(StoreError::sql("get_name"))?
            .ok_or(StoreError::NotFound("get_name"))
    }

    /// The whole id-to-name mapping of a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_id_to_name(&self, table: &str) -> Result<HashMap<String, String>> {
        let sql = format!("SELECT id, name FROM {table}");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(StoreError::sql("get_id_to_name"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(StoreError::sql("get_id_to_name"))?;
        let mut mapping = HashMap::new();
        for row in rows {
            let (id, name) = row.map_err(StoreError::sql("get_id_to_name"))?;
            mapping.insert(id, name);
        }
        Ok(mapping)
    }

    /// Delete every fingerprint labeled with a location.
    ///
    /// # Errors
    ///
    /// Returns an error if the location is unknown or the delete fails.
    pub fn delete_location(&self, name: &str) -> Result<()> {
        let id = self.get_id("locations", &normalize_name(name))?;
        self.conn
            .execute("DELETE FROM sensors WHERE locationid = ?1", params![id])
            .map_err(StoreError::sql("delete_location"))?;
        Ok(())
    }

    // =========================================================================
    // Row decoding
    // =========================================================================

    /// Run a `SELECT * FROM sensors …` query and decode rows into
    /// fully-expanded [`SensorData`].
    fn query_sensors(
        &self,
        op: &'static str,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<SensorData>> {
        let compressor = load_compressor(&self.conn)?;
        let devices = self.get_id_to_name("devices")?;
        let locations = self.get_id_to_name("locations")?;

        let mut stmt = self.conn.prepare(sql).map_err(StoreError::sql(op))?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();

        let raw_rows = stmt
            .query_map(args, |row| {
                let mut cells = Vec::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    if name == "timestamp" {
                        cells.push(RawCell::Timestamp(row.get(i)?));
                    } else {
                        cells.push(RawCell::Text(row.get::<_, Option<String>>(i)?));
                    }
                }
                Ok(cells)
            })
            .map_err(StoreError::sql(op))?;

        let mut sensors = Vec::new();
        for raw in raw_rows {
            let cells = raw.map_err(StoreError::sql(op))?;
            let mut s = SensorData {
                family: self.family.clone(),
                sensors: SensorReadings::new(),
                ..SensorData::default()
            };
            for (name, cell) in columns.iter().zip(cells) {
                match (name.as_str(), cell) {
                    ("timestamp", RawCell::Timestamp(ts)) => s.timestamp = ts,
                    ("deviceid", RawCell::Text(Some(id))) => {
                        s.device = devices.get(&id).cloned().unwrap_or(id);
                    }
                    ("locationid", RawCell::Text(Some(id))) if !id.is_empty() => {
                        s.location = locations.get(&id).cloned().unwrap_or(id);
                    }
                    ("locationid" | "deviceid" | "status", _) => {}
                    (category, RawCell::Text(Some(encoded))) if !encoded.is_empty() => {
                        let readings = compressor.expand_map_from_string(&encoded)?;
                        if !readings.is_empty() {
                            s.sensors.insert(category.to_string(), readings);
                        }
                    }
                    _ => {}
                }
            }
            sensors.push(s);
        }
        Ok(sensors)
    }
}

/// A partially-decoded sensors-table cell.
enum RawCell {
    Timestamp(i64),
    Text(Option<String>),
}

/// List every family with a database under the data directory.
///
/// Filenames that are not base58-decodable are skipped.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_families<P: AsRef<Path>>(data_dir: P) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(data_dir).map_err(|source| StoreError::Io {
        op: "list_families",
        source,
    })?;
    let mut families = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| StoreError::Io {
            op: "list_families",
            source,
        })?;
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(DB_SUFFIX)) else {
            continue;
        };
        let Ok(decoded) = bs58::decode(stem).into_vec() else {
            continue;
        };
        if let Ok(family) = String::from_utf8(decoded) {
            families.push(family);
        }
    }
    families.sort();
    Ok(families)
}

/// Database filename for a normalized family name.
fn db_file_name(family: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}{DB_SUFFIX}",
        bs58::encode(family.as_bytes()).into_string()
    ))
}

/// Content-derived short id for a device or location name.
fn short_id(name: &str) -> String {
    blake3::hash(name.as_bytes()).to_hex()[..8].to_string()
}

/// Insert the name into an id table if unseen and return its id.
fn ensure_id(conn: &Connection, table: &str, name: &str) -> Result<String> {
    let id = short_id(name);
    let sql = format!("INSERT OR IGNORE INTO {table} (id, name) VALUES (?1, ?2)");
    conn.execute(&sql, params![id, name])
        .map_err(StoreError::sql("ensure_id"))?;
    Ok(id)
}

/// Load the key dictionary from the keystore, empty if never saved.
fn load_compressor(conn: &Connection) -> Result<KeyCompressor> {
    let encoded: Option<String> = conn
        .query_row(
            "SELECT value FROM keystore WHERE key = ?1",
            params![keys::SENSOR_SIZER],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::sql("load_compressor"))?;
    match encoded {
        Some(encoded) => {
            let saved: String =
                serde_json::from_str(&encoded).map_err(StoreError::json("load_compressor"))?;
            KeyCompressor::from_saved(&saved)
        }
        None => Ok(KeyCompressor::new()),
    }
}

/// Upsert one keystore row. The value must already be JSON-encoded.
fn kv_set(conn: &Connection, op: &'static str, key: &str, encoded: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO keystore (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
        params![key, encoded],
    )
    .map_err(StoreError::sql(op))?;
    Ok(())
}
