//! SQLite storage layer for pinpoint.
//!
//! This crate provides the per-family persistent store. Every family (a
//! logical tenant/site) owns one SQLite database file; the filename is the
//! base58 encoding of the family name with a `.sqlite3.db` suffix, so the
//! family list can be recovered from the data directory alone.
//!
//! # Architecture
//!
//! Each family database holds:
//!
//! - `keystore`: JSON key/value pairs (window state, calibration results,
//!   the compressor dictionary)
//! - `sensors`: one row per fingerprint, with one dynamically-added column
//!   per sensor category
//! - `location_predictions`: classifier output keyed by timestamp
//! - `devices` / `locations`: id-to-name tables referenced by `sensors`
//! - `gps`: per-MAC coordinates
//!
//! Reading maps are stored compressed: MAC addresses are replaced by short
//! dictionary tokens (see [`compress::KeyCompressor`]) so sparse
//! high-cardinality maps stay compact.
//!
//! # Example
//!
//! ```no_run
//! use pinpoint_store::FamilyStore;
//!
//! let store = FamilyStore::open("/tmp/pinpoint-data", "home").unwrap();
//! let count = store.total_learned_count().unwrap();
//! println!("{count} learned fingerprints");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod compress;
pub mod error;
pub mod family_db;
pub mod schema;

pub use compress::KeyCompressor;
pub use error::{Result, StoreError};
pub use family_db::{list_families, FamilyStore};
