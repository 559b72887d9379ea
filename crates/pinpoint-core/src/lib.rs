//! Core types and utilities for pinpoint.
//!
//! This crate provides the foundational types used throughout the pinpoint
//! indoor-localization platform:
//!
//! - **Fingerprints**: [`SensorData`], the atomic multi-sensor observation
//! - **Predictions**: [`LocationPrediction`] and [`LocationAnalysis`]
//! - **Passive state**: [`ReverseRollingData`], the per-family window record
//! - **Error types**: validation errors shared across crates
//!
//! # Example
//!
//! ```
//! use pinpoint_core::SensorData;
//!
//! let mut s = SensorData {
//!     timestamp: 1_520_424_248_897,
//!     family: " Home ".to_string(),
//!     device: "Phone".to_string(),
//!     ..SensorData::default()
//! };
//! s.sensors
//!     .entry("bluetooth".to_string())
//!     .or_default()
//!     .insert("aa:bb:cc:dd".to_string(), -40.0);
//!
//! s.normalize();
//! assert_eq!(s.family, "home");
//! assert!(s.validate().is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod models;

pub use error::{CoreError, Result};
pub use models::{
    normalize_name, BinaryStats, Gps, LocationAnalysis, LocationPrediction, ReverseRollingData,
    SensorData, SensorReadings, SensorValues, DEFAULT_TIME_BLOCK_SECS,
};
