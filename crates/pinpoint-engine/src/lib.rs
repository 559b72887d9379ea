//! Analysis engine for pinpoint.
//!
//! This crate provides the business logic between the HTTP facade and the
//! storage layer:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Gateway (HTTP/WS)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                │ active                     │ passive
//!                ▼                            ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │      IngestPipeline      │◀──│    ReverseAggregator     │
//! │  validate → persist →    │   │  window → transpose →    │
//! │  classify → fan out      │   │  synthesize fingerprints │
//! └──────────────────────────┘   └──────────────────────────┘
//!                │                            │
//!                ▼                            ▼
//!         ┌────────────┐              ┌────────────┐
//!         │ FamilyStore│              │ Delivery   │
//!         │  (SQLite)  │              │ Fanout     │
//!         └────────────┘              └────────────┘
//! ```
//!
//! The [`Classifier`] trait is the seam to the analysis backend; a baseline
//! naive-Bayes implementation ships in [`classifier`] so the service is
//! usable out of the box.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregator;
pub mod classifier;
pub mod error;
pub mod fanout;
pub mod mqtt;
pub mod pipeline;

pub use aggregator::{transpose, ReverseAggregator, ReverseSettings};
pub use classifier::{ActiveDevice, Classifier, ClassifierError, LocationDevices, NaiveBayes};
pub use error::{EngineError, Result};
pub use fanout::{DeliveryFanout, DeliveryPayload, PublishError, PublishSink};
pub use mqtt::MqttPublisher;
pub use pipeline::IngestPipeline;
