//! Aditya-L1 CME detection engine
//!
//! Streaming detection core for coronal mass ejection onsets in solar
//! wind telemetry. Samples flow through windowed feature extraction,
//! are scored by threshold rules and a trained model ensemble, fused
//! into confirmed detection events, and routed to alert channels with
//! retry.

pub mod alerts;
pub mod config;
pub mod detection;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod telemetry;

#[cfg(test)]
mod testutil;

pub use config::{EngineConfig, ThresholdConfig};
pub use detection::types::{CmeType, DetectionEvent, DetectionSource};
pub use engine::{DetectionEngine, EngineHealth, EngineSink};
pub use error::{EngineError, EngineResult};
pub use features::FeatureVector;
pub use telemetry::{EventCatalog, TelemetrySample};
