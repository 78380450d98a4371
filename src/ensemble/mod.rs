//! Ensemble model scorer
//!
//! A swappable set of independently scoring models, combined into one
//! anomaly score plus a consensus measure. Generations are immutable and
//! hot-swapped; when nothing usable is installed the engine degrades to
//! rule-only detection.

pub mod models;
pub mod registry;
pub mod training;

pub use models::{BoundaryScorer, CmeModel, DeviationScorer, ModelError, SupervisedScorer};
pub use registry::{EnsembleRegistry, ModelGeneration, RegistryStatus};
pub use training::{label_history, RetrainController, RetrainOutcome};
