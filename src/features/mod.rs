//! Feature engineering
//!
//! Sliding windows, the versioned feature vector and the per-source
//! ingestion pipeline.

pub mod layout;
pub mod pipeline;
pub mod vector;
pub mod window;


pub use layout::{FeatureLayout, FEATURE_VERSION};
pub use pipeline::{angular_extent_proxy, FeaturePipeline};
pub use vector::FeatureVector;
pub use window::SlidingWindow;
