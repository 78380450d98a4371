//! Feature vector
//!
//! Snapshot of all window aggregates plus the raw sample, keyed by
//! timestamp. Immutable once the pipeline emits it. Carries the layout
//! version and hash so consumers trained against one layout never silently
//! read another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::layout::{FeatureLayout, LayoutMismatchError};
use crate::telemetry::TelemetrySample;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub version: u8,
    pub layout_hash: u32,
    pub timestamp: DateTime<Utc>,
    /// The raw sample this vector was computed from
    pub sample: TelemetrySample,
    /// Values in layout order
    pub values: Vec<f32>,
    layout: Arc<FeatureLayout>,
}

impl FeatureVector {
    pub(crate) fn new(
        layout: Arc<FeatureLayout>,
        sample: TelemetrySample,
        values: Vec<f32>,
    ) -> Self {
        debug_assert_eq!(values.len(), layout.len());
        Self {
            version: layout.version,
            layout_hash: layout.hash,
            timestamp: sample.timestamp,
            sample,
            values,
            layout,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn get_index(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    /// Look up a feature by layout name.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.layout.feature_index(name).and_then(|i| self.get_index(i))
    }

    pub fn layout(&self) -> &Arc<FeatureLayout> {
        &self.layout
    }

    /// Check this vector against another layout (e.g. the one a model
    /// generation was trained with).
    pub fn validate_against(&self, layout: &FeatureLayout) -> Result<(), LayoutMismatchError> {
        layout.validate(self.version, self.layout_hash)
    }

    pub fn is_compatible_with(&self, layout: &FeatureLayout) -> bool {
        self.validate_against(layout).is_ok()
    }
}
