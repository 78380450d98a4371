//! Scoring models
//!
//! The ensemble is polymorphic over one capability: given a feature
//! vector, return a score in [0, 1] and optionally a type hint. The
//! scorer iterates a collection of `CmeModel` trait objects and never
//! branches on a concrete type.
//!
//! Three concrete scorers mirror the classic trio for this problem: a
//! per-feature deviation (isolation-style) scorer, a one-class boundary
//! scorer, and a supervised classifier trained on labeled history.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::types::CmeType;
use crate::features::layout::ANGULAR_EXTENT_PROXY;
use crate::features::FeatureVector;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("feature layout v{vector_version}/{vector_hash:08x} does not match trained layout v{trained_version}/{trained_hash:08x}")]
    LayoutMismatch {
        trained_version: u8,
        trained_hash: u32,
        vector_version: u8,
        vector_hash: u32,
    },

    #[error("model produced a non-finite score")]
    NonFiniteScore,
}

/// Capability interface every ensemble member implements.
pub trait CmeModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Anomaly/classification score in [0, 1].
    fn score(&self, features: &FeatureVector) -> Result<f32, ModelError>;

    /// Optional classification hint; fusion stays authoritative.
    fn type_hint(&self, _features: &FeatureVector) -> Option<CmeType> {
        None
    }
}

/// Per-feature mean/std learned at training time, pinned to the layout it
/// was computed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub layout_version: u8,
    pub layout_hash: u32,
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl FeatureStats {
    /// Fit from training vectors. Returns `None` on an empty set.
    pub fn fit(samples: &[FeatureVector]) -> Option<Self> {
        let first = samples.first()?;
        let dim = first.len();
        let n = samples.len() as f32;

        let mut mean = vec![0.0f32; dim];
        for fv in samples {
            for (acc, v) in mean.iter_mut().zip(fv.as_slice()) {
                *acc += v / n;
            }
        }

        let mut std = vec![0.0f32; dim];
        for fv in samples {
            for ((acc, v), m) in std.iter_mut().zip(fv.as_slice()).zip(&mean) {
                *acc += (v - m) * (v - m) / n;
            }
        }
        for s in std.iter_mut() {
            *s = s.sqrt();
        }

        Some(Self {
            layout_version: first.version,
            layout_hash: first.layout_hash,
            mean,
            std,
        })
    }

    fn check_layout(&self, fv: &FeatureVector) -> Result<(), ModelError> {
        if fv.version != self.layout_version || fv.layout_hash != self.layout_hash {
            return Err(ModelError::LayoutMismatch {
                trained_version: self.layout_version,
                trained_hash: self.layout_hash,
                vector_version: fv.version,
                vector_hash: fv.layout_hash,
            });
        }
        Ok(())
    }

    /// Standardize a vector against the trained distribution.
    pub fn zscores(&self, fv: &FeatureVector) -> Result<Vec<f32>, ModelError> {
        self.check_layout(fv)?;
        Ok(fv
            .as_slice()
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (v - m) / (s + 1e-6))
            .collect())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn finite_score(score: f32) -> Result<f32, ModelError> {
    if !score.is_finite() {
        return Err(ModelError::NonFiniteScore);
    }
    Ok(score.clamp(0.0, 1.0))
}

// ============================================================================
// ISOLATION-STYLE SCORER
// ============================================================================

/// Scores how far individual features sit from their quiet-time
/// distribution; a handful of strongly displaced features is enough to
/// drive the score up, which is the behavior an isolation forest gives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationScorer {
    stats: FeatureStats,
}

impl DeviationScorer {
    /// Train on quiet-time (non-event) history.
    pub fn train(normal: &[FeatureVector]) -> Option<Self> {
        FeatureStats::fit(normal).map(|stats| Self { stats })
    }
}

impl CmeModel for DeviationScorer {
    fn name(&self) -> &'static str {
        "deviation"
    }

    fn score(&self, features: &FeatureVector) -> Result<f32, ModelError> {
        let z = self.stats.zscores(features)?;
        let n = z.len().max(1) as f32;
        let score = z.iter().map(|z| (z.abs() / 4.0).min(1.0)).sum::<f32>() / n;
        finite_score(score)
    }
}

// ============================================================================
// ONE-CLASS BOUNDARY SCORER
// ============================================================================

/// Learns a radius around the quiet-time centroid in standardized space;
/// score grows with distance past the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryScorer {
    stats: FeatureStats,
    radius: f32,
}

impl BoundaryScorer {
    pub fn train(normal: &[FeatureVector]) -> Option<Self> {
        let stats = FeatureStats::fit(normal)?;
        let dim = stats.mean.len().max(1) as f32;

        let mut distances = Vec::with_capacity(normal.len());
        for fv in normal {
            let z = stats.zscores(fv).ok()?;
            let d = z.iter().map(|z| z * z).sum::<f32>().sqrt() / dim.sqrt();
            distances.push(d);
        }

        let n = distances.len() as f32;
        let mean = distances.iter().sum::<f32>() / n;
        let var = distances.iter().map(|d| (d - mean) * (d - mean)).sum::<f32>() / n;
        let radius = (mean + 2.0 * var.sqrt()).max(1e-3);

        Some(Self { stats, radius })
    }
}

impl CmeModel for BoundaryScorer {
    fn name(&self) -> &'static str {
        "boundary"
    }

    fn score(&self, features: &FeatureVector) -> Result<f32, ModelError> {
        let z = self.stats.zscores(features)?;
        let dim = z.len().max(1) as f32;
        let d = z.iter().map(|z| z * z).sum::<f32>().sqrt() / dim.sqrt();
        finite_score((d - self.radius) / self.radius)
    }
}

// ============================================================================
// SUPERVISED SCORER
// ============================================================================

/// Linear classifier in standardized space, trained against catalog
/// labels. The weight vector points from the quiet-class centroid toward
/// the event-class centroid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisedScorer {
    stats: FeatureStats,
    weights: Vec<f32>,
    bias: f32,
}

impl SupervisedScorer {
    /// Needs at least one sample of each class.
    pub fn train(labeled: &[(FeatureVector, bool)]) -> Option<Self> {
        let all: Vec<FeatureVector> = labeled.iter().map(|(fv, _)| fv.clone()).collect();
        let stats = FeatureStats::fit(&all)?;
        let dim = stats.mean.len();

        let mut pos = vec![0.0f32; dim];
        let mut neg = vec![0.0f32; dim];
        let mut n_pos = 0.0f32;
        let mut n_neg = 0.0f32;

        for (fv, is_cme) in labeled {
            let z = stats.zscores(fv).ok()?;
            let (acc, count) = if *is_cme {
                (&mut pos, &mut n_pos)
            } else {
                (&mut neg, &mut n_neg)
            };
            for (a, v) in acc.iter_mut().zip(&z) {
                *a += v;
            }
            *count += 1.0;
        }
        if n_pos == 0.0 || n_neg == 0.0 {
            return None;
        }
        for p in pos.iter_mut() {
            *p /= n_pos;
        }
        for n in neg.iter_mut() {
            *n /= n_neg;
        }

        let weights: Vec<f32> = pos.iter().zip(&neg).map(|(p, n)| p - n).collect();
        let norm = weights.iter().map(|w| w * w).sum::<f32>().sqrt().max(1e-6);
        let weights: Vec<f32> = weights.iter().map(|w| w / norm).collect();

        // Decision boundary halfway between the class centroids.
        let midpoint: f32 = pos
            .iter()
            .zip(&neg)
            .zip(&weights)
            .map(|((p, n), w)| w * (p + n) / 2.0)
            .sum();

        Some(Self {
            stats,
            weights,
            bias: -midpoint,
        })
    }
}

impl CmeModel for SupervisedScorer {
    fn name(&self) -> &'static str {
        "supervised"
    }

    fn score(&self, features: &FeatureVector) -> Result<f32, ModelError> {
        let z = self.stats.zscores(features)?;
        let dot: f32 = z.iter().zip(&self.weights).map(|(z, w)| z * w).sum();
        finite_score(sigmoid(dot + self.bias))
    }

    fn type_hint(&self, features: &FeatureVector) -> Option<CmeType> {
        let width = f64::from(features.get(ANGULAR_EXTENT_PROXY)?);
        Some(if width >= 270.0 {
            CmeType::Halo
        } else if width >= 90.0 {
            CmeType::PartialHalo
        } else {
            CmeType::NonHalo
        })
    }
}
