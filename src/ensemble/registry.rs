//! Model registry
//!
//! Each trained model set is an immutable generation snapshot behind an
//! `Arc`. Scoring calls clone the current `Arc` out of a read lock and
//! release it before touching any model, so a retrain publishing a new
//! generation only ever blocks readers for the instant of the swap and no
//! caller observes a model set mutating mid-call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::models::CmeModel;
use crate::detection::types::{CmeType, EnsembleSignal};
use crate::features::FeatureVector;

/// One immutable trained model set.
pub struct ModelGeneration {
    pub generation: u64,
    pub trained_at: DateTime<Utc>,
    pub models: Vec<Arc<dyn CmeModel>>,
    /// Combination weights, aligned with `models`
    pub weights: Vec<f32>,
}

/// Registry health snapshot for operational status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub generation: u64,
    pub model_count: usize,
    pub trained_at: Option<DateTime<Utc>>,
    /// True when scoring currently falls back to rule-only detection
    pub degraded: bool,
}

pub struct EnsembleRegistry {
    current: RwLock<Option<Arc<ModelGeneration>>>,
    next_generation: AtomicU64,
}

impl EnsembleRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Publish a new generation. Single atomic swap; in-flight scoring
    /// keeps the generation it already dereferenced.
    pub fn install(&self, models: Vec<Arc<dyn CmeModel>>, weights: Vec<f32>) -> u64 {
        debug_assert_eq!(models.len(), weights.len());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(ModelGeneration {
            generation,
            trained_at: Utc::now(),
            models,
            weights,
        });
        let count = snapshot.models.len();
        *self.current.write() = Some(snapshot);
        log::info!("model generation {} installed ({} models)", generation, count);
        generation
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    fn snapshot(&self) -> Option<Arc<ModelGeneration>> {
        self.current.read().clone()
    }

    /// Score a feature vector against the current generation.
    ///
    /// `None` means degraded mode: no generation installed, the generation
    /// is empty, or every model failed. Fusion then runs rule-only.
    pub fn score(&self, features: &FeatureVector) -> Option<EnsembleSignal> {
        let generation = match self.snapshot() {
            Some(g) if !g.models.is_empty() => g,
            _ => {
                log::debug!("ensemble degraded: no usable model generation");
                return None;
            }
        };

        let mut weighted_sum = 0.0f32;
        let mut weight_total = 0.0f32;
        let mut scored = 0usize;
        let mut above_half = 0usize;
        let mut type_hint: Option<CmeType> = None;

        for (model, &weight) in generation.models.iter().zip(&generation.weights) {
            match model.score(features) {
                Ok(score) => {
                    weighted_sum += score * weight;
                    weight_total += weight;
                    scored += 1;
                    if score > 0.5 {
                        above_half += 1;
                    }
                    if type_hint.is_none() {
                        type_hint = model.type_hint(features);
                    }
                }
                Err(e) => {
                    log::warn!(
                        "model '{}' (generation {}) failed: {}",
                        model.name(),
                        generation.generation,
                        e
                    );
                }
            }
        }

        if scored == 0 || weight_total <= 0.0 {
            log::warn!(
                "ensemble degraded: all {} models of generation {} failed",
                generation.models.len(),
                generation.generation
            );
            return None;
        }

        Some(EnsembleSignal {
            score: (weighted_sum / weight_total).clamp(0.0, 1.0),
            agreement: above_half as f32 / scored as f32,
            type_hint,
        })
    }

    pub fn status(&self) -> RegistryStatus {
        match self.snapshot() {
            Some(g) => RegistryStatus {
                generation: g.generation,
                model_count: g.models.len(),
                trained_at: Some(g.trained_at),
                degraded: g.models.is_empty(),
            },
            None => RegistryStatus {
                generation: 0,
                model_count: 0,
                trained_at: None,
                degraded: true,
            },
        }
    }
}

impl Default for EnsembleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
