//! Retraining lifecycle
//!
//! A retrain labels the accumulated feature history against the event
//! catalog (samples within ±half-window of a cataloged CME are positives),
//! fits a fresh model set off the hot path, and publishes it as a new
//! generation. Failure or cancellation leaves the previous generation
//! active. At most one run is in flight; a second trigger reports
//! `AlreadyRunning` instead of erroring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::models::{BoundaryScorer, CmeModel, DeviationScorer, SupervisedScorer};
use super::registry::EnsembleRegistry;
use crate::features::FeatureVector;
use crate::telemetry::CatalogEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrainOutcome {
    Completed { generation: u64, models: usize },
    AlreadyRunning,
    Cancelled,
    Failed { reason: String },
}

/// Label history against the catalog: positive within ±`half_window_secs`
/// of any cataloged event.
pub fn label_history(
    history: &[FeatureVector],
    catalog: &[CatalogEvent],
    half_window_secs: i64,
) -> Vec<(FeatureVector, bool)> {
    let half = Duration::seconds(half_window_secs);
    history
        .iter()
        .map(|fv| {
            let is_cme = catalog
                .iter()
                .any(|ev| (fv.timestamp - ev.timestamp).abs() <= half);
            (fv.clone(), is_cme)
        })
        .collect()
}

enum TrainResult {
    Trained {
        models: Vec<Arc<dyn CmeModel>>,
        weights: Vec<f32>,
    },
    Cancelled,
    Failed(String),
}

/// Fit the model set. Checked against the cancel flag between fits so an
/// abandoned run stops promptly.
fn fit_models(labeled: &[(FeatureVector, bool)], cancel: &AtomicBool) -> TrainResult {
    if labeled.is_empty() {
        return TrainResult::Failed("no training samples".into());
    }

    let normal: Vec<FeatureVector> = labeled
        .iter()
        .filter(|(_, is_cme)| !is_cme)
        .map(|(fv, _)| fv.clone())
        .collect();
    let positives = labeled.len() - normal.len();

    let mut models: Vec<Arc<dyn CmeModel>> = Vec::new();

    if cancel.load(Ordering::Relaxed) {
        return TrainResult::Cancelled;
    }
    if let Some(model) = DeviationScorer::train(&normal) {
        models.push(Arc::new(model));
    }

    if cancel.load(Ordering::Relaxed) {
        return TrainResult::Cancelled;
    }
    if let Some(model) = BoundaryScorer::train(&normal) {
        models.push(Arc::new(model));
    }

    if cancel.load(Ordering::Relaxed) {
        return TrainResult::Cancelled;
    }
    // Needs both classes; without positives the unsupervised pair carries
    // the ensemble (the catalog may simply have no events in range).
    if let Some(model) = SupervisedScorer::train(labeled) {
        models.push(Arc::new(model));
    } else if positives > 0 {
        log::warn!("supervised scorer skipped despite {} positive labels", positives);
    }

    if models.is_empty() {
        return TrainResult::Failed(format!(
            "no trainable model ({} samples, {} positives)",
            labeled.len(),
            positives
        ));
    }

    let weights = vec![1.0; models.len()];
    TrainResult::Trained { models, weights }
}

/// Serializes retrain runs and carries the cancel flag.
pub struct RetrainController {
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl RetrainController {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask an in-flight run to stop. No-op when idle.
    pub fn request_cancel(&self) {
        if self.is_running() {
            self.cancel.store(true, Ordering::Release);
        }
    }

    pub(crate) fn begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.cancel.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    /// Run one retrain to completion and publish the result.
    pub async fn retrain(
        &self,
        registry: &EnsembleRegistry,
        labeled: Vec<(FeatureVector, bool)>,
        min_samples: usize,
    ) -> RetrainOutcome {
        if !self.begin() {
            log::info!("retrain trigger ignored: run already in progress");
            return RetrainOutcome::AlreadyRunning;
        }

        let outcome = if labeled.len() < min_samples {
            RetrainOutcome::Failed {
                reason: format!(
                    "insufficient history: {} samples, need {}",
                    labeled.len(),
                    min_samples
                ),
            }
        } else {
            let cancel = self.cancel.clone();
            let result =
                tokio::task::spawn_blocking(move || fit_models(&labeled, &cancel)).await;

            match result {
                Ok(TrainResult::Trained { models, weights }) => {
                    let count = models.len();
                    let generation = registry.install(models, weights);
                    RetrainOutcome::Completed {
                        generation,
                        models: count,
                    }
                }
                Ok(TrainResult::Cancelled) => RetrainOutcome::Cancelled,
                Ok(TrainResult::Failed(reason)) => RetrainOutcome::Failed { reason },
                Err(e) => RetrainOutcome::Failed {
                    reason: format!("training task panicked: {e}"),
                },
            }
        };

        match &outcome {
            RetrainOutcome::Completed { generation, models } => {
                log::info!("retrain completed: generation {} ({} models)", generation, models)
            }
            RetrainOutcome::Cancelled => {
                log::info!("retrain cancelled; previous generation stays active")
            }
            RetrainOutcome::Failed { reason } => {
                log::error!("retrain failed: {}; previous generation stays active", reason)
            }
            RetrainOutcome::AlreadyRunning => {}
        }

        self.finish();
        outcome
    }
}

impl Default for RetrainController {
    fn default() -> Self {
        Self::new()
    }
}
