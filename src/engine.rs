//! Detection engine
//!
//! Owns the per-source feature pipelines and fusion trackers, the live
//! ensemble generation, the retrain controller and the alert path, and
//! exposes the operations the host service calls: sample ingestion,
//! threshold updates, retrain triggers, test alerts and health.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::alerts::delivery::{AlertChannel, AlertDispatcher, TaskNotifier};
use crate::alerts::router::AlertRouter;
use crate::alerts::types::{AlertPayload, AlertTask, ChannelKind};
use crate::config::{ConfigStore, EngineConfig, ThresholdConfig};
use crate::detection::fusion::FusionTracker;
use crate::detection::rules;
use crate::detection::types::DetectionEvent;
use crate::ensemble::registry::{EnsembleRegistry, RegistryStatus};
use crate::ensemble::training::{label_history, RetrainController, RetrainOutcome};
use crate::error::EngineResult;
use crate::features::{FeaturePipeline, FeatureVector};
use crate::telemetry::{EventCatalog, TelemetrySample};

/// Host-side observer. `on_alert_task` fires on every task status
/// transition, `on_event` once per confirmed detection.
pub trait EngineSink: Send + Sync {
    fn on_event(&self, event: &DetectionEvent);
    fn on_alert_task(&self, task: &AlertTask);
}

// ============ Health reporting ============

#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub source: String,
    pub seconds_since_last_sample: Option<i64>,
    pub gap_count: u64,
    pub warm: bool,
    pub open_candidates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub config_version: u64,
    pub sources: Vec<SourceHealth>,
    pub registry: RegistryStatus,
    pub retrain_running: bool,
    pub ledger_entries: usize,
    pub events_emitted: u64,
}

struct SourceState {
    pipeline: FeaturePipeline,
    tracker: FusionTracker,
}

impl SourceState {
    fn new(source: &str, config: &EngineConfig) -> Self {
        Self {
            pipeline: FeaturePipeline::new(source, config.features.clone()),
            tracker: FusionTracker::new(config.features.clone()),
        }
    }
}

// ============ Engine ============

pub struct DetectionEngine {
    config: ConfigStore,
    /// Map lock is held only to look up or insert a source; each source
    /// carries its own lock so distinct sources process in parallel.
    sources: Mutex<HashMap<String, Arc<Mutex<SourceState>>>>,
    registry: Arc<EnsembleRegistry>,
    retrain: RetrainController,
    catalog: Arc<dyn EventCatalog>,
    router: Arc<AlertRouter>,
    dispatcher: AlertDispatcher,
    sink: Arc<dyn EngineSink>,
    /// Bounded feature history shared across sources, drained by retrains
    history: Mutex<VecDeque<FeatureVector>>,
}

impl DetectionEngine {
    pub fn new(
        config: EngineConfig,
        channels: Vec<Arc<dyn AlertChannel>>,
        catalog: Arc<dyn EventCatalog>,
        sink: Arc<dyn EngineSink>,
    ) -> EngineResult<Arc<Self>> {
        let store = ConfigStore::new(config)?;
        let alerts_cfg = store.snapshot().alerts.clone();

        let router = Arc::new(AlertRouter::new());
        let notify_sink = Arc::clone(&sink);
        let notifier: TaskNotifier = Arc::new(move |task| notify_sink.on_alert_task(task));
        let dispatcher =
            AlertDispatcher::new(channels, &alerts_cfg, Arc::clone(&router), notifier);

        Ok(Arc::new(Self {
            config: store,
            sources: Mutex::new(HashMap::new()),
            registry: Arc::new(EnsembleRegistry::new()),
            retrain: RetrainController::new(),
            catalog,
            router,
            dispatcher,
            sink,
            history: Mutex::new(VecDeque::new()),
        }))
    }

    pub fn registry(&self) -> &EnsembleRegistry {
        &self.registry
    }

    /// Feeds one telemetry sample from a named source through the full
    /// pipeline. Gaps reset that source's windows and are logged, not
    /// surfaced as failures; detection resumes once the windows refill.
    pub async fn process_sample(
        &self,
        source: &str,
        sample: &TelemetrySample,
    ) -> EngineResult<Option<DetectionEvent>> {
        let cfg = self.config.snapshot();

        let state = {
            let mut sources = self.sources.lock();
            Arc::clone(
                sources
                    .entry(source.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(SourceState::new(source, &cfg)))),
            )
        };

        let event = {
            let mut state = state.lock();

            let vector = match state.pipeline.ingest(sample) {
                Ok(Some(vector)) => vector,
                Ok(None) => return Ok(None),
                Err(e) => {
                    log::warn!("Source {}: {}", source, e);
                    return Ok(None);
                }
            };

            {
                let mut history = self.history.lock();
                if history.len() >= cfg.ensemble.history_capacity {
                    history.pop_front();
                }
                history.push_back(vector.clone());
            }

            let rule = rules::evaluate(&vector, &cfg.thresholds, &cfg.features);
            let ensemble = self.registry.score(&vector);
            state.tracker.process(
                &vector,
                &rule,
                ensemble.as_ref(),
                &cfg.thresholds,
                &cfg.fusion,
            )
        };

        if let Some(event) = &event {
            self.sink.on_event(event);
            for task in self.router.route(event, &cfg.alerts) {
                let payload = AlertPayload::for_event(event, task.severity);
                self.dispatcher.dispatch(task, payload).await?;
            }
        }
        Ok(event)
    }

    /// Validates and publishes a new threshold set. In-flight samples
    /// keep the snapshot they started with.
    pub fn update_thresholds(&self, thresholds: ThresholdConfig) -> EngineResult<u64> {
        self.config.update_thresholds(thresholds)
    }

    /// Labels the feature history against the event catalog and runs one
    /// retrain. A second trigger while one is running is a no-op.
    pub async fn trigger_retrain(&self) -> RetrainOutcome {
        let cfg = self.config.snapshot();
        let history: Vec<FeatureVector> = self.history.lock().iter().cloned().collect();
        let catalog = self.catalog.recent_events();
        let labeled = label_history(&history, &catalog, cfg.ensemble.label_half_window_secs);
        self.retrain
            .retrain(&self.registry, labeled, cfg.ensemble.min_training_samples)
            .await
    }

    pub fn request_retrain_cancel(&self) {
        self.retrain.request_cancel();
    }

    /// Spawns the periodic retrain loop. Abort the handle to stop it.
    pub fn start_periodic_retrain(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = engine.config.snapshot().ensemble.retrain_interval_secs;
                tokio::time::sleep(StdDuration::from_secs(interval)).await;
                let outcome = engine.trigger_retrain().await;
                log::debug!("periodic retrain finished: {:?}", outcome);
            }
        })
    }

    /// One-shot synthetic delivery on the named channel. Bypasses
    /// severity gating and the ledger.
    pub async fn send_test_alert(&self, kind: ChannelKind) -> EngineResult<()> {
        self.dispatcher.send_test_alert(kind).await
    }

    /// Marks a detection as a false positive: pending and retrying
    /// deliveries for it are cancelled before their next attempt.
    pub fn mark_false_positive(&self, event_id: Uuid) {
        log::info!("Event {} marked false positive", event_id);
        self.dispatcher.cancel_event(event_id);
    }

    pub fn health(&self) -> EngineHealth {
        let now = Utc::now();
        let entries: Vec<(String, Arc<Mutex<SourceState>>)> = {
            let sources = self.sources.lock();
            sources
                .iter()
                .map(|(name, state)| (name.clone(), Arc::clone(state)))
                .collect()
        };
        let mut sources = Vec::with_capacity(entries.len());
        let mut events_emitted = 0;
        for (name, state) in entries {
            let state = state.lock();
            events_emitted += state.tracker.events_emitted();
            sources.push(SourceHealth {
                source: name,
                seconds_since_last_sample: state
                    .pipeline
                    .last_timestamp()
                    .map(|ts| (now - ts).num_seconds()),
                gap_count: state.pipeline.gap_count(),
                warm: state.pipeline.is_warm(),
                open_candidates: state.tracker.candidate_count(),
            });
        }
        sources.sort_by(|a, b| a.source.cmp(&b.source));

        EngineHealth {
            config_version: self.config.snapshot().thresholds.version,
            sources,
            registry: self.registry.status(),
            retrain_running: self.retrain.is_running(),
            ledger_entries: self.router.ledger_len(),
            events_emitted,
        }
    }
}
