//! Detection fusion and classification
//!
//! Merges the rule and ensemble signals into one fused confidence, drives
//! the per-candidate state machine, and classifies confirmed events by
//! angular width. One physical event produces at most one `DetectionEvent`:
//! overlapping samples inside the sustain window fold into the existing
//! candidate instead of emitting again.

use chrono::Duration;

use crate::config::{FeatureConfig, FusionConfig, ThresholdConfig};
use crate::detection::types::{
    CandidateEvent, CandidateState, CmeType, DetectionEvent, DetectionSource, EnsembleSignal,
    EventStatus, RuleSignal, ScorePoint,
};
use crate::features::layout::{grad_name, ANGULAR_EXTENT_PROXY};
use crate::features::FeatureVector;
use crate::telemetry::Channel;

/// Fused confidence and the contributing source.
///
/// With a healthy ensemble: `w_r · rule + w_e · ensemble · agreement`,
/// which penalizes low-consensus detections. Degraded mode passes the rule
/// score through unchanged.
pub fn fuse(
    rule: &RuleSignal,
    ensemble: Option<&EnsembleSignal>,
    config: &FusionConfig,
) -> (f32, DetectionSource) {
    match ensemble {
        Some(signal) => {
            let fused = (config.rule_weight * rule.score
                + config.ensemble_weight * signal.score * signal.agreement)
                .clamp(0.0, 1.0);
            let source = if signal.score >= config.low_bar {
                if rule.score > 0.0 {
                    DetectionSource::Combined
                } else {
                    DetectionSource::Ensemble
                }
            } else {
                DetectionSource::Rule
            };
            (fused, source)
        }
        None => (rule.score, DetectionSource::Rule),
    }
}

/// Classification by angular width.
pub fn classify_width(width: f64, config: &FusionConfig) -> CmeType {
    if width >= config.halo_width_deg {
        CmeType::Halo
    } else if width >= config.partial_halo_width_deg {
        CmeType::PartialHalo
    } else {
        CmeType::NonHalo
    }
}

/// Per-source candidate state machine. Samples must arrive in timestamp
/// order; the engine guarantees that by running one tracker per source.
pub struct FusionTracker {
    feature_cfg: FeatureConfig,
    candidates: Vec<CandidateEvent>,
    events_emitted: u64,
}

impl FusionTracker {
    pub fn new(feature_cfg: FeatureConfig) -> Self {
        Self {
            feature_cfg,
            candidates: Vec::new(),
            events_emitted: 0,
        }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    /// Peak velocity gradient converted to m/s² over the shortest
    /// configured gradient window.
    fn acceleration(&self, features: &FeatureVector) -> f64 {
        let minutes = self
            .feature_cfg
            .gradient_windows_min
            .iter()
            .copied()
            .min()
            .unwrap_or(1);
        let grad_km_s = features
            .get(&grad_name(Channel::Velocity, minutes))
            .map(f64::from)
            .unwrap_or(0.0);
        grad_km_s * 1000.0 / (f64::from(minutes) * 60.0)
    }

    /// Drive the state machine with one joined (rule, ensemble) pair.
    /// Returns a `DetectionEvent` exactly when a candidate confirms.
    pub fn process(
        &mut self,
        features: &FeatureVector,
        rule: &RuleSignal,
        ensemble: Option<&EnsembleSignal>,
        thresholds: &ThresholdConfig,
        fusion_cfg: &FusionConfig,
    ) -> Option<DetectionEvent> {
        let ts = features.timestamp;
        let window = Duration::seconds(thresholds.time_window_secs as i64);

        // Age out candidates first so a stale one never absorbs this sample.
        self.candidates.retain_mut(|c| {
            let keep = match c.state {
                CandidateState::Open => ts - c.first_seen <= window,
                CandidateState::Confirmed => ts - c.last_seen <= window,
                CandidateState::Expired => false,
            };
            if !keep && c.state == CandidateState::Open {
                c.state = CandidateState::Expired;
                log::debug!(
                    "candidate {} expired without confirmation (first seen {})",
                    c.id,
                    c.first_seen
                );
            }
            keep
        });

        let (fused, source) = fuse(rule, ensemble, fusion_cfg);
        if fused < fusion_cfg.low_bar {
            return None;
        }

        let point = ScorePoint {
            timestamp: ts,
            rule_score: rule.score,
            ensemble_score: ensemble.map(|e| e.score),
            fused,
        };
        let velocity = features.sample.velocity;
        let width = features
            .get(ANGULAR_EXTENT_PROXY)
            .map(f64::from)
            .unwrap_or(0.0);
        let acceleration = self.acceleration(features);

        let idx = match self
            .candidates
            .iter()
            .position(|c| ts - c.last_seen <= window)
        {
            Some(i) => {
                self.candidates[i].observe(point, velocity, width, acceleration);
                i
            }
            None => {
                let candidate = CandidateEvent::new(point, velocity, width, acceleration);
                log::debug!("candidate {} opened at {} (fused {:.2})", candidate.id, ts, fused);
                self.candidates.push(candidate);
                self.candidates.len() - 1
            }
        };

        let candidate = &mut self.candidates[idx];
        // Confirms at most once; later high-confidence samples only update
        // peaks for overlap purposes.
        if candidate.state != CandidateState::Open || fused < thresholds.confidence_threshold {
            return None;
        }
        candidate.state = CandidateState::Confirmed;

        let event = DetectionEvent {
            id: candidate.id,
            timestamp: ts,
            event_type: classify_width(candidate.peak_width, fusion_cfg),
            velocity: candidate.peak_velocity,
            width: candidate.peak_width,
            acceleration: candidate.peak_acceleration,
            magnitude: candidate.magnitude(),
            confidence: fused,
            source,
            status: EventStatus::Detected,
        };
        self.events_emitted += 1;
        log::info!(
            "CME event {} confirmed: {} velocity={:.0} km/s width={:.0}° confidence={:.2} source={:?}",
            event.id,
            event.event_type.as_str(),
            event.velocity,
            event.width,
            event.confidence,
            event.source
        );
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::rules;
    use crate::detection::types::RuleBreakdown;
    use crate::testutil::{fast_feature_config, warm_vectors};

    fn rule_signal(score: f32) -> RuleSignal {
        RuleSignal {
            hit: score > 0.0,
            score,
            breakdown: RuleBreakdown::default(),
        }
    }

    fn ensemble_signal(score: f32, agreement: f32) -> EnsembleSignal {
        EnsembleSignal {
            score,
            agreement,
            type_hint: None,
        }
    }

    #[test]
    fn test_fusion_monotonic_in_both_inputs() {
        let cfg = FusionConfig::default();
        for agreement in [0.5_f32, 1.0] {
            let mut prev = -1.0f32;
            for step in 0..=10 {
                let rule_score = step as f32 / 10.0;
                let (fused, _) =
                    fuse(&rule_signal(rule_score), Some(&ensemble_signal(0.6, agreement)), &cfg);
                assert!(fused >= prev, "not monotonic in rule score");
                prev = fused;
            }

            let mut prev = -1.0f32;
            for step in 0..=10 {
                let ens_score = step as f32 / 10.0;
                let (fused, _) =
                    fuse(&rule_signal(0.4), Some(&ensemble_signal(ens_score, agreement)), &cfg);
                assert!(fused >= prev, "not monotonic in ensemble score");
                prev = fused;
            }
        }
    }

    #[test]
    fn test_degraded_fusion_passes_rule_through() {
        let cfg = FusionConfig::default();
        let (fused, source) = fuse(&rule_signal(0.5), None, &cfg);
        assert_eq!(fused, 0.5);
        assert_eq!(source, DetectionSource::Rule);
    }

    #[test]
    fn test_source_attribution() {
        let cfg = FusionConfig::default();

        let (_, source) = fuse(&rule_signal(0.5), Some(&ensemble_signal(0.8, 1.0)), &cfg);
        assert_eq!(source, DetectionSource::Combined);

        let (_, source) = fuse(&rule_signal(0.0), Some(&ensemble_signal(0.8, 1.0)), &cfg);
        assert_eq!(source, DetectionSource::Ensemble);

        // Ensemble below the low bar contributes nothing material.
        let (_, source) = fuse(&rule_signal(0.75), Some(&ensemble_signal(0.2, 0.3)), &cfg);
        assert_eq!(source, DetectionSource::Rule);
    }

    #[test]
    fn test_classify_width_bounds() {
        let cfg = FusionConfig::default();
        assert_eq!(classify_width(360.0, &cfg), CmeType::Halo);
        assert_eq!(classify_width(270.0, &cfg), CmeType::Halo);
        assert_eq!(classify_width(269.9, &cfg), CmeType::PartialHalo);
        assert_eq!(classify_width(90.0, &cfg), CmeType::PartialHalo);
        assert_eq!(classify_width(89.9, &cfg), CmeType::NonHalo);
    }

    /// Drive a stream through rules + fusion with no ensemble installed.
    fn run_rule_only(
        ticks: i64,
        storm: impl Fn(i64) -> bool,
    ) -> (Vec<DetectionEvent>, FusionTracker) {
        let feature_cfg = fast_feature_config();
        let mut thresholds = ThresholdConfig::default();
        thresholds.confidence_threshold = 0.5;
        let fusion_cfg = FusionConfig::default();

        let vectors = warm_vectors(ticks, |tick, s| {
            if storm(tick) {
                s.velocity = 520.0;
                s.proton_flux = 1300.0;
            }
        });

        let mut tracker = FusionTracker::new(feature_cfg.clone());
        let mut events = Vec::new();
        for fv in &vectors {
            let rule = rules::evaluate(fv, &thresholds, &feature_cfg);
            if let Some(event) = tracker.process(fv, &rule, None, &thresholds, &fusion_cfg) {
                events.push(event);
            }
        }
        (events, tracker)
    }

    #[test]
    fn test_single_event_for_sustained_storm() {
        // Storm from the start, lasting well past the sustain window.
        let (events, _) = run_rule_only(20, |_| true);

        assert_eq!(events.len(), 1, "overlapping samples must not emit twice");
        let event = &events[0];
        assert_eq!(event.source, DetectionSource::Rule);
        assert!((event.confidence - 0.5).abs() < 1e-6);
        assert_eq!(event.status, EventStatus::Detected);
        assert!(matches!(
            event.event_type,
            CmeType::NonHalo | CmeType::PartialHalo
        ));
    }

    #[test]
    fn test_confirms_on_fused_confidence_alone() {
        // A single strong sample crossing the confidence bar confirms even
        // though no moving average has caught up yet.
        let feature_cfg = fast_feature_config();
        let thresholds = ThresholdConfig::default(); // confirm bar 0.7
        let fusion_cfg = FusionConfig::default();

        let vectors = warm_vectors(8, |tick, s| {
            if tick == 7 {
                s.velocity = 520.0;
                s.proton_flux = 1300.0;
                s.temperature = 250_000.0;
            }
        });

        let mut tracker = FusionTracker::new(feature_cfg.clone());
        let mut events = Vec::new();
        for fv in &vectors {
            let rule = rules::evaluate(fv, &thresholds, &feature_cfg);
            assert!(!rule.hit, "moving averages must still be quiet");
            if let Some(e) = tracker.process(fv, &rule, None, &thresholds, &fusion_cfg) {
                events.push(e);
            }
        }

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!((event.confidence - 0.75).abs() < 1e-6);
        assert_eq!(event.source, DetectionSource::Rule);
    }

    #[test]
    fn test_no_overlapping_event_pair() {
        // Two storms separated by more than time_window (5 min at the test
        // cadence) produce two events with non-overlapping candidates.
        let (events, _) = run_rule_only(40, |tick| (5..12).contains(&tick) || (25..32).contains(&tick));

        assert_eq!(events.len(), 2);
        let gap = events[1].timestamp - events[0].timestamp;
        assert!(gap.num_seconds() > 300);
    }

    #[test]
    fn test_open_candidate_expires_quietly() {
        let feature_cfg = fast_feature_config();
        let thresholds = ThresholdConfig::default(); // confirm bar 0.7
        let fusion_cfg = FusionConfig::default();

        // Storm strong enough to open (score 0.5 >= low bar) but never to
        // confirm at 0.7.
        let vectors = warm_vectors(20, |tick, s| {
            if (4..8).contains(&tick) {
                s.velocity = 520.0;
                s.proton_flux = 1300.0;
            }
        });

        let mut tracker = FusionTracker::new(feature_cfg.clone());
        for fv in &vectors {
            let rule = rules::evaluate(fv, &thresholds, &feature_cfg);
            assert!(tracker
                .process(fv, &rule, None, &thresholds, &fusion_cfg)
                .is_none());
        }
        assert_eq!(tracker.events_emitted(), 0);
        assert_eq!(tracker.candidate_count(), 0, "expired candidate must be dropped");
    }

    #[test]
    fn test_peaks_accumulate_before_confirmation() {
        let feature_cfg = fast_feature_config();
        let mut thresholds = ThresholdConfig::default();
        thresholds.confidence_threshold = 0.75;
        let fusion_cfg = FusionConfig::default();

        // Ramp: opens at two exceedances (0.5), confirms once temperature
        // joins (0.75). Peak velocity should be remembered from the ramp.
        let vectors = warm_vectors(12, |tick, s| {
            if tick >= 4 {
                s.velocity = 540.0 + tick as f64 * 10.0;
                s.proton_flux = 1400.0;
            }
            if tick >= 8 {
                s.temperature = 450_000.0;
            }
        });

        let mut tracker = FusionTracker::new(feature_cfg.clone());
        let mut events = Vec::new();
        for fv in &vectors {
            let rule = rules::evaluate(fv, &thresholds, &feature_cfg);
            if let Some(e) = tracker.process(fv, &rule, None, &thresholds, &fusion_cfg) {
                events.push(e);
            }
        }

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.velocity >= 620.0, "peak velocity {}", event.velocity);
        assert!(event.confidence >= 0.75);
        assert!(event.acceleration > 0.0);
    }
}
