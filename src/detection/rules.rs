//! Threshold rule evaluator
//!
//! Pure function from a feature vector and a threshold snapshot to a rule
//! signal. Sustain is read from the window aggregates the pipeline already
//! maintains: a criterion counts as sustained when the moving average
//! covering `time_window` also exceeds the threshold, so no raw history is
//! re-derived here.

use crate::config::{FeatureConfig, ThresholdConfig};
use crate::detection::types::{Criterion, RuleBreakdown, RuleSignal};
use crate::features::layout::ma_name;
use crate::features::FeatureVector;
use crate::telemetry::Channel;

/// Smallest configured moving-average window whose span covers
/// `time_window`; falls back to the longest when none does.
pub fn sustain_window_minutes(features: &FeatureConfig, time_window_secs: u64) -> u32 {
    let mut minutes: Vec<u32> = features.moving_average_windows_min.clone();
    minutes.sort_unstable();
    minutes
        .iter()
        .copied()
        .find(|m| u64::from(*m) * 60 >= time_window_secs)
        .or_else(|| minutes.last().copied())
        .unwrap_or(5)
}

fn criterion(
    features: &FeatureVector,
    channel: Channel,
    threshold: f64,
    sustain_min: u32,
) -> Criterion {
    let raw = features.sample.channel(channel);
    let ma = features
        .get(&ma_name(channel, sustain_min))
        .map(f64::from)
        .unwrap_or(0.0);
    Criterion {
        exceeded: raw > threshold,
        sustained: ma > threshold,
    }
}

pub fn evaluate(
    features: &FeatureVector,
    thresholds: &ThresholdConfig,
    feature_cfg: &FeatureConfig,
) -> RuleSignal {
    let sustain_min = sustain_window_minutes(feature_cfg, thresholds.time_window_secs);

    let breakdown = RuleBreakdown {
        velocity: criterion(
            features,
            Channel::Velocity,
            thresholds.velocity_threshold,
            sustain_min,
        ),
        flux: criterion(
            features,
            Channel::ProtonFlux,
            thresholds.flux_threshold,
            sustain_min,
        ),
        temperature: criterion(
            features,
            Channel::Temperature,
            thresholds.temperature_threshold,
            sustain_min,
        ),
        magnetic_field: criterion(
            features,
            Channel::FieldMagnitude,
            thresholds.magnetic_field_threshold,
            sustain_min,
        ),
    };

    let criteria = breakdown.criteria();
    let exceeded = criteria.iter().filter(|c| c.exceeded).count();

    RuleSignal {
        hit: criteria.iter().any(|c| c.hit()),
        score: exceeded as f32 / criteria.len() as f32,
        breakdown,
    }
}
