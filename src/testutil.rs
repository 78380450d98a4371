//! Shared test fixtures.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::{EngineConfig, FeatureConfig};
use crate::telemetry::{MagneticField, TelemetrySample};

/// Call at the top of a test to see `log` output with `RUST_LOG` set.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// Quiet-sun sample at `t0 + tick * interval`.
pub fn sample_at(tick: i64, interval_secs: i64) -> TelemetrySample {
    TelemetrySample {
        timestamp: t0() + Duration::seconds(tick * interval_secs),
        proton_flux: 1000.0,
        electron_flux: 800.0,
        alpha_flux: 50.0,
        velocity: 400.0,
        temperature: 100_000.0,
        density: 5.0,
        magnetic_field: MagneticField::from_components(2.0, 3.0, 4.0),
    }
}

pub fn storm_sample_at(tick: i64, interval_secs: i64) -> TelemetrySample {
    TelemetrySample {
        velocity: 520.0,
        proton_flux: 1300.0,
        ..sample_at(tick, interval_secs)
    }
}

/// Short windows so tests warm up in a handful of samples.
pub fn fast_feature_config() -> FeatureConfig {
    FeatureConfig {
        sample_interval_secs: 60,
        moving_average_windows_min: vec![1, 2],
        gradient_windows_min: vec![1],
        statistical_windows_min: vec![3],
    }
}

pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        features: fast_feature_config(),
        ..EngineConfig::default()
    }
}

/// Run a stream through a fast-config pipeline and collect the warm
/// vectors. `tweak` edits each sample before ingestion.
pub fn warm_vectors(
    ticks: i64,
    tweak: impl Fn(i64, &mut TelemetrySample),
) -> Vec<crate::features::FeatureVector> {
    let mut pipeline = crate::features::FeaturePipeline::new("test", fast_feature_config());
    let mut out = Vec::new();
    for tick in 0..ticks {
        let mut sample = sample_at(tick, 60);
        tweak(tick, &mut sample);
        if let Ok(Some(fv)) = pipeline.ingest(&sample) {
            out.push(fv);
        }
    }
    out
}
