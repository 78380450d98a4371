//! Engine configuration
//!
//! Every evaluation cycle reads one immutable snapshot; updates are atomic
//! publishes of a new `Arc`, never in-place mutation. Thresholds are
//! versioned so downstream consumers can tell which config confirmed an
//! event.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::alerts::types::{ChannelKind, Severity};
use crate::error::{EngineError, EngineResult};

/// Detection thresholds requiring sustained exceedance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub version: u64,

    /// Solar wind velocity threshold (km/s)
    pub velocity_threshold: f64,
    /// Proton flux threshold (particles/cm²/s)
    pub flux_threshold: f64,
    /// Plasma temperature threshold (K)
    pub temperature_threshold: f64,
    /// Magnetic field magnitude threshold (nT)
    pub magnetic_field_threshold: f64,

    /// Fused confidence required to confirm an event (0-1)
    pub confidence_threshold: f32,
    /// Seconds an exceedance must be sustained before a rule hit
    pub time_window_secs: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            version: 1,
            velocity_threshold: 500.0,
            flux_threshold: 1200.0,
            temperature_threshold: 200_000.0,
            magnetic_field_threshold: 10.0,
            confidence_threshold: 0.7,
            time_window_secs: 300,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.velocity_threshold <= 0.0
            || self.flux_threshold <= 0.0
            || self.temperature_threshold <= 0.0
            || self.magnetic_field_threshold <= 0.0
        {
            return Err(EngineError::InvalidConfig(
                "all physical thresholds must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "confidence_threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.time_window_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "time_window_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Sliding window configuration for the feature pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Expected sampling cadence (seconds between samples)
    pub sample_interval_secs: u64,
    /// Moving-average window lengths (minutes)
    pub moving_average_windows_min: Vec<u32>,
    /// Gradient window lengths (minutes)
    pub gradient_windows_min: Vec<u32>,
    /// Statistical window lengths (minutes)
    pub statistical_windows_min: Vec<u32>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 60,
            moving_average_windows_min: vec![5, 10, 30, 60],
            gradient_windows_min: vec![1, 5, 15],
            statistical_windows_min: vec![60, 180, 360],
        }
    }
}

impl FeatureConfig {
    /// Window length in samples for a length given in minutes.
    pub fn samples_for_minutes(&self, minutes: u32) -> usize {
        let secs = u64::from(minutes) * 60;
        (secs / self.sample_interval_secs.max(1)).max(1) as usize
    }

    /// Gap threshold: twice the expected sampling interval.
    pub fn gap_threshold_secs(&self) -> f64 {
        (self.sample_interval_secs * 2) as f64
    }

    pub fn shortest_moving_average_min(&self) -> u32 {
        self.moving_average_windows_min.iter().copied().min().unwrap_or(5)
    }

    /// Statistical window used for z-scores (shortest configured).
    pub fn zscore_window_min(&self) -> u32 {
        self.statistical_windows_min.iter().copied().min().unwrap_or(60)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "sample_interval_secs must be positive".into(),
            ));
        }
        if self.moving_average_windows_min.is_empty()
            || self.gradient_windows_min.is_empty()
            || self.statistical_windows_min.is_empty()
        {
            return Err(EngineError::InvalidConfig(
                "every window kind needs at least one length".into(),
            ));
        }
        Ok(())
    }
}

/// Weights and bounds for score fusion and classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Fused confidence that opens a candidate (below confidence_threshold)
    pub low_bar: f32,
    /// Rule signal weight when the ensemble is healthy
    pub rule_weight: f32,
    /// Ensemble signal weight when the ensemble is healthy
    pub ensemble_weight: f32,
    /// Width at or above which an event classifies as halo (degrees)
    pub halo_width_deg: f64,
    /// Width at or above which an event classifies as partial halo (degrees)
    pub partial_halo_width_deg: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            low_bar: 0.5,
            rule_weight: 0.3,
            ensemble_weight: 0.7,
            halo_width_deg: 270.0,
            partial_halo_width_deg: 90.0,
        }
    }
}

/// Retraining lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Interval between periodic retrains (seconds)
    pub retrain_interval_secs: u64,
    /// Samples within ±this many seconds of a catalog event are labeled CME
    pub label_half_window_secs: i64,
    /// Minimum history size before a retrain is attempted
    pub min_training_samples: usize,
    /// Bounded feature history kept for training
    pub history_capacity: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            retrain_interval_secs: 86_400,
            label_half_window_secs: 1_800,
            min_training_samples: 32,
            history_capacity: 10_000,
        }
    }
}

/// Confidence bands mapped to alert severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityBands {
    pub medium: f32,
    pub high: f32,
    pub critical: f32,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            medium: 0.7,
            high: 0.8,
            critical: 0.9,
        }
    }
}

impl SeverityBands {
    pub fn severity_for(&self, confidence: f32) -> Severity {
        if confidence >= self.critical {
            Severity::Critical
        } else if confidence >= self.high {
            Severity::High
        } else if confidence >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// One configured delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub enabled: bool,
    /// Minimum severity this channel receives
    pub min_severity: Severity,
}

/// Alert routing and delivery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub channels: Vec<ChannelConfig>,
    pub bands: SeverityBands,
    /// Attempt ceiling per task, including the first attempt
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-channel delivery timeout
    pub delivery_timeout_ms: u64,
    /// Bounded worker pool size for delivery
    pub workers: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelConfig {
                    kind: ChannelKind::Email,
                    enabled: true,
                    min_severity: Severity::High,
                },
                ChannelConfig {
                    kind: ChannelKind::Sms,
                    enabled: true,
                    min_severity: Severity::Critical,
                },
                ChannelConfig {
                    kind: ChannelKind::Webhook,
                    enabled: true,
                    min_severity: Severity::Low,
                },
            ],
            bands: SeverityBands::default(),
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            delivery_timeout_ms: 5_000,
            workers: 2,
        }
    }
}

/// Full engine configuration snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,
    pub features: FeatureConfig,
    pub fusion: FusionConfig,
    pub ensemble: EnsembleConfig,
    pub alerts: AlertConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.thresholds.validate()?;
        self.features.validate()?;
        let weight_sum = self.fusion.rule_weight + self.fusion.ensemble_weight;
        if (weight_sum - 1.0).abs() > 1e-3 {
            return Err(EngineError::InvalidConfig(format!(
                "fusion weights must sum to 1.0, got {weight_sum}"
            )));
        }
        Ok(())
    }
}

/// Shared config store. Readers clone an `Arc` snapshot; writers publish a
/// new snapshot under a momentary write lock.
pub struct ConfigStore {
    inner: RwLock<Arc<EngineConfig>>,
}

impl ConfigStore {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: RwLock::new(Arc::new(config)),
        })
    }

    /// Consistent snapshot for one evaluation cycle.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.inner.read().clone()
    }

    /// Swap in new thresholds. Rejected without side effects when invalid;
    /// on success the version is bumped past the installed one.
    pub fn update_thresholds(&self, mut thresholds: ThresholdConfig) -> EngineResult<u64> {
        thresholds.validate()?;

        let mut guard = self.inner.write();
        thresholds.version = guard.thresholds.version + 1;
        let version = thresholds.version;

        let mut next = (**guard).clone();
        next.thresholds = thresholds;
        *guard = Arc::new(next);

        log::info!("threshold config updated to version {}", version);
        Ok(version)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Arc::new(EngineConfig::default())),
        }
    }
}
