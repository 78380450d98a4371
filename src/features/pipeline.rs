//! Feature engineering pipeline
//!
//! Maintains the sliding windows for one telemetry source and emits a
//! `FeatureVector` per sample once every configured window has enough
//! history. A data outage (or an out-of-order timestamp) resets all
//! windows: stale aggregates never bridge a gap.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::layout::FeatureLayout;
use super::vector::FeatureVector;
use super::window::SlidingWindow;
use crate::config::FeatureConfig;
use crate::error::{EngineError, EngineResult};
use crate::telemetry::{Channel, TelemetrySample};

/// Deterministic angular-extent proxy (degrees), monotone in both inputs.
///
/// Calibrated so fast, flux-rich ejections land at full halo width
/// (≥ 270°) and slow, thin ones stay well below the partial-halo bound.
pub fn angular_extent_proxy(velocity: f64, proton_flux: f64) -> f64 {
    let base = ((velocity - 300.0) / 700.0).clamp(0.0, 1.0) * 340.0 + 20.0;
    let flux_factor = (proton_flux / 2000.0).clamp(0.5, 1.25);
    (base * flux_factor).clamp(0.0, 360.0)
}

pub struct FeaturePipeline {
    source: String,
    config: FeatureConfig,
    layout: Arc<FeatureLayout>,
    /// One window per (channel, capacity-in-samples)
    windows: HashMap<(Channel, usize), SlidingWindow>,
    last_timestamp: Option<DateTime<Utc>>,
    gap_count: u64,
}

impl FeaturePipeline {
    pub fn new(source: impl Into<String>, config: FeatureConfig) -> Self {
        let layout = Arc::new(FeatureLayout::build(&config));
        let mut pipeline = Self {
            source: source.into(),
            config,
            layout,
            windows: HashMap::new(),
            last_timestamp: None,
            gap_count: 0,
        };
        pipeline.allocate_windows();
        pipeline
    }

    fn allocate_windows(&mut self) {
        self.windows.clear();

        for &ch in Channel::windowed() {
            for &minutes in &self.config.moving_average_windows_min {
                let cap = self.config.samples_for_minutes(minutes);
                self.windows
                    .entry((ch, cap))
                    .or_insert_with(|| SlidingWindow::new(cap));
            }
            // A gradient over w minutes compares against the value w
            // samples back, so the buffer holds one extra sample.
            for &minutes in &self.config.gradient_windows_min {
                let cap = self.config.samples_for_minutes(minutes) + 1;
                self.windows
                    .entry((ch, cap))
                    .or_insert_with(|| SlidingWindow::new(cap));
            }
        }
        for &ch in Channel::statistical() {
            for &minutes in &self.config.statistical_windows_min {
                let cap = self.config.samples_for_minutes(minutes);
                self.windows
                    .entry((ch, cap))
                    .or_insert_with(|| SlidingWindow::new(cap));
            }
        }
    }

    pub fn layout(&self) -> &Arc<FeatureLayout> {
        &self.layout
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Number of window resets caused by gaps or out-of-order input.
    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    /// True once every window has full history.
    pub fn is_warm(&self) -> bool {
        self.windows.values().all(|w| w.is_full())
    }

    pub fn reset(&mut self) {
        for window in self.windows.values_mut() {
            window.clear();
        }
        self.last_timestamp = None;
    }

    /// Feed one sample. `Ok(None)` during cold start, `Ok(Some(_))` once
    /// warm. A duplicate timestamp is skipped outright. A gap (or a
    /// timestamp moving backwards) resets all windows, seeds them with the
    /// offending sample, and reports `IngestionGap`; the caller logs and
    /// continues.
    pub fn ingest(&mut self, sample: &TelemetrySample) -> EngineResult<Option<FeatureVector>> {
        if let Some(last) = self.last_timestamp {
            let gap_secs = (sample.timestamp - last).num_milliseconds() as f64 / 1000.0;
            if gap_secs == 0.0 {
                // Cadence guarantees non-decreasing timestamps, so a repeat
                // is a duplicate tick. Skip it without disturbing the windows.
                log::debug!("[{}] duplicate timestamp {}, skipping", self.source, last);
                return Ok(None);
            }
            if gap_secs < 0.0 || gap_secs > self.config.gap_threshold_secs() {
                self.gap_count += 1;
                log::warn!(
                    "[{}] window reset: {} (last sample {})",
                    self.source,
                    if gap_secs < 0.0 {
                        "out-of-order timestamp"
                    } else {
                        "data gap"
                    },
                    last
                );
                self.reset();
                self.push_sample(sample);
                self.last_timestamp = Some(sample.timestamp);
                return Err(EngineError::IngestionGap {
                    stream: self.source.clone(),
                    last_seen: last,
                    gap_secs,
                });
            }
        }

        self.push_sample(sample);
        self.last_timestamp = Some(sample.timestamp);

        if !self.is_warm() {
            return Ok(None);
        }
        Ok(Some(self.build_vector(sample)))
    }

    fn push_sample(&mut self, sample: &TelemetrySample) {
        for ((ch, _), window) in self.windows.iter_mut() {
            window.push(sample.channel(*ch));
        }
    }

    fn window(&self, ch: Channel, capacity: usize) -> &SlidingWindow {
        // Allocated up front for every configured (channel, length) pair.
        &self.windows[&(ch, capacity)]
    }

    /// Assemble values in the exact order `FeatureLayout::build` declares.
    fn build_vector(&self, sample: &TelemetrySample) -> FeatureVector {
        let cfg = &self.config;
        let mut values = Vec::with_capacity(self.layout.len());

        for &ch in Channel::all() {
            values.push(sample.channel(ch) as f32);
        }
        for &minutes in &cfg.moving_average_windows_min {
            let cap = cfg.samples_for_minutes(minutes);
            for &ch in Channel::windowed() {
                values.push(self.window(ch, cap).mean() as f32);
            }
        }
        for &minutes in &cfg.gradient_windows_min {
            let cap = cfg.samples_for_minutes(minutes) + 1;
            for &ch in Channel::windowed() {
                values.push(self.window(ch, cap).gradient() as f32);
            }
        }
        for &minutes in &cfg.statistical_windows_min {
            let cap = cfg.samples_for_minutes(minutes);
            for &ch in Channel::statistical() {
                values.push(self.window(ch, cap).std() as f32);
            }
        }

        let z_cap = cfg.samples_for_minutes(cfg.zscore_window_min());
        for &ch in Channel::statistical() {
            let window = self.window(ch, z_cap);
            let z = (sample.channel(ch) - window.mean()) / (window.std() + 1e-6);
            values.push(z as f32);
        }

        let ratio_cap = cfg.samples_for_minutes(cfg.shortest_moving_average_min());
        let proton_ma = self.window(Channel::ProtonFlux, ratio_cap).mean();
        let electron_ma = self.window(Channel::ElectronFlux, ratio_cap).mean();
        values.push((proton_ma / (electron_ma + 1e-6)) as f32);

        values.push(angular_extent_proxy(sample.velocity, sample.proton_flux) as f32);

        FeatureVector::new(self.layout.clone(), sample.clone(), values)
    }
}

// Re-export so consumers can name features without rebuilding format strings.
pub use super::layout::{ANGULAR_EXTENT_PROXY, PROTON_ELECTRON_RATIO};
