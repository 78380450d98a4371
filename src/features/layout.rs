//! Feature layout
//!
//! Single source of truth for feature naming and ordering. The layout is
//! derived from the configured window set, so two pipelines agree on vector
//! shape exactly when their window configuration matches; the CRC32 layout
//! hash makes a mismatch detectable instead of silent.
//!
//! Bump `FEATURE_VERSION` whenever the naming scheme or ordering rules
//! change.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FeatureConfig;
use crate::telemetry::Channel;

/// Current feature layout version.
pub const FEATURE_VERSION: u8 = 1;

#[derive(Debug, Error)]
#[error("feature layout mismatch: expected v{expected_version}/{expected_hash:08x}, got v{version}/{hash:08x}")]
pub struct LayoutMismatchError {
    pub expected_version: u8,
    pub expected_hash: u32,
    pub version: u8,
    pub hash: u32,
}

/// Ordered feature naming for one pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub version: u8,
    pub hash: u32,
    names: Vec<String>,
}

pub fn ma_name(channel: Channel, minutes: u32) -> String {
    format!("{}_ma_{}", channel.as_str(), minutes)
}

pub fn grad_name(channel: Channel, minutes: u32) -> String {
    format!("{}_grad_{}", channel.as_str(), minutes)
}

pub fn std_name(channel: Channel, minutes: u32) -> String {
    format!("{}_std_{}", channel.as_str(), minutes)
}

pub fn zscore_name(channel: Channel) -> String {
    format!("{}_zscore", channel.as_str())
}

/// Flux asymmetry between proton and electron populations.
pub const PROTON_ELECTRON_RATIO: &str = "proton_electron_ratio";

/// Deterministic angular-extent proxy used for halo classification.
pub const ANGULAR_EXTENT_PROXY: &str = "angular_extent_proxy";

impl FeatureLayout {
    /// Build the layout for a window configuration. Ordering: raw channels,
    /// moving averages, gradients, window standard deviations, z-scores,
    /// then derived features.
    pub fn build(config: &FeatureConfig) -> Self {
        let mut names = Vec::new();

        for ch in Channel::all() {
            names.push(ch.as_str().to_string());
        }
        for &minutes in &config.moving_average_windows_min {
            for &ch in Channel::windowed() {
                names.push(ma_name(ch, minutes));
            }
        }
        for &minutes in &config.gradient_windows_min {
            for &ch in Channel::windowed() {
                names.push(grad_name(ch, minutes));
            }
        }
        for &minutes in &config.statistical_windows_min {
            for &ch in Channel::statistical() {
                names.push(std_name(ch, minutes));
            }
        }
        for &ch in Channel::statistical() {
            names.push(zscore_name(ch));
        }
        names.push(PROTON_ELECTRON_RATIO.to_string());
        names.push(ANGULAR_EXTENT_PROXY.to_string());

        let hash = layout_hash(FEATURE_VERSION, &names);
        Self {
            version: FEATURE_VERSION,
            hash,
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    // Linear scan over a few dozen names; no side table to fall out of
    // sync with the serialized form.
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn validate(&self, version: u8, hash: u32) -> Result<(), LayoutMismatchError> {
        if version != self.version || hash != self.hash {
            return Err(LayoutMismatchError {
                expected_version: self.version,
                expected_hash: self.hash,
                version,
                hash,
            });
        }
        Ok(())
    }
}

fn layout_hash(version: u8, names: &[String]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[version]);
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize()
}
