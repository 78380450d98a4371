//! Telemetry data types
//!
//! Raw readings from the SWIS-ASPEX particle payload plus the historical
//! catalog records (CACTUS) used to label training data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Magnetic field vector in nanotesla.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagneticField {
    pub bx: f64,
    pub by: f64,
    pub bz: f64,
    pub magnitude: f64,
}

impl MagneticField {
    pub fn from_components(bx: f64, by: f64, bz: f64) -> Self {
        Self {
            bx,
            by,
            bz,
            magnitude: (bx * bx + by * by + bz * bz).sqrt(),
        }
    }
}

/// One ingestion tick from a particle stream. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,

    /// Particle flux measurements (particles/cm²/s)
    pub proton_flux: f64,
    pub electron_flux: f64,
    pub alpha_flux: f64,

    /// Solar wind parameters
    pub velocity: f64,    // km/s
    pub temperature: f64, // K
    pub density: f64,     // particles/cm³

    pub magnetic_field: MagneticField,
}

/// Physical channels the feature pipeline maintains windows over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    ProtonFlux,
    ElectronFlux,
    AlphaFlux,
    Velocity,
    Temperature,
    Density,
    FieldMagnitude,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ProtonFlux => "proton_flux",
            Channel::ElectronFlux => "electron_flux",
            Channel::AlphaFlux => "alpha_flux",
            Channel::Velocity => "velocity",
            Channel::Temperature => "temperature",
            Channel::Density => "density",
            Channel::FieldMagnitude => "magnetic_field_magnitude",
        }
    }

    /// Channels that carry moving-average and gradient windows.
    /// Density only appears as a raw feature.
    pub fn windowed() -> &'static [Channel] {
        &[
            Channel::ProtonFlux,
            Channel::ElectronFlux,
            Channel::AlphaFlux,
            Channel::Velocity,
            Channel::Temperature,
            Channel::FieldMagnitude,
        ]
    }

    /// Channels that carry long statistical windows (std / z-score).
    pub fn statistical() -> &'static [Channel] {
        &[Channel::ProtonFlux, Channel::Velocity]
    }

    pub fn all() -> &'static [Channel] {
        &[
            Channel::ProtonFlux,
            Channel::ElectronFlux,
            Channel::AlphaFlux,
            Channel::Velocity,
            Channel::Temperature,
            Channel::Density,
            Channel::FieldMagnitude,
        ]
    }
}

impl TelemetrySample {
    /// Read the value of a physical channel from this sample.
    pub fn channel(&self, ch: Channel) -> f64 {
        match ch {
            Channel::ProtonFlux => self.proton_flux,
            Channel::ElectronFlux => self.electron_flux,
            Channel::AlphaFlux => self.alpha_flux,
            Channel::Velocity => self.velocity,
            Channel::Temperature => self.temperature,
            Channel::Density => self.density,
            Channel::FieldMagnitude => self.magnetic_field.magnitude,
        }
    }
}

/// A cataloged historical CME used as a training label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub velocity: f64, // km/s
    pub width: f64,    // degrees
}

/// Batch interface to the historical event catalog (training labels).
///
/// Implemented by the ingestion collaborator; the engine only reads it
/// when a retrain starts.
pub trait EventCatalog: Send + Sync {
    fn recent_events(&self) -> Vec<CatalogEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnetic_field_magnitude() {
        let field = MagneticField::from_components(3.0, 4.0, 0.0);
        assert!((field.magnitude - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_channel_readout() {
        let sample = TelemetrySample {
            timestamp: Utc::now(),
            proton_flux: 1000.0,
            electron_flux: 500.0,
            alpha_flux: 50.0,
            velocity: 420.0,
            temperature: 100_000.0,
            density: 5.0,
            magnetic_field: MagneticField::from_components(1.0, 2.0, 2.0),
        };

        assert_eq!(sample.channel(Channel::Velocity), 420.0);
        assert_eq!(sample.channel(Channel::FieldMagnitude), 3.0);
        for ch in Channel::all() {
            assert!(sample.channel(*ch).is_finite());
        }
    }
}
