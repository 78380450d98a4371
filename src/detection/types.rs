//! Detection types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CME classification by angular width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmeType {
    Halo,
    PartialHalo,
    NonHalo,
}

impl CmeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmeType::Halo => "halo",
            CmeType::PartialHalo => "partial_halo",
            CmeType::NonHalo => "non_halo",
        }
    }
}

/// Which side of the pipeline produced the confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Rule,
    Ensemble,
    Combined,
}

/// Lifecycle of an emitted event. Updated later by the external
/// validation collaborator, never by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Detected,
    Validated,
    FalsePositive,
}

/// One threshold criterion: exceeded right now, and sustained over the
/// configured time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub exceeded: bool,
    pub sustained: bool,
}

impl Criterion {
    pub fn hit(&self) -> bool {
        self.exceeded && self.sustained
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBreakdown {
    pub velocity: Criterion,
    pub flux: Criterion,
    pub temperature: Criterion,
    pub magnetic_field: Criterion,
}

impl RuleBreakdown {
    pub fn criteria(&self) -> [Criterion; 4] {
        [self.velocity, self.flux, self.temperature, self.magnetic_field]
    }
}

/// Output of the threshold rule evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleSignal {
    /// At least one threshold exceeded and sustained
    pub hit: bool,
    /// Fraction of the four thresholds currently exceeded (0-1)
    pub score: f32,
    pub breakdown: RuleBreakdown,
}

/// Output of the ensemble scorer for one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSignal {
    /// Weighted combination of individual model scores (0-1)
    pub score: f32,
    /// Fraction of models scoring above 0.5
    pub agreement: f32,
    pub type_hint: Option<CmeType>,
}

/// Confirmed CME detection. Immutable once created; `confidence` is at
/// least the configured confidence threshold at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: CmeType,
    pub velocity: f64,     // km/s, peak over the candidate window
    pub width: f64,        // degrees, peak angular-extent proxy
    pub acceleration: f64, // m/s², peak velocity gradient
    pub magnitude: f64,
    pub confidence: f32,
    pub source: DetectionSource,
    pub status: EventStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateState {
    Open,
    Confirmed,
    Expired,
}

/// One fusion observation retained on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScorePoint {
    pub timestamp: DateTime<Utc>,
    pub rule_score: f32,
    pub ensemble_score: Option<f32>,
    pub fused: f32,
}

/// In-progress possible CME: accumulates peaks until it either confirms
/// into a `DetectionEvent` or the sustain window elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub id: Uuid,
    pub state: CandidateState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    pub peak_velocity: f64,
    pub peak_width: f64,
    pub peak_acceleration: f64,

    pub history: Vec<ScorePoint>,
}

impl CandidateEvent {
    pub fn new(point: ScorePoint, velocity: f64, width: f64, acceleration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: CandidateState::Open,
            first_seen: point.timestamp,
            last_seen: point.timestamp,
            peak_velocity: velocity,
            peak_width: width,
            peak_acceleration: acceleration,
            history: vec![point],
        }
    }

    /// Fold in an overlapping observation. Peaks only ever grow.
    pub fn observe(&mut self, point: ScorePoint, velocity: f64, width: f64, acceleration: f64) {
        if point.timestamp > self.last_seen {
            self.last_seen = point.timestamp;
        }
        self.peak_velocity = self.peak_velocity.max(velocity);
        self.peak_width = self.peak_width.max(width);
        self.peak_acceleration = self.peak_acceleration.max(acceleration);
        self.history.push(point);
    }

    /// Derived event magnitude, capped at 10.
    pub fn magnitude(&self) -> f64 {
        (self.peak_velocity / 100.0).min(10.0)
    }
}
