//! Detection: threshold rules, score fusion and event classification.

pub mod fusion;
pub mod rules;
pub mod types;

pub use fusion::{classify_width, fuse, FusionTracker};
pub use types::{
    CandidateEvent, CandidateState, CmeType, DetectionEvent, DetectionSource, EnsembleSignal,
    EventStatus, RuleSignal,
};
