//! Error taxonomy
//!
//! Every variant here is recoverable: no error halts ingestion of
//! subsequent samples. Only `InvalidConfig` and `DeliveryExhausted` are
//! user-visible outcomes distinct from normal operation.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::alerts::types::ChannelKind;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Data outage between consecutive samples; windows were reset and
    /// processing continues from a fresh cold start.
    #[error("ingestion gap on source '{stream}': {gap_secs:.0}s since {last_seen}")]
    IngestionGap {
        /// Telemetry source name. Not called `source` so the derive does
        /// not treat it as an error cause.
        stream: String,
        last_seen: DateTime<Utc>,
        gap_secs: f64,
    },

    /// No usable model generation; fusion falls back to rule-only detection.
    #[error("model registry unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// Retraining failed; the previous generation stays active.
    #[error("retrain failed: {reason}")]
    RetrainFailure { reason: String },

    /// Rejected synchronously at the update boundary; previous config kept.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// All delivery attempts for an alert task were spent. Surfaced as an
    /// operational alert, never silently dropped.
    #[error("delivery exhausted for event {event_id} on channel {channel:?} after {attempts} attempts")]
    DeliveryExhausted {
        event_id: Uuid,
        channel: ChannelKind,
        attempts: u32,
    },
}

/// Per-attempt delivery failures, retried with bounded backoff.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {0} ms")]
    Timeout(u64),

    #[error("channel responded with status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no channel registered for {0:?}")]
    ChannelUnavailable(ChannelKind),
}
