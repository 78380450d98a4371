//! Alert types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::types::{CmeType, DetectionEvent, DetectionSource};

/// Alert urgency tier. Ordering follows declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Delivery transport. The engine ships a webhook implementation; email
/// and SMS transports are external collaborators behind `AlertChannel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Delivered,
    Failed,
    Exhausted,
    Cancelled,
}

/// One delivery obligation for one (event, channel) pair. The pair is
/// unique in the router ledger: at most one non-failed task exists per
/// pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTask {
    pub id: Uuid,
    pub event_id: Uuid,
    pub channel: ChannelKind,
    pub severity: Severity,
    pub attempts: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertTask {
    pub fn new(event_id: Uuid, channel: ChannelKind, severity: Severity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            channel,
            severity,
            attempts: 0,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// What a channel actually delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: CmeType,
    pub velocity: f64,
    pub width: f64,
    pub magnitude: f64,
    pub confidence: f32,
    pub source: DetectionSource,
    pub severity: Severity,
    /// Set by `send_test_alert`; downstream may display but not escalate
    pub test: bool,
}

impl AlertPayload {
    pub fn for_event(event: &DetectionEvent, severity: Severity) -> Self {
        Self {
            event_id: event.id,
            timestamp: event.timestamp,
            event_type: event.event_type,
            velocity: event.velocity,
            width: event.width,
            magnitude: event.magnitude,
            confidence: event.confidence,
            source: event.source,
            severity,
            test: false,
        }
    }

    /// Plain-text summary for channels without structured formatting.
    pub fn summary(&self) -> String {
        format!(
            "CME ALERT [{}] {} | type={} velocity={:.0} km/s width={:.0}° confidence={:.0}% source={:?}{}",
            self.severity.as_str().to_uppercase(),
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.event_type.as_str(),
            self.velocity,
            self.width,
            f64::from(self.confidence) * 100.0,
            self.source,
            if self.test { " (TEST)" } else { "" }
        )
    }
}
