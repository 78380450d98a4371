//! Alert routing and the delivery ledger
//!
//! Maps a confirmed detection to its severity tier, selects the
//! channels that accept that tier, and records every (event, channel)
//! pair in a ledger so an event is never queued twice on the same
//! channel while a delivery is still live.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::alerts::types::{AlertTask, ChannelKind, TaskStatus};
use crate::config::AlertConfig;
use crate::detection::types::DetectionEvent;

pub struct AlertRouter {
    ledger: Mutex<HashMap<(Uuid, ChannelKind), TaskStatus>>,
}

impl AlertRouter {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Builds pending tasks for every enabled channel whose minimum
    /// severity is met. A (event, channel) pair already in the ledger
    /// is skipped unless its previous task failed outright.
    pub fn route(&self, event: &DetectionEvent, cfg: &AlertConfig) -> Vec<AlertTask> {
        let severity = cfg.bands.severity_for(event.confidence);
        let mut ledger = self.ledger.lock();
        let mut tasks = Vec::new();

        for channel in &cfg.channels {
            if !channel.enabled || severity < channel.min_severity {
                continue;
            }
            let key = (event.id, channel.kind);
            match ledger.get(&key) {
                Some(TaskStatus::Failed) | None => {
                    ledger.insert(key, TaskStatus::Pending);
                    tasks.push(AlertTask::new(event.id, channel.kind, severity));
                }
                Some(_) => {
                    log::debug!(
                        "Alert for event {} already ledgered on {}, skipping",
                        event.id,
                        channel.kind.as_str()
                    );
                }
            }
        }

        if !tasks.is_empty() {
            log::info!(
                "Routed event {} at severity {} to {} channel(s)",
                event.id,
                severity.as_str(),
                tasks.len()
            );
        }
        tasks
    }

    /// Records a task status transition against its ledger entry.
    pub fn record(&self, event_id: Uuid, channel: ChannelKind, status: TaskStatus) {
        self.ledger.lock().insert((event_id, channel), status);
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().len()
    }
}

impl Default for AlertRouter {
    fn default() -> Self {
        Self::new()
    }
}
