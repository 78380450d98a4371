//! Alert delivery workers
//!
//! A bounded worker pool drains a queue of delivery jobs. Each job is
//! attempted against its channel with a per-attempt timeout, retried
//! with exponential backoff and jitter up to the attempt ceiling, and
//! every status transition is pushed back to the caller and the
//! router ledger.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::alerts::router::AlertRouter;
use crate::alerts::types::{AlertPayload, AlertTask, ChannelKind, Severity, TaskStatus};
use crate::config::AlertConfig;
use crate::detection::types::{CmeType, DetectionSource};
use crate::error::{DeliveryError, EngineError, EngineResult};

/// One delivery transport. Implementations must be safe to call
/// concurrently from multiple workers.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;
    async fn deliver(&self, payload: &AlertPayload) -> Result<(), DeliveryError>;
}

// ============ Webhook channel ============

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

/// POSTs the alert payload as JSON to a configured endpoint.
pub struct WebhookChannel {
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn deliver(&self, payload: &AlertPayload) -> Result<(), DeliveryError> {
        let response = HTTP_CLIENT
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(response.status().as_u16()))
        }
    }
}

// ============ Dispatcher ============

/// Invoked on every task status transition.
pub type TaskNotifier = Arc<dyn Fn(&AlertTask) + Send + Sync>;

struct DeliveryJob {
    task: AlertTask,
    payload: AlertPayload,
}

struct DispatchShared {
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
    router: Arc<AlertRouter>,
    notify: TaskNotifier,
    cancelled: Mutex<HashSet<Uuid>>,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    delivery_timeout_ms: u64,
}

pub struct AlertDispatcher {
    tx: mpsc::Sender<DeliveryJob>,
    shared: Arc<DispatchShared>,
}

impl AlertDispatcher {
    pub fn new(
        channels: Vec<Arc<dyn AlertChannel>>,
        cfg: &AlertConfig,
        router: Arc<AlertRouter>,
        notify: TaskNotifier,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<DeliveryJob>(256);
        let rx = Arc::new(AsyncMutex::new(rx));

        let shared = Arc::new(DispatchShared {
            channels: channels.into_iter().map(|c| (c.kind(), c)).collect(),
            router,
            notify,
            cancelled: Mutex::new(HashSet::new()),
            max_attempts: cfg.max_attempts.max(1),
            base_backoff_ms: cfg.base_backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
            delivery_timeout_ms: cfg.delivery_timeout_ms,
        });

        for worker_id in 0..cfg.workers.max(1) {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                log::debug!("Alert delivery worker {} started", worker_id);
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => run_task(&shared, job).await,
                        None => break,
                    }
                }
            });
        }

        Self { tx, shared }
    }

    /// Queues a task for delivery. The first Pending notification fires
    /// when a worker picks the job up.
    pub async fn dispatch(&self, task: AlertTask, payload: AlertPayload) -> EngineResult<()> {
        self.tx
            .send(DeliveryJob { task, payload })
            .await
            .map_err(|_| {
                EngineError::Delivery(DeliveryError::Transport(
                    "delivery queue closed".to_string(),
                ))
            })
    }

    /// Marks an event as cancelled. In-flight tasks for it stop before
    /// their next attempt.
    pub fn cancel_event(&self, event_id: Uuid) {
        self.shared.cancelled.lock().insert(event_id);
    }

    /// One-shot delivery of a synthetic payload, bypassing severity
    /// gating and the ledger. Exercises the channel path only.
    pub async fn send_test_alert(&self, kind: ChannelKind) -> EngineResult<()> {
        let channel = self
            .shared
            .channels
            .get(&kind)
            .ok_or(EngineError::Delivery(DeliveryError::ChannelUnavailable(
                kind,
            )))?;

        let payload = AlertPayload {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: CmeType::NonHalo,
            velocity: 0.0,
            width: 0.0,
            magnitude: 0.0,
            confidence: 0.0,
            source: DetectionSource::Rule,
            severity: Severity::Low,
            test: true,
        };

        let deadline = Duration::from_millis(self.shared.delivery_timeout_ms);
        match timeout(deadline, channel.deliver(&payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EngineError::Delivery(e)),
            Err(_) => Err(EngineError::Delivery(DeliveryError::Timeout(
                self.shared.delivery_timeout_ms,
            ))),
        }
    }
}

async fn run_task(shared: &DispatchShared, job: DeliveryJob) {
    let DeliveryJob { mut task, payload } = job;
    (shared.notify)(&task);

    let channel = match shared.channels.get(&task.channel) {
        Some(c) => Arc::clone(c),
        None => {
            log::error!(
                "No transport registered for channel {}, failing task {}",
                task.channel.as_str(),
                task.id
            );
            task.transition(TaskStatus::Failed);
            shared
                .router
                .record(task.event_id, task.channel, TaskStatus::Failed);
            (shared.notify)(&task);
            return;
        }
    };

    let deadline = Duration::from_millis(shared.delivery_timeout_ms);
    for attempt in 1..=shared.max_attempts {
        if shared.cancelled.lock().contains(&task.event_id) {
            log::info!(
                "Event {} cancelled, dropping {} delivery",
                task.event_id,
                task.channel.as_str()
            );
            task.transition(TaskStatus::Cancelled);
            shared
                .router
                .record(task.event_id, task.channel, TaskStatus::Cancelled);
            (shared.notify)(&task);
            return;
        }

        task.attempts = attempt;
        let result = match timeout(deadline, channel.deliver(&payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(shared.delivery_timeout_ms)),
        };

        match result {
            Ok(()) => {
                log::info!(
                    "Delivered alert for event {} via {} on attempt {}",
                    task.event_id,
                    task.channel.as_str(),
                    attempt
                );
                task.transition(TaskStatus::Delivered);
                shared
                    .router
                    .record(task.event_id, task.channel, TaskStatus::Delivered);
                (shared.notify)(&task);
                return;
            }
            Err(err) => {
                log::warn!(
                    "Delivery attempt {}/{} for event {} via {} failed: {}",
                    attempt,
                    shared.max_attempts,
                    task.event_id,
                    task.channel.as_str(),
                    err
                );
                if attempt < shared.max_attempts {
                    task.transition(TaskStatus::Pending);
                    (shared.notify)(&task);
                    tokio::time::sleep(backoff_delay(shared, attempt)).await;
                }
            }
        }
    }

    task.transition(TaskStatus::Exhausted);
    shared
        .router
        .record(task.event_id, task.channel, TaskStatus::Exhausted);
    (shared.notify)(&task);
    log::error!(
        "{}",
        EngineError::DeliveryExhausted {
            event_id: task.event_id,
            channel: task.channel,
            attempts: task.attempts,
        }
    );
}

/// Exponential backoff with jitter, capped at `max_backoff_ms`.
fn backoff_delay(shared: &DispatchShared, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = shared.base_backoff_ms.saturating_mul(1u64 << exp);
    let capped = base.min(shared.max_backoff_ms);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis(capped.saturating_add(jitter).min(shared.max_backoff_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyChannel {
        kind: ChannelKind,
        failures_left: AtomicU32,
        delivered: Mutex<Vec<AlertPayload>>,
    }

    impl FlakyChannel {
        fn new(kind: ChannelKind, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                kind,
                failures_left: AtomicU32::new(failures),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AlertChannel for FlakyChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn deliver(&self, payload: &AlertPayload) -> Result<(), DeliveryError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DeliveryError::Transport("simulated outage".to_string()));
            }
            self.delivered.lock().push(payload.clone());
            Ok(())
        }
    }

    fn fast_alert_cfg() -> AlertConfig {
        AlertConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            delivery_timeout_ms: 200,
            workers: 1,
            ..AlertConfig::default()
        }
    }

    fn recording_notifier() -> (TaskNotifier, Arc<Mutex<Vec<TaskStatus>>>) {
        let seen: Arc<Mutex<Vec<TaskStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier: TaskNotifier = Arc::new(move |task: &AlertTask| {
            sink.lock().push(task.status);
        });
        (notifier, seen)
    }

    async fn wait_for_terminal(seen: &Mutex<Vec<TaskStatus>>) {
        for _ in 0..200 {
            {
                let statuses = seen.lock();
                if statuses.iter().any(|s| {
                    matches!(
                        s,
                        TaskStatus::Delivered
                            | TaskStatus::Exhausted
                            | TaskStatus::Failed
                            | TaskStatus::Cancelled
                    )
                }) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("delivery never reached a terminal status");
    }

    fn task_for(channel: ChannelKind) -> (AlertTask, AlertPayload) {
        let task = AlertTask::new(Uuid::new_v4(), channel, Severity::High);
        let payload = AlertPayload {
            event_id: task.event_id,
            timestamp: Utc::now(),
            event_type: CmeType::Halo,
            velocity: 900.0,
            width: 300.0,
            magnitude: 9.0,
            confidence: 0.85,
            source: DetectionSource::Combined,
            severity: Severity::High,
            test: false,
        };
        (task, payload)
    }

    #[tokio::test]
    async fn test_exhaustion_status_sequence() {
        let channel = FlakyChannel::new(ChannelKind::Webhook, 99);
        let router = Arc::new(AlertRouter::new());
        let (notifier, seen) = recording_notifier();
        let dispatcher = AlertDispatcher::new(
            vec![channel as Arc<dyn AlertChannel>],
            &fast_alert_cfg(),
            Arc::clone(&router),
            notifier,
        );

        let (task, payload) = task_for(ChannelKind::Webhook);
        dispatcher.dispatch(task, payload).await.unwrap();
        wait_for_terminal(&seen).await;

        assert_eq!(
            *seen.lock(),
            vec![
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::Exhausted,
            ]
        );
        // Ledger keeps the terminal status so routing never reopens it.
        assert_eq!(router.ledger_len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_after_transient_failure() {
        let channel = FlakyChannel::new(ChannelKind::Webhook, 1);
        let router = Arc::new(AlertRouter::new());
        let (notifier, seen) = recording_notifier();
        let dispatcher = AlertDispatcher::new(
            vec![Arc::clone(&channel) as Arc<dyn AlertChannel>],
            &fast_alert_cfg(),
            router,
            notifier,
        );

        let (task, payload) = task_for(ChannelKind::Webhook);
        dispatcher.dispatch(task, payload).await.unwrap();
        wait_for_terminal(&seen).await;

        assert_eq!(
            *seen.lock(),
            vec![
                TaskStatus::Pending,
                TaskStatus::Pending,
                TaskStatus::Delivered,
            ]
        );
        assert_eq!(channel.delivered.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_event_skips_delivery() {
        let channel = FlakyChannel::new(ChannelKind::Webhook, 0);
        let router = Arc::new(AlertRouter::new());
        let (notifier, seen) = recording_notifier();
        let dispatcher = AlertDispatcher::new(
            vec![Arc::clone(&channel) as Arc<dyn AlertChannel>],
            &fast_alert_cfg(),
            router,
            notifier,
        );

        let (task, payload) = task_for(ChannelKind::Webhook);
        dispatcher.cancel_event(task.event_id);
        dispatcher.dispatch(task, payload).await.unwrap();
        wait_for_terminal(&seen).await;

        assert_eq!(
            *seen.lock(),
            vec![TaskStatus::Pending, TaskStatus::Cancelled]
        );
        assert!(channel.delivered.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_test_alert_bypasses_ledger() {
        let channel = FlakyChannel::new(ChannelKind::Webhook, 0);
        let router = Arc::new(AlertRouter::new());
        let (notifier, _seen) = recording_notifier();
        let dispatcher = AlertDispatcher::new(
            vec![Arc::clone(&channel) as Arc<dyn AlertChannel>],
            &fast_alert_cfg(),
            Arc::clone(&router),
            notifier,
        );

        dispatcher
            .send_test_alert(ChannelKind::Webhook)
            .await
            .unwrap();

        assert_eq!(router.ledger_len(), 0);
        let delivered = channel.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].test);
    }

    #[tokio::test]
    async fn test_send_test_alert_unknown_channel() {
        let router = Arc::new(AlertRouter::new());
        let (notifier, _seen) = recording_notifier();
        let dispatcher = AlertDispatcher::new(vec![], &fast_alert_cfg(), router, notifier);

        let err = dispatcher
            .send_test_alert(ChannelKind::Sms)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Delivery(DeliveryError::ChannelUnavailable(ChannelKind::Sms))
        ));
    }
}
