//! Alerting: severity routing, delivery channels and retry

pub mod delivery;
pub mod router;
pub mod types;

pub use delivery::{AlertChannel, AlertDispatcher, TaskNotifier, WebhookChannel};
pub use router::AlertRouter;
pub use types::{AlertPayload, AlertTask, ChannelKind, Severity, TaskStatus};
