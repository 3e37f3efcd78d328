// Outcome and status-change event channels
//
// The engine emits exactly one outcome event per firing attempt, before the
// repository write for that attempt completes; status-change events follow
// the successful write. Sinks fan those out however they like.

pub mod nats;

pub use nats::{EventsConfig, NatsEventPublisher};

use crate::errors::EventError;
use crate::models::{JobExecutionResponse, StatusChange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// SchedulerEvent is the union of everything the engine publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    ExecutionSucceeded(JobExecutionResponse),
    ExecutionFailed(JobExecutionResponse),
    StatusChanged(StatusChange),
}

/// EventSink receives engine events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn job_succeeded(&self, response: &JobExecutionResponse) -> Result<(), EventError>;
    async fn job_failed(&self, response: &JobExecutionResponse) -> Result<(), EventError>;
    async fn status_changed(&self, change: &StatusChange) -> Result<(), EventError>;
}

/// LogEventSink records events in the structured log and nothing else.
///
/// The default sink for deployments without an event bus.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn job_succeeded(&self, response: &JobExecutionResponse) -> Result<(), EventError> {
        info!(
            job_id = %response.job_id,
            code = %response.code,
            "Job execution succeeded"
        );
        Ok(())
    }

    async fn job_failed(&self, response: &JobExecutionResponse) -> Result<(), EventError> {
        warn!(
            job_id = %response.job_id,
            code = %response.code,
            message = response.message.as_deref().unwrap_or(""),
            "Job execution failed"
        );
        Ok(())
    }

    async fn status_changed(&self, change: &StatusChange) -> Result<(), EventError> {
        info!(
            job_id = %change.job_id,
            status = %change.status,
            "Job status changed"
        );
        Ok(())
    }
}

/// BroadcastEventSink fans events out to in-process subscribers.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: SchedulerEvent) -> Result<(), EventError> {
        // A send error only means nobody is subscribed right now
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn job_succeeded(&self, response: &JobExecutionResponse) -> Result<(), EventError> {
        self.send(SchedulerEvent::ExecutionSucceeded(response.clone()))
    }

    async fn job_failed(&self, response: &JobExecutionResponse) -> Result<(), EventError> {
        self.send(SchedulerEvent::ExecutionFailed(response.clone()))
    }

    async fn status_changed(&self, change: &StatusChange) -> Result<(), EventError> {
        self.send(SchedulerEvent::StatusChanged(change.clone()))
    }
}
