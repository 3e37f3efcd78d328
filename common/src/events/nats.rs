// NATS JetStream event publisher
//
// Publishes outcome and status-change events on per-job subjects so bus
// consumers can subscribe to one job, one channel, or everything.

use crate::errors::EventError;
use crate::events::{EventSink, SchedulerEvent};
use crate::models::{JobExecutionResponse, StatusChange};
use async_trait::async_trait;
use async_nats::jetstream::{
    context::PublishAckFuture,
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Event transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream name for scheduler events
    pub stream_name: String,
    /// Subject prefix; events publish on `<prefix>.success|error|status.<job_id>`
    pub subject_prefix: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Maximum number of messages to retain
    pub max_messages: i64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "SCHEDULER_EVENTS".to_string(),
            subject_prefix: "jobs".to_string(),
            max_age_seconds: 86400, // 24 hours
            max_messages: 1_000_000,
        }
    }
}

/// NATS-based event sink implementation
pub struct NatsEventPublisher {
    jetstream: JetStreamContext,
    config: EventsConfig,
    publish_timeout: Duration,
}

impl NatsEventPublisher {
    /// Connect to the NATS server and build a publisher.
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: EventsConfig) -> Result<Self, EventError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| EventError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server");

        let jetstream = async_nats::jetstream::new(client);

        Ok(Self {
            jetstream,
            config,
            publish_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Create the event stream if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, EventError> {
        info!(
            stream_name = %self.config.stream_name,
            "Initializing JetStream event stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![format!("{}.>", self.config.subject_prefix)],
            retention: RetentionPolicy::Limits,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            max_messages: self.config.max_messages,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| EventError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        info!(
            stream_name = %self.config.stream_name,
            "Event stream initialized"
        );

        Ok(stream)
    }

    fn subject(&self, channel: &str, job_id: Uuid) -> String {
        format!("{}.{}.{}", self.config.subject_prefix, channel, job_id)
    }

    #[instrument(skip_all, fields(subject = %subject, job_id = %job_id))]
    async fn publish(
        &self,
        subject: String,
        job_id: Uuid,
        event: &SchedulerEvent,
    ) -> Result<(), EventError> {
        let payload = serde_json::to_vec(event).map_err(|e| {
            EventError::SerializationFailed(format!("Failed to serialize event: {}", e))
        })?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", Uuid::new_v4().to_string().as_str());
        headers.insert("Job-Id", job_id.to_string().as_str());

        let publish_future: PublishAckFuture = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| EventError::PublishFailed(format!("Failed to publish event: {}", e)))?;

        let ack_result = tokio::time::timeout(self.publish_timeout, publish_future).await;

        match ack_result {
            Ok(Ok(_ack)) => {
                debug!(subject = %subject, "Event published");
                Ok(())
            }
            Ok(Err(e)) => Err(EventError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(EventError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}

#[async_trait]
impl EventSink for NatsEventPublisher {
    async fn job_succeeded(&self, response: &JobExecutionResponse) -> Result<(), EventError> {
        let subject = self.subject("success", response.job_id);
        self.publish(
            subject,
            response.job_id,
            &SchedulerEvent::ExecutionSucceeded(response.clone()),
        )
        .await
    }

    async fn job_failed(&self, response: &JobExecutionResponse) -> Result<(), EventError> {
        let subject = self.subject("error", response.job_id);
        self.publish(
            subject,
            response.job_id,
            &SchedulerEvent::ExecutionFailed(response.clone()),
        )
        .await
    }

    async fn status_changed(&self, change: &StatusChange) -> Result<(), EventError> {
        let subject = self.subject("status", change.job_id);
        self.publish(
            subject,
            change.job_id,
            &SchedulerEvent::StatusChanged(change.clone()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EventsConfig::default();
        assert_eq!(config.stream_name, "SCHEDULER_EVENTS");
        assert_eq!(config.subject_prefix, "jobs");
    }

    #[test]
    fn test_subject_layout() {
        let config = EventsConfig::default();
        let job_id = Uuid::new_v4();
        let subject = format!("{}.success.{}", config.subject_prefix, job_id);
        assert!(subject.starts_with("jobs.success."));
        assert!(subject.ends_with(&job_id.to_string()));
    }
}
