// Error handling framework

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Schedule validation errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Repeat interval must be positive, got {0}ms")]
    InvalidInterval(i64),

    #[error("Fire time {fire_at} lies further in the past than the allowed tolerance")]
    FireTimeInPast { fire_at: DateTime<Utc> },

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfiguration(String),
}

/// Repository errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Stale write for job {0}: stored record has moved")]
    StaleWrite(Uuid),

    #[error("Record serialization failed: {0}")]
    Serialization(String),

    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Store query failed: {0}")]
    QueryFailed(String),

    #[error("Store health check failed: {0}")]
    HealthCheckFailed(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => StoreError::ConnectionFailed(e.to_string()),
            sqlx::Error::PoolTimedOut => {
                StoreError::ConnectionFailed("connection pool timed out".to_string())
            }
            sqlx::Error::Database(db_err) => StoreError::QueryFailed(db_err.message().to_string()),
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Scheduler API errors, returned synchronously to the caller
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job already scheduled: {0}")]
    DuplicateJob(Uuid),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Callback dispatch contract violations
///
/// A non-2xx response, timeout, or connection failure is a normal outcome
/// classified in `JobExecutionResponse`, never an error. These variants cover
/// requests that cannot be built at all.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid recipient URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid recipient header '{0}'")]
    InvalidHeader(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Payload template errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Undefined placeholder(s) in template: {placeholders:?}. Template: {template}")]
    UndefinedPlaceholder {
        placeholders: Vec<String>,
        template: String,
    },

    #[error("Regex compilation error: {0}")]
    RegexError(String),
}

/// Event sink errors
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Failed to connect to event transport: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Failed to publish event: {0}")]
    PublishFailed(String),

    #[error("Event serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Event publish timeout: {0}")]
    Timeout(String),
}
