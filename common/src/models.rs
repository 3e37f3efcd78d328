use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Job Models
// ============================================================================

/// Job is the immutable definition of a callback to dispatch on a schedule.
///
/// Created once by the caller and never mutated afterwards; all runtime state
/// lives in [`ScheduledJob`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Higher priority fires preferentially when many jobs are due at once.
    #[serde(default)]
    pub priority: i32,
    pub recipient: Recipient,
    pub schedule: Schedule,
}

/// Recipient describes the callback target for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Payload template rendered per attempt. Supported placeholders:
    /// `${job_id}`, `${correlation_id}`, `${remaining_repetitions}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_template: Option<String>,
}

/// HttpMethod represents the supported callback request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// Schedule defines when a job fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire exactly once at an absolute time.
    OneShot { fire_at: DateTime<Utc> },
    /// Fire at `start_at`, then every `interval_ms`, optionally bounded by
    /// `repeat_limit` total firings.
    Periodic {
        start_at: DateTime<Utc>,
        interval_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repeat_limit: Option<u32>,
    },
}

impl Schedule {
    /// Repeat interval, if this schedule is periodic.
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Schedule::OneShot { .. } => None,
            Schedule::Periodic { interval_ms, .. } => {
                Some(chrono::Duration::milliseconds(*interval_ms))
            }
        }
    }
}

// ============================================================================
// ScheduledJob Models
// ============================================================================

/// JobStatus represents the lifecycle state of a scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Retry,
    Executed,
    Error,
    Canceled,
}

impl JobStatus {
    /// Terminal statuses never re-arm a firing and accept no further writes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Executed | JobStatus::Error | JobStatus::Canceled
        )
    }

    /// Statuses from which a due firing may be claimed.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Scheduled | JobStatus::Retry)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Retry => write!(f, "retry"),
            JobStatus::Executed => write!(f, "executed"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "retry" => Ok(JobStatus::Retry),
            "executed" => Ok(JobStatus::Executed),
            "error" => Ok(JobStatus::Error),
            "canceled" => Ok(JobStatus::Canceled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        Self::from_str(&s)
    }
}

/// ScheduledJob is the mutable runtime record for one [`Job`].
///
/// Persisted through the repository; `updated_at` is the optimistic-concurrency
/// token every conditional write carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job: Job,
    pub status: JobStatus,
    /// Number of firings already completed successfully. Never resets.
    pub execution_count: u32,
    /// Consecutive failures since the last success. Resets on success.
    pub retry_count: u32,
    /// Next due time; `None` once the job is terminal.
    pub next_fire_at: Option<DateTime<Utc>>,
    /// Due time of the most recently claimed firing; feeds the
    /// `last fire + interval` arithmetic for periodic jobs.
    pub last_fire_at: Option<DateTime<Utc>>,
    /// Version token the repository compares on every conditional write.
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Create a fresh record in `Scheduled` state with its first fire time.
    pub fn new(job: Job, first_fire_at: DateTime<Utc>) -> Self {
        Self {
            job,
            status: JobStatus::Scheduled,
            execution_count: 0,
            retry_count: 0,
            next_fire_at: Some(first_fire_at),
            last_fire_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Firings still owed to the receiver, counting the one in flight.
    ///
    /// `None` for unbounded periodic schedules.
    pub fn remaining_repetitions(&self) -> Option<u32> {
        match &self.job.schedule {
            Schedule::OneShot { .. } => Some(1_u32.saturating_sub(self.execution_count)),
            Schedule::Periodic { repeat_limit, .. } => {
                repeat_limit.map(|limit| limit.saturating_sub(self.execution_count))
            }
        }
    }

    /// Whether the repeat limit has been reached after `execution_count`
    /// completed firings.
    pub fn repetitions_exhausted(&self) -> bool {
        match &self.job.schedule {
            Schedule::OneShot { .. } => self.execution_count >= 1,
            Schedule::Periodic { repeat_limit, .. } => {
                repeat_limit.is_some_and(|limit| self.execution_count >= limit)
            }
        }
    }
}

// ============================================================================
// Execution Outcome Models
// ============================================================================

/// ResponseCode classifies what the callback transport observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    /// HTTP status returned by the receiver.
    Status(u16),
    /// The call exceeded the configured per-call timeout.
    Timeout,
    /// The receiver could not be reached at all.
    Unreachable,
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseCode::Status(code) => write!(f, "{}", code),
            ResponseCode::Timeout => write!(f, "timeout"),
            ResponseCode::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// JobExecutionResponse is the outcome of a single dispatch attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionResponse {
    pub job_id: Uuid,
    pub code: ResponseCode,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobExecutionResponse {
    pub fn succeeded(job_id: Uuid, status: u16) -> Self {
        Self {
            job_id,
            code: ResponseCode::Status(status),
            success: true,
            message: None,
        }
    }

    pub fn failed(job_id: Uuid, code: ResponseCode, message: impl Into<Option<String>>) -> Self {
        Self {
            job_id,
            code,
            success: false,
            message: message.into(),
        }
    }
}

/// StatusChange is the record published on the status-change event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
}

impl StatusChange {
    pub fn now(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_shot_job(fire_at: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            priority: 0,
            recipient: Recipient {
                url: "http://localhost:9999/hook".to_string(),
                method: HttpMethod::Post,
                headers: HashMap::new(),
                payload_template: None,
            },
            schedule: Schedule::OneShot { fire_at },
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Scheduled,
            JobStatus::Retry,
            JobStatus::Executed,
            JobStatus::Error,
            JobStatus::Canceled,
        ] {
            let parsed = JobStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(JobStatus::from_str("running").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Scheduled.is_terminal());
        assert!(!JobStatus::Retry.is_terminal());
        assert!(JobStatus::Executed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());

        assert!(JobStatus::Scheduled.is_claimable());
        assert!(JobStatus::Retry.is_claimable());
        assert!(!JobStatus::Canceled.is_claimable());
    }

    #[test]
    fn test_remaining_repetitions_one_shot() {
        let now = Utc::now();
        let mut scheduled = ScheduledJob::new(one_shot_job(now), now);
        assert_eq!(scheduled.remaining_repetitions(), Some(1));
        assert!(!scheduled.repetitions_exhausted());

        scheduled.execution_count = 1;
        assert_eq!(scheduled.remaining_repetitions(), Some(0));
        assert!(scheduled.repetitions_exhausted());
    }

    #[test]
    fn test_remaining_repetitions_periodic() {
        let now = Utc::now();
        let mut job = one_shot_job(now);
        job.schedule = Schedule::Periodic {
            start_at: now,
            interval_ms: 1000,
            repeat_limit: Some(3),
        };
        let mut scheduled = ScheduledJob::new(job, now);

        assert_eq!(scheduled.remaining_repetitions(), Some(3));
        scheduled.execution_count = 2;
        assert_eq!(scheduled.remaining_repetitions(), Some(1));
        assert!(!scheduled.repetitions_exhausted());
        scheduled.execution_count = 3;
        assert!(scheduled.repetitions_exhausted());
    }

    #[test]
    fn test_unbounded_periodic_never_exhausts() {
        let now = Utc::now();
        let mut job = one_shot_job(now);
        job.schedule = Schedule::Periodic {
            start_at: now,
            interval_ms: 500,
            repeat_limit: None,
        };
        let mut scheduled = ScheduledJob::new(job, now);
        scheduled.execution_count = 10_000;

        assert_eq!(scheduled.remaining_repetitions(), None);
        assert!(!scheduled.repetitions_exhausted());
    }

    #[test]
    fn test_schedule_serde_round_trip() {
        let schedule = Schedule::Periodic {
            start_at: Utc::now(),
            interval_ms: 2500,
            repeat_limit: Some(7),
        };
        let json = serde_json::to_string(&schedule).unwrap();
        assert!(json.contains("\"type\":\"periodic\""));
        let parsed: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schedule);
    }

    #[test]
    fn test_response_code_display() {
        assert_eq!(ResponseCode::Status(503).to_string(), "503");
        assert_eq!(ResponseCode::Timeout.to_string(), "timeout");
        assert_eq!(ResponseCode::Unreachable.to_string(), "unreachable");
    }
}
