// Property-based tests for schedule arithmetic, status transitions, and
// retry backoff

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::models::*;
use common::retry::{ExponentialBackoff, RetryPolicy};
use common::schedule;
use proptest::prelude::*;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    // A broad but representable range of timestamps
    (0i64..4_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

fn recipient() -> Recipient {
    Recipient {
        url: "http://localhost:9999/hook".to_string(),
        method: HttpMethod::Post,
        headers: HashMap::new(),
        payload_template: None,
    }
}

proptest! {
    /// For any positive interval, a periodic schedule starting now validates.
    #[test]
    fn prop_positive_interval_validates(interval_ms in 1i64..86_400_000) {
        let now = Utc::now();
        let schedule = Schedule::Periodic {
            start_at: now,
            interval_ms,
            repeat_limit: None,
        };
        prop_assert!(schedule::validate(&schedule, now, Duration::seconds(60)).is_ok());
    }

    /// For any non-positive interval, validation fails.
    #[test]
    fn prop_non_positive_interval_is_rejected(interval_ms in -86_400_000i64..=0) {
        let now = Utc::now();
        let schedule = Schedule::Periodic {
            start_at: now,
            interval_ms,
            repeat_limit: Some(1),
        };
        prop_assert!(schedule::validate(&schedule, now, Duration::seconds(60)).is_err());
    }

    /// The next fire time after a periodic firing is exactly the firing's due
    /// time plus the interval.
    #[test]
    fn prop_next_fire_is_last_plus_interval(
        last_fire in arb_instant(),
        interval_ms in 1i64..86_400_000,
    ) {
        let schedule = Schedule::Periodic {
            start_at: last_fire,
            interval_ms,
            repeat_limit: None,
        };
        let next = schedule::next_fire_after(&schedule, last_fire).unwrap();
        prop_assert_eq!(next - last_fire, Duration::milliseconds(interval_ms));
    }

    /// The first fire time is never in the past relative to submission.
    #[test]
    fn prop_first_fire_never_before_now(
        start in arb_instant(),
        now in arb_instant(),
    ) {
        let schedule = Schedule::Periodic {
            start_at: start,
            interval_ms: 1000,
            repeat_limit: None,
        };
        let first = schedule::first_fire_time(&schedule, now);
        prop_assert!(first >= now || first == start);
        prop_assert!(first >= now.min(start));
        prop_assert_eq!(first, start.max(now));
    }

    /// For any bounded periodic job, remaining repetitions never exceed the
    /// limit and hit zero exactly when the counter reaches the limit.
    #[test]
    fn prop_remaining_repetitions_bounded(
        limit in 0u32..1000,
        executed in 0u32..1000,
    ) {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            priority: 0,
            recipient: recipient(),
            schedule: Schedule::Periodic {
                start_at: now,
                interval_ms: 1000,
                repeat_limit: Some(limit),
            },
        };
        let mut scheduled = ScheduledJob::new(job, now);
        scheduled.execution_count = executed;

        let remaining = scheduled.remaining_repetitions().unwrap();
        prop_assert!(remaining <= limit);
        prop_assert_eq!(remaining == 0, executed >= limit);
        prop_assert_eq!(scheduled.repetitions_exhausted(), executed >= limit);
    }

    /// Status text round-trips through Display and FromStr.
    #[test]
    fn prop_status_round_trips(idx in 0usize..5) {
        let statuses = [
            JobStatus::Scheduled,
            JobStatus::Retry,
            JobStatus::Executed,
            JobStatus::Error,
            JobStatus::Canceled,
        ];
        let status = statuses[idx];
        prop_assert_eq!(JobStatus::from_str(&status.to_string()).unwrap(), status);
    }

    /// Without jitter, backoff delays grow monotonically until the cap.
    #[test]
    fn prop_backoff_monotone_until_cap(
        base_ms in 1u64..10_000,
        max_ms in 10_000u64..3_600_000,
        retry_count in 1u32..30,
    ) {
        let policy = ExponentialBackoff::with_config(base_ms, max_ms, 0.0);
        let current = policy.delay(retry_count);
        let next = policy.delay(retry_count + 1);
        prop_assert!(next >= current);
        prop_assert!(current.as_millis() as u64 <= max_ms);
        prop_assert!(current.as_millis() as u64 >= base_ms.min(max_ms));
    }

    /// With jitter, the delay stays within its configured envelope.
    #[test]
    fn prop_backoff_jitter_envelope(
        base_ms in 100u64..5_000,
        jitter in 0.0f64..1.0,
    ) {
        let policy = ExponentialBackoff::with_config(base_ms, 3_600_000, jitter);
        let delay = policy.delay(1).as_millis() as u64;
        let max_expected = base_ms + (base_ms as f64 * jitter) as u64;
        prop_assert!(delay >= base_ms);
        prop_assert!(delay <= max_expected);
    }

    /// A scheduled record serializes and deserializes losslessly.
    #[test]
    fn prop_scheduled_job_serde_round_trip(
        priority in -100i32..100,
        interval_ms in 1i64..86_400_000,
        limit in proptest::option::of(0u32..100),
        executed in 0u32..100,
        retries in 0u32..10,
    ) {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            priority,
            recipient: recipient(),
            schedule: Schedule::Periodic {
                start_at: now,
                interval_ms,
                repeat_limit: limit,
            },
        };
        let mut scheduled = ScheduledJob::new(job, now);
        scheduled.execution_count = executed;
        scheduled.retry_count = retries;

        let json = serde_json::to_string(&scheduled).unwrap();
        let parsed: ScheduledJob = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, scheduled);
    }
}
