// Schedule validation and fire-time arithmetic
//
// Turns a job's schedule into concrete due times: the first fire time at
// submission, and the next fire time after each successful periodic firing.

use crate::errors::ScheduleError;
use crate::models::Schedule;
use chrono::{DateTime, Duration, Utc};

/// Validate a schedule at submission time.
///
/// A periodic interval must be strictly positive, and no fire time may lie
/// further in the past than `past_tolerance` — a slightly-stale submission is
/// dispatched immediately, an indefinitely-old one is rejected.
pub fn validate(
    schedule: &Schedule,
    now: DateTime<Utc>,
    past_tolerance: Duration,
) -> Result<(), ScheduleError> {
    match schedule {
        Schedule::OneShot { fire_at } => {
            if *fire_at < now - past_tolerance {
                return Err(ScheduleError::FireTimeInPast { fire_at: *fire_at });
            }
            Ok(())
        }
        Schedule::Periodic {
            start_at,
            interval_ms,
            ..
        } => {
            if *interval_ms <= 0 {
                return Err(ScheduleError::InvalidInterval(*interval_ms));
            }
            if *start_at < now - past_tolerance {
                return Err(ScheduleError::FireTimeInPast { fire_at: *start_at });
            }
            Ok(())
        }
    }
}

/// First due time for a newly submitted job.
///
/// A start time within the past-tolerance window is clamped to `now` so the
/// job fires on the next poll instead of looking overdue.
pub fn first_fire_time(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
    let start = match schedule {
        Schedule::OneShot { fire_at } => *fire_at,
        Schedule::Periodic { start_at, .. } => *start_at,
    };
    start.max(now)
}

/// Next due time after a firing whose due time was `last_fire`.
///
/// `None` for one-shot schedules: a completed one-shot never re-arms.
pub fn next_fire_after(schedule: &Schedule, last_fire: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::OneShot { .. } => None,
        Schedule::Periodic { interval_ms, .. } => {
            Some(last_fire + Duration::milliseconds(*interval_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tolerance() -> Duration {
        Duration::seconds(60)
    }

    #[test]
    fn test_one_shot_future_is_valid() {
        let now = Utc::now();
        let schedule = Schedule::OneShot {
            fire_at: now + Duration::hours(1),
        };
        assert!(validate(&schedule, now, tolerance()).is_ok());
    }

    #[test]
    fn test_one_shot_slightly_stale_is_valid() {
        let now = Utc::now();
        let schedule = Schedule::OneShot {
            fire_at: now - Duration::seconds(5),
        };
        assert!(validate(&schedule, now, tolerance()).is_ok());
    }

    #[test]
    fn test_one_shot_far_past_is_rejected() {
        let now = Utc::now();
        let schedule = Schedule::OneShot {
            fire_at: now - Duration::hours(2),
        };
        assert!(matches!(
            validate(&schedule, now, tolerance()),
            Err(ScheduleError::FireTimeInPast { .. })
        ));
    }

    #[test]
    fn test_periodic_zero_interval_is_rejected() {
        let now = Utc::now();
        let schedule = Schedule::Periodic {
            start_at: now,
            interval_ms: 0,
            repeat_limit: Some(5),
        };
        assert!(matches!(
            validate(&schedule, now, tolerance()),
            Err(ScheduleError::InvalidInterval(0))
        ));
    }

    #[test]
    fn test_periodic_negative_interval_is_rejected() {
        let now = Utc::now();
        let schedule = Schedule::Periodic {
            start_at: now,
            interval_ms: -1000,
            repeat_limit: None,
        };
        assert!(validate(&schedule, now, tolerance()).is_err());
    }

    #[test]
    fn test_first_fire_time_future_start() {
        let now = Utc::now();
        let start = now + Duration::minutes(10);
        let schedule = Schedule::Periodic {
            start_at: start,
            interval_ms: 1000,
            repeat_limit: None,
        };
        assert_eq!(first_fire_time(&schedule, now), start);
    }

    #[test]
    fn test_first_fire_time_stale_start_clamps_to_now() {
        let now = Utc::now();
        let schedule = Schedule::Periodic {
            start_at: now - Duration::seconds(10),
            interval_ms: 1000,
            repeat_limit: None,
        };
        assert_eq!(first_fire_time(&schedule, now), now);
    }

    #[test]
    fn test_next_fire_after_one_shot_is_none() {
        let now = Utc::now();
        let schedule = Schedule::OneShot { fire_at: now };
        assert_eq!(next_fire_after(&schedule, now), None);
    }

    #[test]
    fn test_next_fire_after_periodic_uses_last_fire_time() {
        let now = Utc::now();
        let schedule = Schedule::Periodic {
            start_at: now,
            interval_ms: 1500,
            repeat_limit: Some(3),
        };
        let next = next_fire_after(&schedule, now).unwrap();
        assert_eq!(next, now + Duration::milliseconds(1500));
    }
}
