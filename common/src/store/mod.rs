// Job repository contract
//
// The store is the single source of truth shared by all engine instances.
// Every mutation is conditional on the version token the caller read, which
// is what makes claims and cancels race-safe without in-process locking.

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::{DbPool, PostgresJobStore};

use crate::errors::StoreError;
use crate::models::{JobStatus, ScheduledJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Crash-safe persistence contract consumed by the scheduler core.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Conditional upsert.
    ///
    /// Inserts when no record exists for the job id. Updates when the stored
    /// record's `updated_at` equals the one the caller read; otherwise fails
    /// with [`StoreError::StaleWrite`] instead of silently overwriting.
    /// Returns the stored copy with its freshly bumped `updated_at`.
    async fn save(&self, job: &ScheduledJob) -> Result<ScheduledJob, StoreError>;

    /// Point lookup. Absence is `Ok(None)`, never an error.
    async fn get(&self, id: Uuid) -> Result<Option<ScheduledJob>, StoreError>;

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Remove a record and return the prior value, so callers can detect a
    /// concurrent delete.
    async fn delete(&self, id: Uuid) -> Result<Option<ScheduledJob>, StoreError>;

    /// The due-jobs poll: records with the given status whose `next_fire_at`
    /// falls in `[from, to)`, ordered by descending priority, insertion order
    /// breaking ties.
    async fn find_by_status_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<Vec<ScheduledJob>, StoreError>;

    /// Full enumeration for diagnostics and recovery tooling; not part of the
    /// hot scheduling path.
    async fn find_all(&self) -> Result<Vec<ScheduledJob>, StoreError>;
}
