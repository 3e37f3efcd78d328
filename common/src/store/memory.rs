// In-memory job store
//
// Backs tests and single-node deployments. Mirrors the conditional-write
// semantics of the Postgres adapter exactly, including the insertion
// sequence used to break priority ties.

use crate::errors::StoreError;
use crate::models::{JobStatus, ScheduledJob};
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

struct StoredRecord {
    job: ScheduledJob,
    seq: u64,
}

/// MemoryJobStore keeps all records behind a single async RwLock.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<Uuid, StoredRecord>>,
    seq: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version tokens must move strictly forward or a CAS against the old
    /// token would still succeed after an update within the same tick.
    fn bump_version(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let now = Utc::now();
        match previous {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &ScheduledJob) -> Result<ScheduledJob, StoreError> {
        let mut records = self.records.write().await;

        match records.entry(job.job.id) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.job.updated_at != job.updated_at {
                    return Err(StoreError::StaleWrite(job.job.id));
                }
                let mut stored = job.clone();
                stored.updated_at = Self::bump_version(Some(existing.job.updated_at));
                existing.job = stored.clone();
                Ok(stored)
            }
            Entry::Vacant(entry) => {
                let mut stored = job.clone();
                stored.updated_at = Self::bump_version(None);
                entry.insert(StoredRecord {
                    job: stored.clone(),
                    seq: self.seq.fetch_add(1, Ordering::SeqCst),
                });
                Ok(stored)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledJob>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&id).map(|r| r.job.clone()))
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let records = self.records.read().await;
        Ok(records.contains_key(&id))
    }

    async fn delete(&self, id: Uuid) -> Result<Option<ScheduledJob>, StoreError> {
        let mut records = self.records.write().await;
        Ok(records.remove(&id).map(|r| r.job))
    }

    async fn find_by_status_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        status: JobStatus,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        let records = self.records.read().await;

        let mut due: Vec<(&StoredRecord, DateTime<Utc>)> = records
            .values()
            .filter_map(|r| match r.job.next_fire_at {
                Some(fire_at) if r.job.status == status && fire_at >= from && fire_at < to => {
                    Some((r, fire_at))
                }
                _ => None,
            })
            .collect();

        due.sort_by(|(a, _), (b, _)| {
            b.job
                .job
                .priority
                .cmp(&a.job.job.priority)
                .then(a.seq.cmp(&b.seq))
        });

        Ok(due.into_iter().map(|(r, _)| r.job.clone()).collect())
    }

    async fn find_all(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        let records = self.records.read().await;
        let mut all: Vec<&StoredRecord> = records.values().collect();
        all.sort_by_key(|r| r.seq);
        Ok(all.into_iter().map(|r| r.job.clone()).collect())
    }
}
