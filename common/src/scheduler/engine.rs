// Scheduler engine implementation
//
// Owns the authoritative job state machine. Safety across engine instances
// comes from the store's conditional writes: a due firing is dispatched only
// after a claim write wins, and every state transition carries the version
// the handler read. In-process timers are a latency optimization; the poll
// loop alone is sufficient for correctness.

use crate::errors::{SchedulerError, StoreError};
use crate::events::EventSink;
use crate::executor::CallbackExecutor;
use crate::models::{Job, JobExecutionResponse, JobStatus, ScheduledJob, StatusChange};
use crate::retry::RetryPolicy;
use crate::schedule;
use crate::store::JobStore;
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Configuration for the scheduler core
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the safety-net poll scans for due jobs
    pub poll_interval: StdDuration,
    /// How long a claimed firing stays invisible to other instances; a
    /// crashed claimant's job re-enters the poll window when this expires
    pub claim_lease: StdDuration,
    /// Total failed attempts before a job transitions to `Error`
    pub max_retries: u32,
    /// Upper bound on firings dispatched per poll cycle
    pub max_jobs_per_poll: usize,
    /// How stale a submitted fire time may be before rejection
    pub past_tolerance: StdDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_secs(10),
            claim_lease: StdDuration::from_secs(30),
            max_retries: 3,
            max_jobs_per_poll: 100,
            past_tolerance: StdDuration::from_secs(60),
        }
    }
}

/// Main scheduler engine
pub struct SchedulerCore {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn CallbackExecutor>,
    events: Arc<dyn EventSink>,
    retry_policy: Arc<dyn RetryPolicy>,
    /// Pending in-process timers, keyed by job id. A cache over the store,
    /// never a second source of truth.
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    completion_tx: mpsc::UnboundedSender<JobExecutionResponse>,
    completion_rx: Mutex<Option<mpsc::UnboundedReceiver<JobExecutionResponse>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerCore {
    /// Create a new scheduler core over explicit collaborators.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn CallbackExecutor>,
        events: Arc<dyn EventSink>,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Arc<Self> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Arc::new(Self {
            config,
            store,
            executor,
            events,
            retry_policy,
            timers: Mutex::new(HashMap::new()),
            completion_tx,
            completion_rx: Mutex::new(Some(completion_rx)),
            shutdown_tx,
        })
    }

    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    fn claim_lease(&self) -> Duration {
        Duration::from_std(self.config.claim_lease).unwrap_or_else(|_| Duration::seconds(30))
    }

    fn past_tolerance(&self) -> Duration {
        Duration::from_std(self.config.past_tolerance).unwrap_or_else(|_| Duration::seconds(60))
    }

    /// Validate and persist a new job, arm its first firing, and return the
    /// job id.
    ///
    /// Rejects duplicate ids with [`SchedulerError::DuplicateJob`] and bad
    /// schedules with [`SchedulerError::InvalidSchedule`]; neither is ever
    /// persisted.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn schedule_job(self: &Arc<Self>, job: Job) -> Result<Uuid, SchedulerError> {
        let now = Utc::now();
        schedule::validate(&job.schedule, now, self.past_tolerance())?;

        let job_id = job.id;
        if self.store.exists(job_id).await? {
            return Err(SchedulerError::DuplicateJob(job_id));
        }

        let first_fire = schedule::first_fire_time(&job.schedule, now);
        let mut record = ScheduledJob::new(job, first_fire);

        // A bounded limit of zero owes the receiver nothing
        if record.repetitions_exhausted() {
            record.status = JobStatus::Executed;
            record.next_fire_at = None;
        }

        let stored = match self.store.save(&record).await {
            Ok(stored) => stored,
            // Two submitters raced on the same id; the loser sees a duplicate
            Err(StoreError::StaleWrite(_)) => return Err(SchedulerError::DuplicateJob(job_id)),
            Err(e) => return Err(e.into()),
        };

        self.emit_status_change(job_id, stored.status).await;

        if !stored.is_terminal() {
            self.arm_timer(job_id, first_fire).await;
        }

        info!(status = %stored.status, "Job scheduled");
        Ok(job_id)
    }

    /// Conditionally transition a job to `Canceled`.
    ///
    /// A job that is already terminal is left untouched and the call still
    /// succeeds; an unknown id fails with [`SchedulerError::NotFound`].
    #[instrument(skip(self))]
    pub async fn cancel_job(self: &Arc<Self>, id: Uuid) -> Result<(), SchedulerError> {
        self.disarm_timer(id).await;

        loop {
            let current = match self.store.get(id).await? {
                Some(current) => current,
                None => return Err(SchedulerError::NotFound(id)),
            };

            if current.is_terminal() {
                debug!(status = %current.status, "Cancel is a no-op, job already terminal");
                return Ok(());
            }

            let mut canceled = current;
            canceled.status = JobStatus::Canceled;
            canceled.next_fire_at = None;

            match self.store.save(&canceled).await {
                Ok(_) => {
                    self.emit_status_change(id, JobStatus::Canceled).await;
                    info!("Job canceled");
                    return Ok(());
                }
                // Someone moved the record; re-read and decide again
                Err(StoreError::StaleWrite(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read surface for the management API.
    pub async fn get_job(&self, id: Uuid) -> Result<ScheduledJob, SchedulerError> {
        self.store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Consume a successful dispatch outcome.
    ///
    /// Emits the outcome event, then advances the state machine: periodic
    /// jobs with repetitions left re-enter `Scheduled` at
    /// `last fire + interval`; one-shot or exhausted jobs become `Executed`.
    #[instrument(skip(self, response), fields(job_id = %response.job_id))]
    pub async fn handle_execution_success(
        self: &Arc<Self>,
        response: &JobExecutionResponse,
    ) -> Result<(), SchedulerError> {
        let id = response.job_id;

        if let Err(e) = self.events.job_succeeded(response).await {
            warn!(error = %e, "Failed to publish success event");
        }
        telemetry::record_firing_success(&id);

        loop {
            let current = match self.store.get(id).await? {
                Some(current) => current,
                None => {
                    warn!("Outcome for unknown job, discarding");
                    return Ok(());
                }
            };

            if current.is_terminal() {
                // Cancel won the race while the call was in flight
                debug!(status = %current.status, "Discarding outcome for terminal job");
                return Ok(());
            }

            let mut updated = current.clone();
            updated.execution_count += 1;
            updated.retry_count = 0;

            let next_fire = if updated.repetitions_exhausted() {
                None
            } else {
                let last_fire = current.last_fire_at.unwrap_or_else(Utc::now);
                schedule::next_fire_after(&updated.job.schedule, last_fire)
            };

            match next_fire {
                Some(next) => {
                    updated.status = JobStatus::Scheduled;
                    updated.next_fire_at = Some(next);
                }
                None => {
                    updated.status = JobStatus::Executed;
                    updated.next_fire_at = None;
                }
            }

            match self.store.save(&updated).await {
                Ok(stored) => {
                    self.emit_status_change(id, stored.status).await;
                    match stored.next_fire_at {
                        Some(next) => self.arm_timer(id, next).await,
                        None => self.disarm_timer(id).await,
                    }
                    debug!(
                        status = %stored.status,
                        execution_count = stored.execution_count,
                        "Success recorded"
                    );
                    return Ok(());
                }
                Err(StoreError::StaleWrite(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Consume a failed dispatch outcome.
    ///
    /// Emits the outcome event, then either re-arms a near-term retry with
    /// exponential backoff or, once the retry counter reaches the configured
    /// maximum, parks the job in terminal `Error`.
    #[instrument(skip(self, response), fields(job_id = %response.job_id, code = %response.code))]
    pub async fn handle_execution_error(
        self: &Arc<Self>,
        response: &JobExecutionResponse,
    ) -> Result<(), SchedulerError> {
        let id = response.job_id;

        if let Err(e) = self.events.job_failed(response).await {
            warn!(error = %e, "Failed to publish error event");
        }
        telemetry::record_firing_failure(&id, &response.code.to_string());

        loop {
            let current = match self.store.get(id).await? {
                Some(current) => current,
                None => {
                    warn!("Outcome for unknown job, discarding");
                    return Ok(());
                }
            };

            if current.is_terminal() {
                debug!(status = %current.status, "Discarding outcome for terminal job");
                return Ok(());
            }

            let mut updated = current;
            updated.retry_count += 1;

            if updated.retry_count < self.config.max_retries {
                let delay = self.retry_policy.delay(updated.retry_count);
                let delay = Duration::from_std(delay).unwrap_or_else(|_| Duration::seconds(5));
                updated.status = JobStatus::Retry;
                updated.next_fire_at = Some(Utc::now() + delay);
            } else {
                updated.status = JobStatus::Error;
                updated.next_fire_at = None;
            }

            match self.store.save(&updated).await {
                Ok(stored) => {
                    self.emit_status_change(id, stored.status).await;
                    match stored.next_fire_at {
                        Some(next) => self.arm_timer(id, next).await,
                        None => self.disarm_timer(id).await,
                    }
                    debug!(
                        status = %stored.status,
                        retry_count = stored.retry_count,
                        "Failure recorded"
                    );
                    return Ok(());
                }
                Err(StoreError::StaleWrite(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Dispatch one due firing: claim it through the store, run the callback,
    /// and hand the outcome to the completion channel.
    ///
    /// Losing the claim race is silent; it means another instance owns this
    /// firing.
    #[instrument(skip(self))]
    async fn fire(self: &Arc<Self>, id: Uuid) {
        let current = match self.store.get(id).await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Store unavailable during firing, leaving job for next poll");
                return;
            }
        };

        if !current.status.is_claimable() {
            return;
        }
        let Some(due) = current.next_fire_at else {
            return;
        };

        let now = Utc::now();
        if due > now {
            // Woken early (or the job is mid-lease); try again at the due time
            self.arm_timer(id, due).await;
            return;
        }

        let mut claim = current;
        claim.last_fire_at = Some(due);
        claim.next_fire_at = Some(now + self.claim_lease());

        let claimed = match self.store.save(&claim).await {
            Ok(claimed) => claimed,
            Err(StoreError::StaleWrite(_)) => {
                debug!("Lost claim race, another worker owns this firing");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Claim write failed, leaving job for next poll");
                return;
            }
        };

        debug!("Claim won, dispatching callback");
        let started = std::time::Instant::now();

        let response = match self.executor.execute(&claimed).await {
            Ok(response) => response,
            Err(e) => {
                // Contract violation in the job definition; classified as an
                // ordinary failure so the retry/error path applies
                error!(error = %e, "Callback request could not be built");
                JobExecutionResponse::failed(
                    id,
                    crate::models::ResponseCode::Unreachable,
                    Some(e.to_string()),
                )
            }
        };

        telemetry::record_firing_duration(&id, started.elapsed().as_secs_f64());

        if self.completion_tx.send(response).is_err() {
            error!("Completion channel closed, outcome dropped");
        }
    }

    /// Scan the store for due firings and dispatch them.
    ///
    /// Queries `Scheduled` and `Retry` records due up to now, highest
    /// priority first.
    #[instrument(skip(self))]
    pub async fn process_due_jobs(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        let now = Utc::now();
        let from = DateTime::<Utc>::MIN_UTC;

        let mut due = self
            .store
            .find_by_status_between(from, now, JobStatus::Scheduled)
            .await?;
        let retries = self
            .store
            .find_by_status_between(from, now, JobStatus::Retry)
            .await?;
        due.extend(retries);
        due.sort_by(|a, b| b.job.priority.cmp(&a.job.priority));

        telemetry::update_jobs_due(due.len() as i64);

        let mut dispatched = 0;
        for record in due.into_iter().take(self.config.max_jobs_per_poll) {
            let engine = Arc::clone(self);
            let id = record.job.id;
            tokio::spawn(async move {
                engine.fire(id).await;
            });
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Run the engine: completion worker plus the polling loop, until a
    /// shutdown signal arrives.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting scheduler core"
        );

        self.spawn_completion_worker().await;

        let mut poll_interval = interval(self.config.poll_interval);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.process_due_jobs().await {
                        Ok(count) if count > 0 => {
                            debug!(dispatched = count, "Dispatched due firings");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // Store unavailability is not fatal here; the next
                            // cycle retries
                            error!(error = %e, "Due-jobs poll failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler core stopped");
        Ok(())
    }

    /// Stop the engine and disarm all pending timers.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());

        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }

        info!("Scheduler core shutdown requested");
    }

    /// Spawn the single consumer of the completion channel. One consumer
    /// keeps outcome handling for a given job strictly ordered.
    async fn spawn_completion_worker(self: &Arc<Self>) {
        let Some(mut rx) = self.completion_rx.lock().await.take() else {
            return; // already running
        };

        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_receiver();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outcome = rx.recv() => {
                        let Some(response) = outcome else { break };
                        let result = if response.success {
                            engine.handle_execution_success(&response).await
                        } else {
                            engine.handle_execution_error(&response).await
                        };
                        if let Err(e) = result {
                            error!(
                                job_id = %response.job_id,
                                error = %e,
                                "Failed to record outcome, claim lease will expire"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Completion worker stopped");
        });
    }

    /// Arm (or re-arm) the in-process timer for a job.
    ///
    /// Returns a boxed future with an explicit `Send` bound. `fire` and
    /// `arm_timer` are mutually recursive across `tokio::spawn`, and the
    /// compiler cannot resolve the `Send` auto-trait through that cycle for
    /// plain `async fn`s; anchoring the signature here breaks the cycle
    /// without changing behavior.
    fn arm_timer<'a>(
        self: &'a Arc<Self>,
        id: Uuid,
        fire_at: DateTime<Utc>,
    ) -> futures::future::BoxFuture<'a, ()> {
        Box::pin(async move {
            let engine = Arc::clone(self);
            let delay = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(StdDuration::ZERO);

            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                engine.fire(id).await;
            });

            let mut timers = self.timers.lock().await;
            if let Some(previous) = timers.insert(id, handle) {
                previous.abort();
            }
        })
    }

    async fn disarm_timer(&self, id: Uuid) {
        let mut timers = self.timers.lock().await;
        if let Some(handle) = timers.remove(&id) {
            handle.abort();
        }
    }

    async fn emit_status_change(&self, id: Uuid, status: JobStatus) {
        if let Err(e) = self
            .events
            .status_changed(&StatusChange::now(id, status))
            .await
        {
            warn!(job_id = %id, error = %e, "Failed to publish status change");
        }
    }
}
