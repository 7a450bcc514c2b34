//! The audit write queue and its worker pool.
//!
//! `enqueue` is a `try_send` into a bounded channel: saturation drops the
//! job with an error log instead of blocking the mutation that produced
//! it. Above the high-water mark `is_backlogged` flips and the service
//! starts rejecting low-priority mutations; switches and reads never
//! consult it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use synckairos_core::audit::{AuditEventType, AuditJob};
use synckairos_core::ports::AuditSink;

/// Worker concurrency.
const WORKER_CONCURRENCY: usize = 10;
/// Attempts per job, exponential backoff between them: 2/4/8/16/32 s.
const MAX_ATTEMPTS: u32 = 5;
/// Completed-job bookkeeping: keep at most this many…
const COMPLETED_RETENTION_COUNT: usize = 100;
/// …and nothing older than this.
const COMPLETED_RETENTION: Duration = Duration::from_secs(3_600);
/// Depth fraction at which `is_backlogged` flips.
const HIGH_WATER_NUM: usize = 8;
const HIGH_WATER_DEN: usize = 10;

/// Failure classification decided by the writer.
#[derive(Debug, Error)]
pub enum AuditWriteError {
    /// Constraint violations and other errors that will never succeed.
    /// Not retried.
    #[error("poison audit job: {0}")]
    Poison(String),
    /// Transport and timeout errors. Retried with backoff.
    #[error("transient audit failure: {0}")]
    Transient(String),
}

/// Destination of audit jobs; implemented by the Postgres repository.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn record(&self, job: &AuditJob) -> Result<(), AuditWriteError>;
}

/// Job that exhausted its retries or was classified as poison.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: AuditJob,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct CompletedEntry {
    session_id: Uuid,
    event_type: AuditEventType,
    finished_at: DateTime<Utc>,
}

/// Shared pipeline bookkeeping: recent completions (bounded), dead
/// letters, and lifetime counters.
#[derive(Default)]
pub struct AuditStats {
    completed: Mutex<VecDeque<CompletedEntry>>,
    dead: Mutex<Vec<DeadLetter>>,
    completed_total: AtomicU64,
    dead_total: AtomicU64,
}

impl AuditStats {
    fn record_completed(&self, job: &AuditJob) {
        self.completed_total.fetch_add(1, Ordering::Relaxed);
        let mut completed = self.completed.lock().expect("audit stats poisoned");
        completed.push_back(CompletedEntry {
            session_id: job.session_id,
            event_type: job.event_type,
            finished_at: Utc::now(),
        });
        let cutoff = Utc::now()
            - chrono::Duration::from_std(COMPLETED_RETENTION).expect("retention fits chrono");
        while completed.len() > COMPLETED_RETENTION_COUNT
            || completed.front().is_some_and(|e| e.finished_at < cutoff)
        {
            completed.pop_front();
        }
    }

    fn record_dead(&self, job: AuditJob, error: String) {
        self.dead_total.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            session_id = %job.session_id,
            event = %job.event_type,
            error = %error,
            "audit job dead-lettered"
        );
        self.dead
            .lock()
            .expect("audit stats poisoned")
            .push(DeadLetter {
                job,
                error,
                failed_at: Utc::now(),
            });
    }

    pub fn completed_total(&self) -> u64 {
        self.completed_total.load(Ordering::Relaxed)
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead.lock().expect("audit stats poisoned").len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().expect("audit stats poisoned").clone()
    }

    pub fn recent_completed(&self) -> usize {
        self.completed.lock().expect("audit stats poisoned").len()
    }

    /// Recent completions as `(session_id, event_type, finished_at)`.
    pub fn recent_completions(&self) -> Vec<(Uuid, AuditEventType, DateTime<Utc>)> {
        self.completed
            .lock()
            .expect("audit stats poisoned")
            .iter()
            .map(|e| (e.session_id, e.event_type, e.finished_at))
            .collect()
    }
}

/// Producer half: the engine-facing `AuditSink`.
#[derive(Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<AuditJob>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl AuditQueue {
    /// Build the queue; hand the receiver to [`AuditWorkerPool::run`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                depth: Arc::new(AtomicUsize::new(0)),
                capacity,
            },
            rx,
        )
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Shared depth gauge, decremented by the worker pool as it drains.
    pub fn depth_handle(&self) -> Arc<AtomicUsize> {
        self.depth.clone()
    }
}

impl AuditSink for AuditQueue {
    fn enqueue(&self, job: AuditJob) {
        match self.tx.try_send(job) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::error!(
                    session_id = %job.session_id,
                    event = %job.event_type,
                    "audit queue saturated, dropping job"
                );
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::error!(
                    session_id = %job.session_id,
                    event = %job.event_type,
                    "audit queue closed, dropping job"
                );
            }
        }
    }

    fn is_backlogged(&self) -> bool {
        self.depth() * HIGH_WATER_DEN >= self.capacity * HIGH_WATER_NUM
    }
}

/// Consumer half: drains the channel with bounded concurrency, retrying
/// each job independently.
pub struct AuditWorkerPool {
    writer: Arc<dyn AuditWriter>,
    stats: Arc<AuditStats>,
}

impl AuditWorkerPool {
    pub fn new(writer: Arc<dyn AuditWriter>) -> Self {
        Self {
            writer,
            stats: Arc::new(AuditStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<AuditStats> {
        self.stats.clone()
    }

    /// Drain the queue until every producer is gone, then wait for the
    /// in-flight jobs. Spawn this once at startup with the queue's
    /// [`AuditQueue::depth_handle`].
    pub async fn run(&self, depth: Arc<AtomicUsize>, mut rx: mpsc::Receiver<AuditJob>) {
        tracing::info!(
            concurrency = WORKER_CONCURRENCY,
            max_attempts = MAX_ATTEMPTS,
            "audit worker pool started"
        );
        let semaphore = Arc::new(Semaphore::new(WORKER_CONCURRENCY));

        while let Some(job) = rx.recv().await {
            depth.fetch_sub(1, Ordering::Relaxed);
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("audit semaphore closed");
            let writer = self.writer.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                process_job(writer, stats, job).await;
                drop(permit);
            });
        }

        // Channel closed: wait for in-flight jobs to finish.
        let _ = semaphore
            .acquire_many(WORKER_CONCURRENCY as u32)
            .await
            .expect("audit semaphore closed");
        tracing::info!("audit worker pool drained");
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64 << (attempt - 1).min(4))
}

async fn process_job(writer: Arc<dyn AuditWriter>, stats: Arc<AuditStats>, job: AuditJob) {
    for attempt in 1..=MAX_ATTEMPTS {
        match writer.record(&job).await {
            Ok(()) => {
                stats.record_completed(&job);
                return;
            }
            Err(AuditWriteError::Poison(reason)) => {
                stats.record_dead(job, reason);
                return;
            }
            Err(AuditWriteError::Transient(reason)) => {
                if attempt == MAX_ATTEMPTS {
                    stats.record_dead(job, reason);
                    return;
                }
                let delay = backoff(attempt);
                tracing::warn!(
                    session_id = %job.session_id,
                    event = %job.event_type,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %reason,
                    "audit write failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
