//! The job index and its transition functions.
//!
//! All lifecycle fields of a [`Job`] are mutated here and only here, each transition
//! under the index write lock, so no two operations can transition the same record at
//! once. Reads (lookups, stats) take the read lock and never mutate.

use crate::job::{Job, JobId, JobStats, JobStatus, JobView};
use crate::queue::{DelayedQueue, ReadyKey, ReadyQueue};
use crate::retry::{RetryDecision, RetryPolicy};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

/// A job moved to `processing`, paired with the handler that will run it.
pub(crate) struct Dispatched<P, H> {
  pub view: JobView<P>,
  pub handler: H,
  /// When the job became eligible for dispatch (for queue-wait metrics).
  pub eligible_at: DateTime<Utc>,
}

/// A job failed at dispatch because no handler exists for its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Unhandled {
  pub job_id: JobId,
  pub job_type: String,
  pub attempts: u32,
  pub error: String,
}

/// Result of one dispatch pass.
pub(crate) struct DispatchBatch<P, H> {
  pub started: Vec<Dispatched<P, H>>,
  pub unhandled: Vec<Unhandled>,
}

/// The transition applied after a handler finished an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
  Completed {
    job_type: String,
    attempts: u32,
  },
  Retry {
    job_type: String,
    attempt: u32,
    retry_at: DateTime<Utc>,
    error: String,
  },
  Failed {
    job_type: String,
    attempts: u32,
    error: String,
  },
}

struct StoreInner<P, R> {
  jobs: HashMap<JobId, Job<P, R>>,
  ready: ReadyQueue,
  delayed: DelayedQueue,
  processing: HashSet<JobId>,
}

/// In-memory job index with the pending/delayed queues and the processing set.
pub(crate) struct JobStore<P, R> {
  inner: RwLock<StoreInner<P, R>>,
  next_seq: AtomicU64,
}

impl<P, R> JobStore<P, R> {
  pub fn new() -> Self {
    Self {
      inner: RwLock::new(StoreInner {
        jobs: HashMap::new(),
        ready: ReadyQueue::new(),
        delayed: DelayedQueue::new(),
        processing: HashSet::new(),
      }),
      next_seq: AtomicU64::new(0),
    }
  }

  /// Allocates the next submission sequence number.
  pub fn next_seq(&self) -> u64 {
    self.next_seq.fetch_add(1, AtomicOrdering::Relaxed)
  }

  /// Adds a freshly created job to the index and the queue matching its status.
  pub fn insert(&self, job: Job<P, R>) {
    let mut inner = self.inner.write();
    match job.status {
      JobStatus::Pending => {
        inner
          .ready
          .push(job.id, ReadyKey::new(job.priority, job.created_at, job.seq));
      }
      JobStatus::Delayed => {
        inner.delayed.push(job.id, job.scheduled_at, job.seq);
      }
      other => {
        warn!(job_id = %job.id, status = %other, "Inserting job in unexpected status, not queueing.");
      }
    }
    trace!(job_id = %job.id, status = %job.status, "Inserted job into index.");
    inner.jobs.insert(job.id, job);
  }

  /// Moves every `delayed` job whose eligibility time has passed to `pending`.
  pub fn promote_due(&self, now: DateTime<Utc>) -> Vec<JobId> {
    let mut inner = self.inner.write();
    let StoreInner {
      jobs,
      ready,
      delayed,
      ..
    } = &mut *inner;

    let mut promoted = Vec::new();
    for job_id in delayed.pop_due(now) {
      match jobs.get_mut(&job_id) {
        Some(job) if job.status == JobStatus::Delayed => {
          job.status = JobStatus::Pending;
          ready.push(job_id, ReadyKey::new(job.priority, job.created_at, job.seq));
          promoted.push(job_id);
        }
        Some(job) => {
          warn!(%job_id, status = %job.status, "Delayed queue held a job that is no longer delayed.");
        }
        None => {
          warn!(%job_id, "Delayed queue held an unknown job.");
        }
      }
    }
    if !promoted.is_empty() {
      debug!(count = promoted.len(), "Promoted delayed jobs to pending.");
    }
    promoted
  }

  /// Takes up to `limit` pending jobs in dispatch order and moves them to
  /// `processing`.
  ///
  /// `lookup` resolves a job type to its handler. A job whose type has no handler is
  /// failed immediately, keeps its attempt count and does not use up a slot.
  pub fn dispatch<H>(
    &self,
    limit: usize,
    now: DateTime<Utc>,
    lookup: impl Fn(&str) -> Option<H>,
  ) -> DispatchBatch<P, H> {
    let mut batch = DispatchBatch {
      started: Vec::new(),
      unhandled: Vec::new(),
    };
    if limit == 0 {
      return batch;
    }

    let mut inner = self.inner.write();
    let StoreInner {
      jobs,
      ready,
      processing,
      ..
    } = &mut *inner;

    while batch.started.len() < limit {
      let Some(job_id) = ready.pop() else {
        break;
      };
      let Some(job) = jobs.get_mut(&job_id) else {
        warn!(%job_id, "Ready queue held an unknown job, discarding.");
        continue;
      };
      if job.status != JobStatus::Pending {
        warn!(%job_id, status = %job.status, "Ready queue held a job that is not pending, discarding.");
        continue;
      }

      match lookup(&job.job_type) {
        Some(handler) => {
          job.status = JobStatus::Processing;
          job.attempts += 1;
          if job.started_at.is_none() {
            job.started_at = Some(now);
          }
          processing.insert(job_id);
          batch.started.push(Dispatched {
            view: job.view(),
            handler,
            eligible_at: job.scheduled_at,
          });
        }
        None => {
          let error = format!("No handler registered for job type '{}'", job.job_type);
          job.status = JobStatus::Failed;
          job.failed_at = Some(now);
          job.error = Some(error.clone());
          batch.unhandled.push(Unhandled {
            job_id,
            job_type: job.job_type.clone(),
            attempts: job.attempts,
            error,
          });
        }
      }
    }
    batch
  }

  /// `processing -> completed`.
  pub fn complete(&self, job_id: JobId, result: R, now: DateTime<Utc>) -> Option<AttemptOutcome> {
    let mut inner = self.inner.write();
    let StoreInner {
      jobs, processing, ..
    } = &mut *inner;

    let job = Self::processing_job(jobs, job_id)?;
    job.status = JobStatus::Completed;
    job.completed_at = Some(now);
    job.result = Some(result);
    processing.remove(&job_id);

    Some(AttemptOutcome::Completed {
      job_type: job.job_type.clone(),
      attempts: job.attempts,
    })
  }

  /// `processing -> delayed` (retry) or `processing -> failed` (exhausted), as decided
  /// by `policy`.
  pub fn fail_attempt(
    &self,
    job_id: JobId,
    error: String,
    now: DateTime<Utc>,
    policy: &RetryPolicy,
  ) -> Option<AttemptOutcome> {
    let mut inner = self.inner.write();
    let StoreInner {
      jobs,
      delayed,
      processing,
      ..
    } = &mut *inner;

    let job = Self::processing_job(jobs, job_id)?;
    processing.remove(&job_id);
    job.error = Some(error.clone());

    match policy.decide(job.attempts, job.max_attempts, now) {
      RetryDecision::Retry { retry_at, .. } => {
        job.status = JobStatus::Delayed;
        job.scheduled_at = retry_at;
        delayed.push(job_id, retry_at, job.seq);
        Some(AttemptOutcome::Retry {
          job_type: job.job_type.clone(),
          attempt: job.attempts,
          retry_at,
          error,
        })
      }
      RetryDecision::Exhausted => {
        job.status = JobStatus::Failed;
        job.failed_at = Some(now);
        Some(AttemptOutcome::Failed {
          job_type: job.job_type.clone(),
          attempts: job.attempts,
          error,
        })
      }
    }
  }

  fn processing_job(jobs: &mut HashMap<JobId, Job<P, R>>, job_id: JobId) -> Option<&mut Job<P, R>> {
    match jobs.get_mut(&job_id) {
      Some(job) if job.status == JobStatus::Processing => Some(job),
      Some(job) => {
        warn!(%job_id, status = %job.status, "Ignoring attempt outcome for job that is not processing.");
        None
      }
      None => {
        warn!(%job_id, "Ignoring attempt outcome for unknown job.");
        None
      }
    }
  }

  /// Removes terminal jobs whose terminal timestamp is at or before `cutoff`.
  /// Jobs in any other status are never removed.
  pub fn cleanup(&self, cutoff: DateTime<Utc>) -> usize {
    let mut inner = self.inner.write();
    let before = inner.jobs.len();
    inner
      .jobs
      .retain(|_, job| !matches!(job.terminal_at(), Some(at) if at <= cutoff));
    before - inner.jobs.len()
  }

  pub fn stats(&self) -> JobStats {
    let inner = self.inner.read();
    let mut stats = JobStats::default();
    for job in inner.jobs.values() {
      stats.record(job.status);
    }
    stats
  }

  pub fn processing_count(&self) -> usize {
    self.inner.read().processing.len()
  }

  /// `(pending, delayed, processing)` queue sizes.
  pub fn queue_depths(&self) -> (usize, usize, usize) {
    let inner = self.inner.read();
    (inner.ready.len(), inner.delayed.len(), inner.processing.len())
  }
}

impl<P, R: Clone> JobStore<P, R> {
  pub fn get(&self, job_id: &JobId) -> Option<Job<P, R>> {
    self.inner.read().jobs.get(job_id).cloned()
  }

  /// Jobs in `status`. Pending jobs come back in dispatch order, delayed jobs by
  /// eligibility time, everything else by submission order.
  pub fn by_status(&self, status: JobStatus) -> Vec<Job<P, R>> {
    let inner = self.inner.read();
    if status == JobStatus::Pending {
      return inner
        .ready
        .ordered()
        .iter()
        .filter_map(|job_id| inner.jobs.get(job_id))
        .filter(|job| job.status == JobStatus::Pending)
        .cloned()
        .collect();
    }

    let mut jobs: Vec<Job<P, R>> = inner
      .jobs
      .values()
      .filter(|job| job.status == status)
      .cloned()
      .collect();
    if status == JobStatus::Delayed {
      jobs.sort_by_key(|job| (job.scheduled_at, job.seq));
    } else {
      jobs.sort_by_key(|job| (job.created_at, job.seq));
    }
    jobs
  }

  /// Every live job, in submission order.
  pub fn list(&self) -> Vec<Job<P, R>> {
    let inner = self.inner.read();
    let mut jobs: Vec<Job<P, R>> = inner.jobs.values().cloned().collect();
    jobs.sort_by_key(|job| job.seq);
    jobs
  }
}
