#[cfg(feature = "job_context")]
pub mod context;

use crate::error::{HandlerError, SubmitError};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

// --- Public Type Aliases ---

/// Type alias for the unique identifier of a job.
/// Uses UUID v4 and is never reused.
pub type JobId = Uuid;

/// The future a handler returns for one attempt.
pub type HandlerFuture<R> = BoxFuture<'static, Result<R, HandlerError>>;

/// The function type registered for a job type.
///
/// Receives a [`JobView`] of the dispatched job and returns a future that resolves to
/// - `Ok(result)`: the attempt succeeded and `result` is stored on the job.
/// - `Err(error)`: the attempt failed, potentially triggering a retry.
///
/// Panics inside the handler (including while building the future) are caught by the
/// worker and treated as failed attempts.
pub type BoxedHandler<P, R> = Box<dyn Fn(JobView<P>) -> HandlerFuture<R> + Send + Sync + 'static>;

// --- Priority ---

/// Dispatch priority of a job. Immutable after submission.
///
/// Ordering follows the rank: `Urgent < High < Normal < Low`, so the "smallest"
/// priority is dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Priority {
  Urgent,
  High,
  #[default]
  Normal,
  Low,
}

impl Priority {
  /// Numeric rank used for ordering: urgent(0) < high(1) < normal(2) < low(3).
  pub fn rank(self) -> u8 {
    match self {
      Priority::Urgent => 0,
      Priority::High => 1,
      Priority::Normal => 2,
      Priority::Low => 3,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Priority::Urgent => "urgent",
      Priority::High => "high",
      Priority::Normal => "normal",
      Priority::Low => "low",
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Priority {
  type Err = SubmitError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "urgent" => Ok(Priority::Urgent),
      "high" => Ok(Priority::High),
      "normal" => Ok(Priority::Normal),
      "low" => Ok(Priority::Low),
      _ => Err(SubmitError::InvalidPriority(s.to_string())),
    }
  }
}

// --- Status ---

/// Lifecycle status of a job.
///
/// `Delayed <-> Pending` is the only bidirectional pair. `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum JobStatus {
  Pending,
  Processing,
  Delayed,
  Completed,
  Failed,
}

impl JobStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, JobStatus::Completed | JobStatus::Failed)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      JobStatus::Pending => "pending",
      JobStatus::Processing => "processing",
      JobStatus::Delayed => "delayed",
      JobStatus::Completed => "completed",
      JobStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// --- Submission Options ---

/// Per-submission options. Unset fields fall back to the scheduler defaults.
///
/// ```
/// use jobkeeper::{JobOptions, Priority};
/// use std::time::Duration;
///
/// let opts = JobOptions::new()
///   .priority(Priority::High)
///   .delay(Duration::from_secs(30))
///   .max_attempts(5);
/// assert_eq!(opts.max_attempts, Some(5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
  pub priority: Priority,
  /// Time from submission until the job becomes eligible for dispatch.
  /// Zero means the job is `pending` immediately.
  pub delay: StdDuration,
  /// Ceiling on dispatch attempts. `None` uses the scheduler's default.
  pub max_attempts: Option<u32>,
}

impl JobOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn delay(mut self, delay: StdDuration) -> Self {
    self.delay = delay;
    self
  }

  pub fn max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = Some(max_attempts);
    self
  }
}

// --- Job Record ---

/// A job record as held in the scheduler's index.
///
/// Values returned from queries are snapshots; mutating them has no effect on the
/// scheduler. Lifecycle fields are only ever changed by the scheduler's transitions.
pub struct Job<P, R> {
  pub id: JobId,
  pub job_type: String,
  /// Opaque to the scheduler, only handed to the handler.
  pub payload: Arc<P>,
  pub priority: Priority,
  /// Number of times the job has been handed to a handler.
  pub attempts: u32,
  pub max_attempts: u32,
  pub status: JobStatus,
  pub created_at: DateTime<Utc>,
  /// Earliest dispatch time. Only meaningful while `Delayed`.
  pub scheduled_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub failed_at: Option<DateTime<Utc>>,
  /// Message of the most recent failed attempt.
  pub error: Option<String>,
  pub result: Option<R>,
  /// Submission sequence number, final FIFO tie-break.
  pub(crate) seq: u64,
}

impl<P, R> Job<P, R> {
  #[allow(clippy::too_many_arguments)] // Mirrors the record's submission-time fields
  pub(crate) fn new(
    id: JobId,
    job_type: String,
    payload: P,
    priority: Priority,
    max_attempts: u32,
    created_at: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    seq: u64,
  ) -> Self {
    let status = if scheduled_at > created_at {
      JobStatus::Delayed
    } else {
      JobStatus::Pending
    };
    Self {
      id,
      job_type,
      payload: Arc::new(payload),
      priority,
      attempts: 0,
      max_attempts,
      status,
      created_at,
      scheduled_at,
      started_at: None,
      completed_at: None,
      failed_at: None,
      error: None,
      result: None,
      seq,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  /// Timestamp of the terminal transition, if the job reached one.
  pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
    match self.status {
      JobStatus::Completed => self.completed_at,
      JobStatus::Failed => self.failed_at,
      _ => None,
    }
  }

  /// Builds the view handed to a handler for the current attempt.
  pub(crate) fn view(&self) -> JobView<P> {
    JobView {
      id: self.id,
      job_type: self.job_type.clone(),
      payload: self.payload.clone(),
      priority: self.priority,
      attempt: self.attempts,
      max_attempts: self.max_attempts,
      created_at: self.created_at,
    }
  }
}

impl<P, R: Clone> Clone for Job<P, R> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      job_type: self.job_type.clone(),
      payload: self.payload.clone(),
      priority: self.priority,
      attempts: self.attempts,
      max_attempts: self.max_attempts,
      status: self.status,
      created_at: self.created_at,
      scheduled_at: self.scheduled_at,
      started_at: self.started_at,
      completed_at: self.completed_at,
      failed_at: self.failed_at,
      error: self.error.clone(),
      result: self.result.clone(),
      seq: self.seq,
    }
  }
}

// Manual implementation of Debug so payloads and results need not be Debug.
impl<P, R> fmt::Debug for Job<P, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("id", &self.id)
      .field("job_type", &self.job_type)
      .field("payload", &format_args!("<payload>"))
      .field("priority", &self.priority)
      .field("attempts", &self.attempts)
      .field("max_attempts", &self.max_attempts)
      .field("status", &self.status)
      .field("created_at", &self.created_at)
      .field("scheduled_at", &self.scheduled_at)
      .field("started_at", &self.started_at)
      .field("completed_at", &self.completed_at)
      .field("failed_at", &self.failed_at)
      .field("error", &self.error)
      .field("has_result", &self.result.is_some())
      .finish()
  }
}

/// What a handler sees of the job it is processing.
pub struct JobView<P> {
  pub id: JobId,
  pub job_type: String,
  pub payload: Arc<P>,
  pub priority: Priority,
  /// 1-based number of the current attempt.
  pub attempt: u32,
  pub max_attempts: u32,
  pub created_at: DateTime<Utc>,
}

impl<P> JobView<P> {
  /// Whether a failure of this attempt will be terminal.
  pub fn is_last_attempt(&self) -> bool {
    self.attempt >= self.max_attempts
  }
}

impl<P> Clone for JobView<P> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      job_type: self.job_type.clone(),
      payload: self.payload.clone(),
      priority: self.priority,
      attempt: self.attempt,
      max_attempts: self.max_attempts,
      created_at: self.created_at,
    }
  }
}

impl<P> fmt::Debug for JobView<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobView")
      .field("id", &self.id)
      .field("job_type", &self.job_type)
      .field("priority", &self.priority)
      .field("attempt", &self.attempt)
      .field("max_attempts", &self.max_attempts)
      .finish()
  }
}

// --- Stats ---

/// Counts of live jobs per status, computed by scanning the job index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobStats {
  pub pending: usize,
  pub processing: usize,
  pub delayed: usize,
  pub completed: usize,
  pub failed: usize,
  pub total: usize,
}

impl JobStats {
  pub(crate) fn record(&mut self, status: JobStatus) {
    match status {
      JobStatus::Pending => self.pending += 1,
      JobStatus::Processing => self.processing += 1,
      JobStatus::Delayed => self.delayed += 1,
      JobStatus::Completed => self.completed += 1,
      JobStatus::Failed => self.failed += 1,
    }
    self.total += 1;
  }

  pub fn count(&self, status: JobStatus) -> usize {
    match status {
      JobStatus::Pending => self.pending,
      JobStatus::Processing => self.processing,
      JobStatus::Delayed => self.delayed,
      JobStatus::Completed => self.completed,
      JobStatus::Failed => self.failed,
    }
  }
}
