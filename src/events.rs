//! Lifecycle notifications.
//!
//! Every job transition publishes a [`JobEvent`] on a broadcast channel. Publishing is
//! fire-and-forget: with no subscribers the event is dropped, and a subscriber that
//! falls behind sees `RecvError::Lagged` without affecting any job.

use crate::job::{JobId, JobStatus, Priority};

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

/// Why a job reached the `failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureReason {
  /// No handler was registered for the job's type at dispatch time.
  NoHandler,
  /// The handler failed on the final allowed attempt.
  RetriesExhausted,
}

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
  /// The job entered the index, as `pending` or `delayed`.
  Added {
    job_id: JobId,
    job_type: String,
    priority: Priority,
    status: JobStatus,
  },
  /// A `delayed` job became `pending`.
  Promoted { job_id: JobId },
  /// The job was handed to its handler.
  Started {
    job_id: JobId,
    job_type: String,
    attempt: u32,
  },
  Completed {
    job_id: JobId,
    job_type: String,
    attempts: u32,
    duration: Duration,
  },
  /// A failed attempt was re-delayed.
  RetryScheduled {
    job_id: JobId,
    job_type: String,
    attempt: u32,
    retry_at: DateTime<Utc>,
    error: String,
  },
  Failed {
    job_id: JobId,
    job_type: String,
    attempts: u32,
    error: String,
    reason: FailureReason,
  },
}

impl JobEvent {
  pub fn job_id(&self) -> JobId {
    match self {
      JobEvent::Added { job_id, .. }
      | JobEvent::Promoted { job_id }
      | JobEvent::Started { job_id, .. }
      | JobEvent::Completed { job_id, .. }
      | JobEvent::RetryScheduled { job_id, .. }
      | JobEvent::Failed { job_id, .. } => *job_id,
    }
  }

  /// Whether no further events will follow for this job.
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
  }
}

/// Publishing side of the lifecycle channel.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
  tx: broadcast::Sender<JobEvent>,
}

impl EventEmitter {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
    self.tx.subscribe()
  }

  pub fn emit(&self, event: JobEvent) {
    if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
      trace!(job_id = %event.job_id(), "No event subscribers, dropping event.");
    }
  }
}
