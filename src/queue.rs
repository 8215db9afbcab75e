//! Priority ordering for dispatch.
//!
//! Two handle-based priority queues back the scheduler:
//! - [`ReadyQueue`] holds `pending` jobs ordered by priority rank, then creation time,
//!   then submission sequence (strict FIFO within a tier).
//! - [`DelayedQueue`] holds `delayed` jobs ordered by eligibility time.
//!
//! Both are keyed by [`JobId`], so a job can occupy at most one slot per queue.
//! Low-priority jobs have no starvation protection: under sustained higher-priority
//! load they wait indefinitely.

use crate::job::{JobId, Priority};

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use priority_queue::PriorityQueue;

/// Dispatch key for a pending job. Smaller keys are dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ReadyKey {
  rank: u8,
  created_at: DateTime<Utc>,
  seq: u64,
}

impl ReadyKey {
  pub fn new(priority: Priority, created_at: DateTime<Utc>, seq: u64) -> Self {
    Self {
      rank: priority.rank(),
      created_at,
      seq,
    }
  }
}

/// Pending jobs in dispatch order.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
  // Max-heap, so keys are reversed to pop the smallest first.
  pq: PriorityQueue<JobId, Reverse<ReadyKey>>,
}

impl ReadyQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts a job. Returns `false` if the job was already queued (its key is updated).
  pub fn push(&mut self, job_id: JobId, key: ReadyKey) -> bool {
    self.pq.push(job_id, Reverse(key)).is_none()
  }

  /// Removes and returns the next job to dispatch.
  pub fn pop(&mut self) -> Option<JobId> {
    self.pq.pop().map(|(job_id, _)| job_id)
  }

  pub fn len(&self) -> usize {
    self.pq.len()
  }

  /// All queued job IDs in the order they would be dispatched.
  pub fn ordered(&self) -> Vec<JobId> {
    let mut items: Vec<(ReadyKey, JobId)> = self
      .pq
      .iter()
      .map(|(job_id, Reverse(key))| (*key, *job_id))
      .collect();
    items.sort_unstable();
    items.into_iter().map(|(_, job_id)| job_id).collect()
  }
}

/// Delayed jobs ordered by the time they become eligible.
#[derive(Debug, Default)]
pub(crate) struct DelayedQueue {
  pq: PriorityQueue<JobId, Reverse<(DateTime<Utc>, u64)>>,
}

impl DelayedQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Inserts or re-times a job. Returns `false` if it was already queued.
  pub fn push(&mut self, job_id: JobId, eligible_at: DateTime<Utc>, seq: u64) -> bool {
    self.pq.push(job_id, Reverse((eligible_at, seq))).is_none()
  }

  /// Earliest eligibility time among queued jobs.
  pub fn next_due(&self) -> Option<DateTime<Utc>> {
    self.pq.peek().map(|(_, Reverse((at, _)))| *at)
  }

  /// Removes and returns every job whose eligibility time is at or before `now`,
  /// earliest first.
  pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
    let mut due = Vec::new();
    while let Some(at) = self.next_due() {
      if at > now {
        break;
      }
      match self.pq.pop() {
        Some((job_id, _)) => due.push(job_id),
        None => break,
      }
    }
    due
  }

  pub fn len(&self) -> usize {
    self.pq.len()
  }
}
