//! tests/cleanup.rs
//! Garbage collection of terminal jobs.

mod common;

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;

use crate::common::{
  counting_handler, failing_handler, setup_tracing, start_keeper, wait_for_status, TestKeeper,
  RETRY_DELAY, TICK,
};
use jobkeeper::{JobKeeper, JobOptions, JobStatus, QueryError};

#[tokio::test]
async fn test_cleanup_removes_only_terminal_jobs() {
  setup_tracing();
  let keeper = start_keeper(2);
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler("ok", counting_handler(counter.clone(), StdDuration::ZERO));
  keeper.register_handler("bad", failing_handler(counter.clone(), "always fails"));
  keeper.register_handler(
    "slow",
    counting_handler(counter.clone(), StdDuration::from_millis(500)),
  );

  let completed = keeper.enqueue("ok", 1).unwrap();
  let failed = keeper
    .submit("bad", 1, JobOptions::new().max_attempts(1))
    .unwrap();
  let delayed = keeper
    .submit("ok", 1, JobOptions::new().delay(StdDuration::from_secs(3600)))
    .unwrap();
  let processing = keeper.enqueue("slow", 1).unwrap();

  assert!(wait_for_status(&keeper, completed, JobStatus::Completed, StdDuration::from_secs(2)).await);
  assert!(wait_for_status(&keeper, failed, JobStatus::Failed, StdDuration::from_secs(2)).await);
  assert!(wait_for_status(&keeper, processing, JobStatus::Processing, StdDuration::from_secs(2)).await);

  // Stop so a fresh submission stays pending.
  keeper.stop().await.unwrap();
  let pending = keeper.enqueue("ok", 1).unwrap();

  let removed = keeper.cleanup(StdDuration::ZERO);
  assert_eq!(removed, 2);

  assert_eq!(keeper.get_job(completed).unwrap_err(), QueryError::JobNotFound(completed));
  assert_eq!(keeper.get_job(failed).unwrap_err(), QueryError::JobNotFound(failed));
  assert_eq!(keeper.get_job(delayed).unwrap().status, JobStatus::Delayed);
  assert_eq!(keeper.get_job(pending).unwrap().status, JobStatus::Pending);
  assert!(keeper.get_job(processing).is_ok());

  let stats = keeper.get_stats();
  assert_eq!(stats.total, 3);
  assert_eq!(stats.completed + stats.failed, 0);
  assert_eq!(keeper.metrics_snapshot().jobs_cleaned, 2);

  // Nothing left to remove.
  assert_eq!(keeper.cleanup(StdDuration::ZERO), 0);
  assert!(wait_for_status(&keeper, processing, JobStatus::Completed, StdDuration::from_secs(2)).await);
}

#[tokio::test]
async fn test_cleanup_respects_age_threshold() {
  setup_tracing();
  let keeper = start_keeper(1);
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler("ok", counting_handler(counter.clone(), StdDuration::ZERO));

  let old = keeper.enqueue("ok", 1).unwrap();
  assert!(wait_for_status(&keeper, old, JobStatus::Completed, StdDuration::from_secs(2)).await);
  tokio::time::sleep(StdDuration::from_millis(300)).await;

  let recent = keeper.enqueue("ok", 2).unwrap();
  assert!(wait_for_status(&keeper, recent, JobStatus::Completed, StdDuration::from_secs(2)).await);

  assert_eq!(keeper.cleanup(StdDuration::from_secs(3600)), 0);
  assert_eq!(keeper.cleanup(StdDuration::from_millis(200)), 1);
  assert!(keeper.get_job(old).is_err());
  assert!(keeper.get_job(recent).is_ok());
  assert_eq!(counter.load(Ordering::SeqCst), 2);

  keeper.stop().await.unwrap();
}

#[tokio::test]
async fn test_auto_cleanup_runs_periodically() {
  setup_tracing();
  let keeper: TestKeeper = JobKeeper::builder()
    .concurrency(1)
    .tick_interval(TICK)
    .retry_delay(RETRY_DELAY)
    .auto_cleanup(StdDuration::from_millis(50), StdDuration::ZERO)
    .build()
    .unwrap();
  keeper.start().unwrap();
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler("ok", counting_handler(counter.clone(), StdDuration::ZERO));

  let job_id = keeper.enqueue("ok", 1).unwrap();
  let removed = common::wait_until(StdDuration::from_secs(2), || keeper.get_job(job_id).is_err()).await;

  assert!(removed, "Completed job should be evicted by auto-cleanup");
  assert_eq!(counter.load(Ordering::SeqCst), 1);
  assert_eq!(keeper.metrics_snapshot().jobs_cleaned, 1);
  assert_eq!(keeper.get_stats().total, 0);

  keeper.stop().await.unwrap();
}
