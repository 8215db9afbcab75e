//! tests/lifecycle.rs
//! start / stop / graceful shutdown behaviour.

mod common;

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;

use crate::common::{build_keeper, counting_handler, setup_tracing, wait_for_status};
use jobkeeper::{JobStatus, LifecycleError, ShutdownError};

#[test]
fn test_start_outside_runtime_fails() {
  let keeper = build_keeper(1).unwrap();
  assert_eq!(keeper.start(), Err(LifecycleError::NoRuntime));
  assert!(!keeper.is_running());
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
  setup_tracing();
  let keeper = build_keeper(1).unwrap();
  assert!(!keeper.is_running());

  keeper.start().unwrap();
  keeper.start().unwrap();
  assert!(keeper.is_running());

  keeper.stop().await.unwrap();
  assert!(!keeper.is_running());
  keeper.stop().await.unwrap();
  assert!(!keeper.is_running());
}

#[tokio::test]
async fn test_stopped_scheduler_does_not_dispatch() {
  setup_tracing();
  let keeper = build_keeper(1).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler("t", counting_handler(counter.clone(), StdDuration::ZERO));

  keeper.start().unwrap();
  keeper.stop().await.unwrap();

  // Submissions are still accepted while stopped.
  let job_id = keeper.enqueue("t", 1).unwrap();
  tokio::time::sleep(StdDuration::from_millis(150)).await;
  assert_eq!(keeper.get_job(job_id).unwrap().status, JobStatus::Pending);
  assert_eq!(counter.load(Ordering::SeqCst), 0);

  // Restarting picks the job up.
  keeper.start().unwrap();
  assert!(wait_for_status(&keeper, job_id, JobStatus::Completed, StdDuration::from_secs(2)).await);
  assert_eq!(counter.load(Ordering::SeqCst), 1);

  keeper.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_lets_in_flight_jobs_finish() {
  setup_tracing();
  let keeper = build_keeper(1).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler(
    "slow",
    counting_handler(counter.clone(), StdDuration::from_millis(200)),
  );
  keeper.start().unwrap();

  let job_id = keeper.enqueue("slow", 1).unwrap();
  assert!(wait_for_status(&keeper, job_id, JobStatus::Processing, StdDuration::from_secs(1)).await);

  keeper.stop().await.unwrap();
  assert_eq!(keeper.get_job(job_id).unwrap().status, JobStatus::Processing);

  assert!(wait_for_status(&keeper, job_id, JobStatus::Completed, StdDuration::from_secs(1)).await);
  assert_eq!(keeper.get_job(job_id).unwrap().result, Some(2));
}

#[tokio::test]
async fn test_graceful_shutdown_waits_for_processing_jobs() {
  setup_tracing();
  let keeper = build_keeper(2).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler(
    "slow",
    counting_handler(counter.clone(), StdDuration::from_millis(150)),
  );
  keeper.start().unwrap();

  let first = keeper.enqueue("slow", 1).unwrap();
  let second = keeper.enqueue("slow", 2).unwrap();
  assert!(wait_for_status(&keeper, second, JobStatus::Processing, StdDuration::from_secs(1)).await);

  keeper.shutdown_graceful(None).await.unwrap();

  assert!(!keeper.is_running());
  assert_eq!(keeper.get_job(first).unwrap().status, JobStatus::Completed);
  assert_eq!(keeper.get_job(second).unwrap().status, JobStatus::Completed);
  assert_eq!(keeper.get_stats().processing, 0);
}

#[tokio::test]
async fn test_graceful_shutdown_times_out() {
  setup_tracing();
  let keeper = build_keeper(1).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler(
    "very_slow",
    counting_handler(counter.clone(), StdDuration::from_millis(1000)),
  );
  keeper.start().unwrap();

  let job_id = keeper.enqueue("very_slow", 1).unwrap();
  assert!(wait_for_status(&keeper, job_id, JobStatus::Processing, StdDuration::from_secs(1)).await);

  let result = keeper.shutdown_graceful(Some(StdDuration::from_millis(50))).await;
  assert_eq!(result, Err(ShutdownError::Timeout));
  assert!(!keeper.is_running());
  assert_eq!(keeper.get_job(job_id).unwrap().status, JobStatus::Processing);
}

#[tokio::test]
async fn test_cloned_handles_share_state() {
  setup_tracing();
  let keeper = build_keeper(1).unwrap();
  let clone = keeper.clone();
  let counter = Arc::new(AtomicUsize::new(0));
  clone.register_handler("t", counting_handler(counter.clone(), StdDuration::ZERO));

  clone.start().unwrap();
  assert!(keeper.is_running());

  let job_id = keeper.enqueue("t", 3).unwrap();
  assert!(wait_for_status(&keeper, job_id, JobStatus::Completed, StdDuration::from_secs(2)).await);
  assert_eq!(clone.get_job(job_id).unwrap().result, Some(6));

  keeper.stop().await.unwrap();
  assert!(!clone.is_running());
}
