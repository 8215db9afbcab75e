//! tests/delayed.rs
//! Scheduled (delayed) execution and promotion to pending.

mod common;

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;

use crate::common::{
  counting_handler, recording_handler, setup_tracing, start_keeper, wait_for_idle,
  wait_for_status,
};
use chrono::Duration as ChronoDuration;
use jobkeeper::{JobOptions, JobStatus, Priority};
use parking_lot::Mutex;

#[tokio::test]
async fn test_delayed_job_waits_for_schedule_time() {
  setup_tracing();
  let keeper = start_keeper(1);
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler("reminder", counting_handler(counter.clone(), StdDuration::ZERO));

  let delay = StdDuration::from_millis(300);
  let job_id = keeper
    .submit("reminder", 1, JobOptions::new().delay(delay))
    .unwrap();

  let job = keeper.get_job(job_id).unwrap();
  assert_eq!(job.status, JobStatus::Delayed);
  assert_eq!(job.scheduled_at - job.created_at, ChronoDuration::from_std(delay).unwrap());

  tokio::time::sleep(StdDuration::from_millis(150)).await;
  assert_eq!(keeper.get_job(job_id).unwrap().status, JobStatus::Delayed);
  assert_eq!(counter.load(Ordering::SeqCst), 0, "Must not run before its delay");

  assert!(wait_for_status(&keeper, job_id, JobStatus::Completed, StdDuration::from_secs(2)).await);
  let job = keeper.get_job(job_id).unwrap();
  let started_at = job.started_at.expect("started_at set");
  assert!(started_at >= job.created_at + ChronoDuration::from_std(delay).unwrap());
  assert_eq!(keeper.metrics_snapshot().jobs_promoted, 1);

  keeper.stop().await.unwrap();
}

#[tokio::test]
async fn test_zero_delay_is_pending_immediately() {
  let keeper = common::build_keeper(1).unwrap();
  let job_id = keeper
    .submit("t", 1, JobOptions::new().delay(StdDuration::ZERO))
    .unwrap();
  assert_eq!(keeper.get_job(job_id).unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_delayed_jobs_run_in_schedule_order() {
  setup_tracing();
  let keeper = start_keeper(1);
  let order = Arc::new(Mutex::new(Vec::new()));
  keeper.register_handler("record", recording_handler(order.clone()));

  keeper
    .submit("record", 3, JobOptions::new().delay(StdDuration::from_millis(240)))
    .unwrap();
  keeper
    .submit("record", 1, JobOptions::new().delay(StdDuration::from_millis(60)))
    .unwrap();
  keeper
    .submit("record", 2, JobOptions::new().delay(StdDuration::from_millis(150)))
    .unwrap();

  assert!(wait_for_idle(&keeper, StdDuration::from_secs(2)).await);
  assert_eq!(*order.lock(), vec![1, 2, 3]);

  keeper.stop().await.unwrap();
}

#[tokio::test]
async fn test_promoted_job_competes_by_priority() {
  setup_tracing();
  let keeper = common::build_keeper(1).unwrap();
  let order = Arc::new(Mutex::new(Vec::new()));
  keeper.register_handler("record", recording_handler(order.clone()));

  // The delayed urgent job becomes due while the normal job is still pending.
  keeper
    .submit(
      "record",
      1,
      JobOptions::new()
        .priority(Priority::Urgent)
        .delay(StdDuration::from_millis(10)),
    )
    .unwrap();
  keeper.enqueue("record", 2).unwrap();
  tokio::time::sleep(StdDuration::from_millis(50)).await;

  keeper.start().unwrap();
  assert!(wait_for_idle(&keeper, StdDuration::from_secs(2)).await);
  assert_eq!(*order.lock(), vec![1, 2]);

  keeper.stop().await.unwrap();
}

#[tokio::test]
async fn test_delayed_job_is_not_promoted_while_stopped() {
  setup_tracing();
  let keeper = common::build_keeper(1).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));
  keeper.register_handler("t", counting_handler(counter.clone(), StdDuration::ZERO));

  let job_id = keeper
    .submit("t", 1, JobOptions::new().delay(StdDuration::from_millis(20)))
    .unwrap();
  tokio::time::sleep(StdDuration::from_millis(100)).await;
  assert_eq!(keeper.get_job(job_id).unwrap().status, JobStatus::Delayed);

  keeper.start().unwrap();
  assert!(wait_for_status(&keeper, job_id, JobStatus::Completed, StdDuration::from_secs(2)).await);
  assert_eq!(counter.load(Ordering::SeqCst), 1);

  keeper.stop().await.unwrap();
}
