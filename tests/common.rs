//! tests/common.rs
//! Shared helper functions for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use jobkeeper::{
  BoxedHandler, BuildError, HandlerError, HandlerFuture, JobId, JobKeeper, JobStatus, JobView,
};
use tracing_subscriber::fmt::TestWriter;

/// Payload and result are both plain numbers in the integration tests.
pub type TestKeeper = JobKeeper<u32, u32>;

pub const TICK: StdDuration = StdDuration::from_millis(20);
pub const RETRY_DELAY: StdDuration = StdDuration::from_millis(50);

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds a stopped scheduler with short test timings.
pub fn build_keeper(concurrency: usize) -> Result<TestKeeper, BuildError> {
  JobKeeper::builder()
    .concurrency(concurrency)
    .tick_interval(TICK)
    .retry_delay(RETRY_DELAY)
    .build()
}

// Builds and starts a scheduler. Must be called inside a Tokio runtime.
pub fn start_keeper(concurrency: usize) -> TestKeeper {
  let keeper = build_keeper(concurrency).expect("build failed");
  keeper.start().expect("start failed");
  keeper
}

// Polls until `check` holds or `timeout` elapses. Returns whether it held.
pub async fn wait_until<F: Fn() -> bool>(timeout: StdDuration, check: F) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    if check() {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(StdDuration::from_millis(5)).await;
  }
}

// Waits for a job to reach `status`.
pub async fn wait_for_status(
  keeper: &TestKeeper,
  job_id: JobId,
  status: JobStatus,
  timeout: StdDuration,
) -> bool {
  wait_until(timeout, || {
    keeper
      .get_job(job_id)
      .map(|job| job.status == status)
      .unwrap_or(false)
  })
  .await
}

// Waits until no job is pending, delayed or processing.
pub async fn wait_for_idle(keeper: &TestKeeper, timeout: StdDuration) -> bool {
  wait_until(timeout, || {
    let stats = keeper.get_stats();
    stats.pending + stats.delayed + stats.processing == 0
  })
  .await
}

fn boxed<F, Fut>(handler: F) -> BoxedHandler<u32, u32>
where
  F: Fn(JobView<u32>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<u32, HandlerError>> + Send + 'static,
{
  Box::new(move |job: JobView<u32>| Box::pin(handler(job)) as HandlerFuture<u32>)
}

// Handler that counts invocations, optionally sleeps, and doubles the payload.
pub fn counting_handler(counter: Arc<AtomicUsize>, delay: StdDuration) -> BoxedHandler<u32, u32> {
  boxed(move |job| {
    let ctr = counter.clone();
    async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(count, payload = *job.payload, "Counting handler executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      Ok(*job.payload * 2)
    }
  })
}

// Handler that always fails with `message`.
pub fn failing_handler(counter: Arc<AtomicUsize>, message: &'static str) -> BoxedHandler<u32, u32> {
  boxed(move |_job| {
    let ctr = counter.clone();
    async move {
      ctr.fetch_add(1, Ordering::SeqCst);
      Err(message.into())
    }
  })
}

// Handler that fails the first `failures` attempts of each job, then succeeds.
pub fn flaky_handler(failures: u32) -> BoxedHandler<u32, u32> {
  boxed(move |job| async move {
    if job.attempt <= failures {
      Err(format!("transient failure on attempt {}", job.attempt).into())
    } else {
      Ok(job.attempt)
    }
  })
}

// Handler that panics after yielding once.
pub fn panicking_handler() -> BoxedHandler<u32, u32> {
  boxed(|_job| explode())
}

async fn explode() -> Result<u32, HandlerError> {
  tokio::task::yield_now().await;
  panic!("Handler forced panic!");
}

// Handler that records payloads in the order they start.
pub fn recording_handler(order: Arc<parking_lot::Mutex<Vec<u32>>>) -> BoxedHandler<u32, u32> {
  boxed(move |job| {
    let order = order.clone();
    async move {
      order.lock().push(*job.payload);
      Ok(*job.payload)
    }
  })
}

// Handler for concurrency testing.
// Increments active count on start, decrements on end. Updates max observed.
pub fn concurrency_tracker(
  active_counter: Arc<AtomicUsize>,
  max_observed_active: Arc<AtomicUsize>,
  delay: StdDuration,
) -> BoxedHandler<u32, u32> {
  boxed(move |job| {
    let active = active_counter.clone();
    let max_obs = max_observed_active.clone();
    async move {
      let current_active = active.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!("Concurrency job START (Active: {})", current_active);
      max_obs.fetch_max(current_active, Ordering::SeqCst);

      tokio::time::sleep(delay).await;

      let current_active_after = active.fetch_sub(1, Ordering::SeqCst) - 1;
      tracing::debug!("Concurrency job END (Active: {})", current_active_after);
      Ok(*job.payload)
    }
  })
}
