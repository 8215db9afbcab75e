use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without detailed percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize, // Sum of durations in microseconds
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Scheduler metrics kept in atomic counters.
///
/// Cloning only clones the `Arc`s, so the coordinator, workers and the public
/// handle all update the same values.
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
  // --- Counters (Monotonically increasing) ---
  /// Jobs accepted by `submit`.
  pub jobs_submitted: Arc<AtomicUsize>,
  /// Submissions rejected as caller errors.
  pub jobs_rejected: Arc<AtomicUsize>,
  /// Delayed jobs promoted to pending.
  pub jobs_promoted: Arc<AtomicUsize>,
  /// Jobs handed to a handler (one per attempt).
  pub jobs_dispatched: Arc<AtomicUsize>,
  pub jobs_completed: Arc<AtomicUsize>,
  /// Attempts that returned an error (panics counted separately).
  pub attempts_failed: Arc<AtomicUsize>,
  /// Attempts whose handler panicked.
  pub attempts_panicked: Arc<AtomicUsize>,
  /// Failed attempts that were re-delayed.
  pub jobs_retried: Arc<AtomicUsize>,
  /// Jobs that failed after exhausting all attempts.
  pub jobs_permanently_failed: Arc<AtomicUsize>,
  /// Jobs failed because no handler was registered for their type.
  pub jobs_unhandled: Arc<AtomicUsize>,
  /// Terminal jobs evicted by cleanup.
  pub jobs_cleaned: Arc<AtomicUsize>,

  // --- Gauges (Current state values, refreshed every tick) ---
  pub jobs_pending_current: Arc<AtomicUsize>,
  pub jobs_delayed_current: Arc<AtomicUsize>,
  pub jobs_processing_current: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Handler execution time.
  pub job_execution_duration: Arc<SimpleHistogram>,
  /// Time between a job becoming eligible and its dispatch.
  pub job_queue_wait_duration: Arc<SimpleHistogram>,
}

impl SchedulerMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn add(counter: &AtomicUsize, n: usize) {
    counter.fetch_add(n, Ordering::Relaxed);
  }

  pub(crate) fn set(gauge: &AtomicUsize, value: usize) {
    gauge.store(value, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_submitted: self.jobs_submitted.load(order),
      jobs_rejected: self.jobs_rejected.load(order),
      jobs_promoted: self.jobs_promoted.load(order),
      jobs_dispatched: self.jobs_dispatched.load(order),
      jobs_completed: self.jobs_completed.load(order),
      attempts_failed: self.attempts_failed.load(order),
      attempts_panicked: self.attempts_panicked.load(order),
      jobs_retried: self.jobs_retried.load(order),
      jobs_permanently_failed: self.jobs_permanently_failed.load(order),
      jobs_unhandled: self.jobs_unhandled.load(order),
      jobs_cleaned: self.jobs_cleaned.load(order),
      jobs_pending_current: self.jobs_pending_current.load(order),
      jobs_delayed_current: self.jobs_delayed_current.load(order),
      jobs_processing_current: self.jobs_processing_current.load(order),
      job_execution_duration_count: self.job_execution_duration.get_count(),
      job_execution_duration_sum_micros: self.job_execution_duration.get_sum_micros(),
      job_queue_wait_duration_count: self.job_queue_wait_duration.get_count(),
      job_queue_wait_duration_sum_micros: self.job_queue_wait_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the scheduler's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  // Counters
  pub jobs_submitted: usize,
  pub jobs_rejected: usize,
  pub jobs_promoted: usize,
  pub jobs_dispatched: usize,
  pub jobs_completed: usize,
  pub attempts_failed: usize,
  pub attempts_panicked: usize,
  pub jobs_retried: usize,
  pub jobs_permanently_failed: usize,
  pub jobs_unhandled: usize,
  pub jobs_cleaned: usize,
  // Gauges
  pub jobs_pending_current: usize,
  pub jobs_delayed_current: usize,
  pub jobs_processing_current: usize,
  // Histogram Data
  pub job_execution_duration_count: usize,
  pub job_execution_duration_sum_micros: usize,
  pub job_queue_wait_duration_count: usize,
  pub job_queue_wait_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean handler execution duration, if any attempt finished.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    mean(self.job_execution_duration_sum_micros, self.job_execution_duration_count)
  }

  /// Mean time jobs waited between eligibility and dispatch.
  pub fn mean_queue_wait(&self) -> Option<Duration> {
    mean(self.job_queue_wait_duration_sum_micros, self.job_queue_wait_duration_count)
  }
}

fn mean(sum_micros: usize, count: usize) -> Option<Duration> {
  if count == 0 {
    None
  } else {
    Some(Duration::from_micros((sum_micros / count) as u64))
  }
}
