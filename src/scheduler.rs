use crate::coordinator::{Coordinator, CoordinatorState};
use crate::error::{BuildError, HandlerError, LifecycleError, QueryError, ShutdownError, SubmitError};
use crate::events::JobEvent;
use crate::job::{
  BoxedHandler, HandlerFuture, Job, JobId, JobOptions, JobStats, JobStatus, JobView,
};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_EVENT_BUFFER: usize = 256;
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Periodic cleanup run by the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoCleanup {
  /// How often cleanup runs.
  pub interval: Duration,
  /// Terminal jobs whose completion/failure time is at least this old are removed.
  pub older_than: Duration,
}

/// Resolved scheduler configuration, as produced by [`SchedulerBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
  /// Maximum number of jobs in `processing` at once.
  pub concurrency: usize,
  pub tick_interval: Duration,
  /// Linear backoff unit: the k-th failed attempt waits `retry_delay * k`.
  pub retry_delay: Duration,
  /// Used when a submission does not set `max_attempts`.
  pub default_max_attempts: u32,
  /// Capacity of the lifecycle event channel.
  pub event_buffer_size: usize,
  pub auto_cleanup: Option<AutoCleanup>,
}

/// Builder for configuring and creating a [`JobKeeper`] instance.
///
/// # Example
///
/// ```no_run
/// use jobkeeper::JobKeeper;
/// use std::time::Duration;
///
/// # fn build() -> Result<(), Box<dyn std::error::Error>> {
/// let keeper: JobKeeper<String, ()> = JobKeeper::builder()
///     .concurrency(4)
///     .tick_interval(Duration::from_millis(250))
///     .retry_delay(Duration::from_secs(2))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SchedulerBuilder<P, R> {
  concurrency: Option<usize>,
  tick_interval: Duration,
  retry_delay: Duration,
  default_max_attempts: u32,
  event_buffer_size: usize,
  auto_cleanup: Option<AutoCleanup>,
  _types: PhantomData<fn() -> (P, R)>,
}

impl<P, R> Default for SchedulerBuilder<P, R> {
  fn default() -> Self {
    Self {
      concurrency: None,
      tick_interval: DEFAULT_TICK_INTERVAL,
      retry_delay: DEFAULT_RETRY_DELAY,
      default_max_attempts: DEFAULT_MAX_ATTEMPTS,
      event_buffer_size: DEFAULT_EVENT_BUFFER,
      auto_cleanup: None,
      _types: PhantomData,
    }
  }
}

impl<P, R> fmt::Debug for SchedulerBuilder<P, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchedulerBuilder")
      .field("concurrency", &self.concurrency)
      .field("tick_interval", &self.tick_interval)
      .field("retry_delay", &self.retry_delay)
      .field("default_max_attempts", &self.default_max_attempts)
      .field("event_buffer_size", &self.event_buffer_size)
      .field("auto_cleanup", &self.auto_cleanup)
      .finish()
  }
}

impl<P, R> SchedulerBuilder<P, R>
where
  P: Send + Sync + 'static,
  R: Send + Sync + 'static,
{
  /// Creates a new builder with default settings.
  /// - `concurrency`: Not set (required).
  /// - `tick_interval`: 1s.
  /// - `retry_delay`: 5s.
  /// - `default_max_attempts`: 3.
  /// - `event_buffer_size`: 256.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the concurrency budget (required, must be greater than 0).
  pub fn concurrency(mut self, count: usize) -> Self {
    self.concurrency = Some(count);
    self
  }

  /// Sets the period of the control loop.
  pub fn tick_interval(mut self, interval: Duration) -> Self {
    self.tick_interval = interval;
    self
  }

  /// Sets the linear backoff unit applied between attempts.
  pub fn retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  pub fn default_max_attempts(mut self, max_attempts: u32) -> Self {
    self.default_max_attempts = max_attempts;
    self
  }

  /// Sets the lifecycle event channel capacity. Slow subscribers beyond this lag
  /// and miss events; jobs are never affected.
  pub fn event_buffer_size(mut self, size: usize) -> Self {
    self.event_buffer_size = size.max(1);
    self
  }

  /// Enables periodic removal of terminal jobs older than `older_than`.
  pub fn auto_cleanup(mut self, interval: Duration, older_than: Duration) -> Self {
    self.auto_cleanup = Some(AutoCleanup {
      interval,
      older_than,
    });
    self
  }

  /// Validates the configuration and creates a stopped [`JobKeeper`].
  ///
  /// No task is spawned until [`JobKeeper::start`] is called.
  ///
  /// # Errors
  ///
  /// Returns a [`BuildError`] describing the first invalid setting.
  pub fn build(self) -> Result<JobKeeper<P, R>, BuildError> {
    let concurrency = self
      .concurrency
      .filter(|n| *n > 0)
      .ok_or(BuildError::MissingOrZeroConcurrency)?;
    if self.tick_interval.is_zero() {
      return Err(BuildError::ZeroTickInterval);
    }
    if self.default_max_attempts == 0 {
      return Err(BuildError::ZeroMaxAttempts);
    }
    if let Some(auto) = &self.auto_cleanup {
      if auto.interval.is_zero() {
        return Err(BuildError::ZeroCleanupInterval);
      }
    }
    if self.retry_delay.is_zero() {
      warn!("Scheduler built with zero retry delay. Failed jobs retry on the next tick.");
    }

    let config = SchedulerConfig {
      concurrency,
      tick_interval: self.tick_interval,
      retry_delay: self.retry_delay,
      default_max_attempts: self.default_max_attempts,
      event_buffer_size: self.event_buffer_size,
      auto_cleanup: self.auto_cleanup,
    };
    debug!(?config, "Scheduler built.");

    Ok(JobKeeper {
      state: Arc::new(CoordinatorState::new(config)),
      lifecycle: Arc::new(Mutex::new(None)),
    })
  }
}

struct RunningCoordinator {
  shutdown_tx: watch::Sender<bool>,
  handle: JoinHandle<()>,
}

/// The in-process background job scheduler.
///
/// Jobs carry a payload of type `P`; successful handlers produce a result of type
/// `R`, kept on the job record until it is cleaned up. The handle is cheap to clone
/// and every clone drives the same scheduler.
///
/// Use [`JobKeeper::builder()`] to create and configure an instance.
pub struct JobKeeper<P, R> {
  state: Arc<CoordinatorState<P, R>>,
  lifecycle: Arc<Mutex<Option<RunningCoordinator>>>,
}

impl<P, R> Clone for JobKeeper<P, R> {
  fn clone(&self) -> Self {
    Self {
      state: self.state.clone(),
      lifecycle: self.lifecycle.clone(),
    }
  }
}

impl<P, R> fmt::Debug for JobKeeper<P, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobKeeper")
      .field("config", &self.state.config)
      .field("handlers", &self.state.registry)
      .field("running", &self.lifecycle.lock().is_some())
      .finish_non_exhaustive()
  }
}

impl<P, R> JobKeeper<P, R>
where
  P: Send + Sync + 'static,
  R: Clone + Send + Sync + 'static,
{
  /// Returns a builder to configure and create a `JobKeeper` instance.
  pub fn builder() -> SchedulerBuilder<P, R> {
    SchedulerBuilder::new()
  }

  // --- Handlers ---

  /// Registers the handler for `job_type`, replacing any previous one.
  /// Returns `true` if a handler was replaced.
  ///
  /// Returning `Err` (or panicking) marks the attempt as failed; returning `Ok`
  /// completes the job with the value as its result.
  pub fn register_handler<F, Fut>(&self, job_type: impl Into<String>, handler: F) -> bool
  where
    F: Fn(JobView<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
  {
    let boxed: BoxedHandler<P, R> =
      Box::new(move |job: JobView<P>| Box::pin(handler(job)) as HandlerFuture<R>);
    self.state.registry.register(job_type.into(), boxed)
  }

  pub fn has_handler(&self, job_type: &str) -> bool {
    self.state.registry.contains(job_type)
  }

  /// Job types with a registered handler, sorted.
  pub fn registered_types(&self) -> Vec<String> {
    self.state.registry.job_types()
  }

  // --- Submission ---

  /// Admits a job and returns its ID.
  ///
  /// A job with a delay starts `delayed`; otherwise it is `pending` and eligible on
  /// the next tick. A handler for `job_type` need not exist yet, but must be
  /// registered by the time the job is dispatched.
  ///
  /// # Errors
  ///
  /// - [`SubmitError::EmptyJobType`]: `job_type` is empty or whitespace.
  /// - [`SubmitError::ZeroMaxAttempts`]: `options.max_attempts` is `Some(0)`.
  /// - [`SubmitError::DelayOutOfRange`]: the delay overflows the schedule time.
  pub fn submit(
    &self,
    job_type: impl Into<String>,
    payload: P,
    options: JobOptions,
  ) -> Result<JobId, SubmitError> {
    let job_type = job_type.into();
    let created_at = Utc::now();
    let (max_attempts, scheduled_at) = match self.validate(&job_type, &options, created_at) {
      Ok(resolved) => resolved,
      Err(e) => {
        SchedulerMetrics::incr(&self.state.metrics.jobs_rejected);
        warn!(job_type = %job_type, error = %e, "Rejected job submission.");
        return Err(e);
      }
    };

    let job_id = Uuid::new_v4();
    let job = Job::new(
      job_id,
      job_type.clone(),
      payload,
      options.priority,
      max_attempts,
      created_at,
      scheduled_at,
      self.state.store.next_seq(),
    );
    let status = job.status;
    self.state.store.insert(job);

    SchedulerMetrics::incr(&self.state.metrics.jobs_submitted);
    debug!(%job_id, job_type = %job_type, priority = %options.priority, %status, "Job submitted.");
    self.state.events.emit(JobEvent::Added {
      job_id,
      job_type,
      priority: options.priority,
      status,
    });
    if status == JobStatus::Pending {
      self.state.wake.notify_one();
    }
    Ok(job_id)
  }

  /// Submits with default options (normal priority, no delay).
  pub fn enqueue(&self, job_type: impl Into<String>, payload: P) -> Result<JobId, SubmitError> {
    self.submit(job_type, payload, JobOptions::default())
  }

  fn validate(
    &self,
    job_type: &str,
    options: &JobOptions,
    created_at: DateTime<Utc>,
  ) -> Result<(u32, DateTime<Utc>), SubmitError> {
    if job_type.trim().is_empty() {
      return Err(SubmitError::EmptyJobType);
    }
    let max_attempts = match options.max_attempts {
      Some(0) => return Err(SubmitError::ZeroMaxAttempts),
      Some(n) => n,
      None => self.state.config.default_max_attempts,
    };
    let scheduled_at = ChronoDuration::from_std(options.delay)
      .ok()
      .and_then(|delay| created_at.checked_add_signed(delay))
      .ok_or(SubmitError::DelayOutOfRange(options.delay))?;
    Ok((max_attempts, scheduled_at))
  }

  // --- Introspection ---

  /// Returns a snapshot of the job.
  ///
  /// # Errors
  ///
  /// [`QueryError::JobNotFound`] if the ID was never issued or the job was cleaned up.
  pub fn get_job(&self, job_id: JobId) -> Result<Job<P, R>, QueryError> {
    self
      .state
      .store
      .get(&job_id)
      .ok_or(QueryError::JobNotFound(job_id))
  }

  /// Jobs currently in `status`. Pending jobs are listed in dispatch order.
  pub fn get_jobs_by_status(&self, status: JobStatus) -> Vec<Job<P, R>> {
    self.state.store.by_status(status)
  }

  /// Every job in the index, in submission order.
  pub fn list_jobs(&self) -> Vec<Job<P, R>> {
    self.state.store.list()
  }

  /// Counts of jobs by status.
  pub fn get_stats(&self) -> JobStats {
    self.state.store.stats()
  }

  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.state.refresh_gauges();
    self.state.metrics.snapshot()
  }

  /// Subscribes to lifecycle notifications. Only events sent after this call are
  /// received.
  pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
    self.state.events.subscribe()
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.state.config
  }

  // --- Lifecycle ---

  /// Spawns the tick loop on the current Tokio runtime. Calling it while already
  /// running is a no-op.
  ///
  /// # Errors
  ///
  /// [`LifecycleError::NoRuntime`] when called outside a Tokio runtime.
  pub fn start(&self) -> Result<(), LifecycleError> {
    let runtime = Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;
    let mut lifecycle = self.lifecycle.lock();
    if let Some(running) = lifecycle.as_ref() {
      if !running.handle.is_finished() {
        debug!("Start requested but scheduler is already running.");
        return Ok(());
      }
      warn!("Previous coordinator task ended unexpectedly, restarting.");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = self.state.clone();
    let handle = runtime.spawn(async move {
      let mut coordinator = Coordinator::new(state, shutdown_rx);
      coordinator.run().await;
      info!("Coordinator task finished.");
    });
    *lifecycle = Some(RunningCoordinator {
      shutdown_tx,
      handle,
    });
    info!(concurrency = self.state.config.concurrency, "Scheduler started.");
    Ok(())
  }

  /// Stops the tick loop. No further jobs are promoted or dispatched; jobs already
  /// `processing` run to completion and still record their outcome. Calling it while
  /// stopped is a no-op. The scheduler can be started again.
  ///
  /// # Errors
  ///
  /// [`ShutdownError::TaskPanic`] if the coordinator task panicked.
  pub async fn stop(&self) -> Result<(), ShutdownError> {
    let running = self.lifecycle.lock().take();
    let Some(running) = running else {
      debug!("Stop requested but scheduler is not running.");
      return Ok(());
    };

    info!("Stopping scheduler...");
    // Send fails only if the coordinator already exited; the join below reports why.
    let _ = running.shutdown_tx.send(true);
    match running.handle.await {
      Ok(()) => {
        info!("Scheduler stopped.");
        Ok(())
      }
      Err(e) => {
        error!("Coordinator task panicked: {:?}", e);
        Err(ShutdownError::TaskPanic)
      }
    }
  }

  /// Stops the tick loop, then waits for every `processing` job to finish.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::TaskPanic`]: the coordinator task panicked.
  /// - [`ShutdownError::Timeout`]: jobs were still processing when `timeout` elapsed.
  ///   They keep running and still record their outcome.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    self.stop().await?;

    let drained = async {
      while self.state.store.processing_count() > 0 {
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
      }
    };
    match timeout {
      Some(limit) => tokio::time::timeout(limit, drained).await.map_err(|_| {
        error!(
          processing = self.state.store.processing_count(),
          "Shutdown timed out after {:?}", limit
        );
        ShutdownError::Timeout
      })?,
      None => drained.await,
    }
    info!("Graceful shutdown complete.");
    Ok(())
  }

  pub fn is_running(&self) -> bool {
    self
      .lifecycle
      .lock()
      .as_ref()
      .is_some_and(|running| !running.handle.is_finished())
  }

  /// Removes `completed`/`failed` jobs that reached their terminal state at least
  /// `older_than` ago. Returns the number removed. Non-terminal jobs are never removed.
  pub fn cleanup(&self, older_than: Duration) -> usize {
    self.state.cleanup(older_than)
  }
}
