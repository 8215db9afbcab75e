use crate::coordinator::CoordinatorState;
use crate::events::{FailureReason, JobEvent};
use crate::job::{BoxedHandler, JobView};
use crate::metrics::SchedulerMetrics;
use crate::store::{AttemptOutcome, Dispatched};

#[cfg(feature = "job_context")]
use crate::job::context::{JobContext, CURRENT_JOB_CONTEXT};

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

/// Runs a single dispatched attempt.
///
/// The handler runs in its own spawned task so a panic (even one raised while
/// building the future) is caught as a failed attempt and can never reach the tick
/// loop or another job. The worker then applies the outcome transition and wakes the
/// coordinator, since a concurrency slot just freed up.
pub(crate) struct Worker<P, R> {
  state: Arc<CoordinatorState<P, R>>,
}

impl<P, R> Worker<P, R>
where
  P: Send + Sync + 'static,
  R: Send + Sync + 'static,
{
  pub fn new(state: Arc<CoordinatorState<P, R>>) -> Self {
    Self { state }
  }

  pub async fn run(self, dispatched: Dispatched<P, Arc<BoxedHandler<P, R>>>) {
    let Dispatched { view, handler, .. } = dispatched;
    let job_id = view.id;

    info!("Starting job execution.");
    let start = Instant::now();
    let exec_result = self.execute_handler(view, handler).await;
    let duration = start.elapsed();
    self.state.metrics.job_execution_duration.record(duration);

    let now = Utc::now();
    let outcome = match exec_result {
      Ok(result) => self.state.store.complete(job_id, result, now),
      Err(error) => self
        .state
        .store
        .fail_attempt(job_id, error, now, &self.state.retry_policy),
    };

    match outcome {
      Some(AttemptOutcome::Completed { job_type, attempts }) => {
        SchedulerMetrics::incr(&self.state.metrics.jobs_completed);
        info!(duration_ms = duration.as_millis(), "Job completed.");
        self.state.events.emit(JobEvent::Completed {
          job_id,
          job_type,
          attempts,
          duration,
        });
      }
      Some(AttemptOutcome::Retry {
        job_type,
        attempt,
        retry_at,
        error,
      }) => {
        SchedulerMetrics::incr(&self.state.metrics.jobs_retried);
        warn!(%error, next_run = %retry_at, "Job attempt failed, scheduling retry.");
        self.state.events.emit(JobEvent::RetryScheduled {
          job_id,
          job_type,
          attempt,
          retry_at,
          error,
        });
      }
      Some(AttemptOutcome::Failed {
        job_type,
        attempts,
        error,
      }) => {
        SchedulerMetrics::incr(&self.state.metrics.jobs_permanently_failed);
        error!(%error, attempts, "Job failed permanently after exhausting attempts.");
        self.state.events.emit(JobEvent::Failed {
          job_id,
          job_type,
          attempts,
          error,
          reason: FailureReason::RetriesExhausted,
        });
      }
      None => {
        // Store already logged why the outcome was dropped.
        debug!("Attempt outcome was not applied.");
      }
    }

    self.state.refresh_gauges();
    self.state.wake.notify_one();
  }

  /// Runs the handler in a separate task. Returns the handler's value, or the error
  /// message recorded on the job.
  async fn execute_handler(
    &self,
    view: JobView<P>,
    handler: Arc<BoxedHandler<P, R>>,
  ) -> Result<R, String> {
    #[cfg(feature = "job_context")]
    let context = JobContext {
      job_id: view.id,
      job_type: view.job_type.clone(),
      attempt: view.attempt,
      max_attempts: view.max_attempts,
    };

    let attempt = async move { (*handler)(view).await };

    #[cfg(feature = "job_context")]
    let task = tokio::spawn(CURRENT_JOB_CONTEXT.scope(context, attempt));
    #[cfg(not(feature = "job_context"))]
    let task = tokio::spawn(attempt);

    match task.await {
      Ok(Ok(result)) => Ok(result),
      Ok(Err(handler_error)) => {
        SchedulerMetrics::incr(&self.state.metrics.attempts_failed);
        Err(handler_error.to_string())
      }
      Err(join_error) if join_error.is_panic() => {
        SchedulerMetrics::incr(&self.state.metrics.attempts_panicked);
        let message = panic_message(join_error.into_panic());
        error!(panic = %message, "Handler panicked!");
        Err(format!("Handler panicked: {message}"))
      }
      Err(_) => {
        SchedulerMetrics::incr(&self.state.metrics.attempts_failed);
        warn!("Handler task was cancelled during execution.");
        Err("Handler task was cancelled".to_string())
      }
    }
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "<non-string panic payload>".to_string()
  }
}
