use crate::events::{EventEmitter, FailureReason, JobEvent};
use crate::job::BoxedHandler;
use crate::metrics::SchedulerMetrics;
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::scheduler::SchedulerConfig;
use crate::store::{Dispatched, JobStore};
use crate::worker::Worker;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{watch, Notify};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, Instrument};

/// State shared by the public handle, the Coordinator task and every Worker task.
pub(crate) struct CoordinatorState<P, R> {
  pub config: SchedulerConfig,
  pub retry_policy: RetryPolicy,
  pub store: JobStore<P, R>,
  pub registry: HandlerRegistry<P, R>,
  pub events: EventEmitter,
  pub metrics: SchedulerMetrics,
  /// Wakes the tick loop before the next periodic tick.
  pub wake: Notify,
}

impl<P, R> CoordinatorState<P, R> {
  pub fn new(config: SchedulerConfig) -> Self {
    Self {
      retry_policy: RetryPolicy::linear(config.retry_delay),
      store: JobStore::new(),
      registry: HandlerRegistry::new(),
      events: EventEmitter::new(config.event_buffer_size),
      metrics: SchedulerMetrics::new(),
      wake: Notify::new(),
      config,
    }
  }

  /// Evicts terminal jobs older than `older_than`. Returns the number removed.
  pub fn cleanup(&self, older_than: Duration) -> usize {
    let now = Utc::now();
    let cutoff = ChronoDuration::from_std(older_than)
      .ok()
      .and_then(|age| now.checked_sub_signed(age))
      .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let removed = self.store.cleanup(cutoff);
    SchedulerMetrics::add(&self.metrics.jobs_cleaned, removed);
    if removed > 0 {
      info!(removed, older_than_ms = older_than.as_millis(), "Cleaned up terminal jobs.");
    } else {
      trace!(older_than_ms = older_than.as_millis(), "Cleanup found nothing to remove.");
    }
    removed
  }

  /// Updates the queue-depth gauges from the store.
  pub fn refresh_gauges(&self) {
    let (pending, delayed, processing) = self.store.queue_depths();
    SchedulerMetrics::set(&self.metrics.jobs_pending_current, pending);
    SchedulerMetrics::set(&self.metrics.jobs_delayed_current, delayed);
    SchedulerMetrics::set(&self.metrics.jobs_processing_current, processing);
  }
}

/// The tick-driven control loop.
///
/// Each tick promotes due delayed jobs, then dispatches the highest-priority pending
/// jobs into the free concurrency budget. A tick never waits on a handler: every
/// dispatched job runs in its own Worker task.
pub(crate) struct Coordinator<P, R> {
  state: Arc<CoordinatorState<P, R>>,
  shutdown_rx: watch::Receiver<bool>,
}

impl<P, R> Coordinator<P, R>
where
  P: Send + Sync + 'static,
  R: Send + Sync + 'static,
{
  pub fn new(state: Arc<CoordinatorState<P, R>>, shutdown_rx: watch::Receiver<bool>) -> Self {
    Self { state, shutdown_rx }
  }

  /// Runs until a stop is signalled or the handle owning the signal is dropped.
  pub async fn run(&mut self) {
    let config = &self.state.config;
    info!(
      concurrency = config.concurrency,
      tick_ms = config.tick_interval.as_millis(),
      "Coordinator started."
    );

    let mut ticker = interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cleanup_ticker = config.auto_cleanup.map(|auto| {
      let mut ticker = interval_at(Instant::now() + auto.interval, auto.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      (ticker, auto.older_than)
    });

    loop {
      tokio::select! {
          biased; // Prioritize checking the stop signal

          changed = self.shutdown_rx.changed() => {
              if changed.is_err() {
                  info!("Scheduler handle dropped, coordinator exiting.");
                  break;
              }
              if *self.shutdown_rx.borrow() {
                  info!("Coordinator received stop signal.");
                  break;
              }
          },

          _ = ticker.tick() => {
              trace!("Tick.");
              self.tick();
          },

          _ = self.state.wake.notified() => {
              trace!("Woken before next tick.");
              self.tick();
          },

          older_than = next_cleanup(&mut cleanup_ticker) => {
              self.state.cleanup(older_than);
          },
      }
    }

    info!("Coordinator task shutting down.");
  }

  /// One scheduler iteration. Never suspends.
  fn tick(&self) {
    let now = Utc::now();

    let promoted = self.state.store.promote_due(now);
    SchedulerMetrics::add(&self.state.metrics.jobs_promoted, promoted.len());
    for job_id in promoted {
      self.state.events.emit(JobEvent::Promoted { job_id });
    }

    let processing = self.state.store.processing_count();
    let available = self.state.config.concurrency.saturating_sub(processing);
    if available == 0 {
      trace!(
        processing,
        concurrency = self.state.config.concurrency,
        "Dispatch check: concurrency budget exhausted."
      );
      self.state.refresh_gauges();
      return;
    }

    let batch = self
      .state
      .store
      .dispatch(available, now, |job_type| self.state.registry.get(job_type));

    for unhandled in batch.unhandled {
      SchedulerMetrics::incr(&self.state.metrics.jobs_unhandled);
      error!(
        job_id = %unhandled.job_id,
        job_type = %unhandled.job_type,
        "No handler registered for job type, failing job."
      );
      self.state.events.emit(JobEvent::Failed {
        job_id: unhandled.job_id,
        job_type: unhandled.job_type,
        attempts: unhandled.attempts,
        error: unhandled.error,
        reason: FailureReason::NoHandler,
      });
    }

    if !batch.started.is_empty() {
      debug!(count = batch.started.len(), available, "Dispatching jobs.");
    }
    for dispatched in batch.started {
      self.spawn_worker(dispatched, now);
    }

    self.state.refresh_gauges();
  }

  fn spawn_worker(&self, dispatched: Dispatched<P, Arc<BoxedHandler<P, R>>>, now: DateTime<Utc>) {
    let view = &dispatched.view;
    SchedulerMetrics::incr(&self.state.metrics.jobs_dispatched);
    if let Ok(wait) = now.signed_duration_since(dispatched.eligible_at).to_std() {
      self.state.metrics.job_queue_wait_duration.record(wait);
    }
    self.state.events.emit(JobEvent::Started {
      job_id: view.id,
      job_type: view.job_type.clone(),
      attempt: view.attempt,
    });

    let job_span = tracing::span!(
      tracing::Level::INFO,
      "job_exec",
      job_id = %view.id,
      job_type = view.job_type.as_str(),
      attempt = view.attempt,
    );
    let worker = Worker::new(self.state.clone());
    tokio::spawn(worker.run(dispatched).instrument(job_span));
  }
}

/// Resolves on the next auto-cleanup tick, or never when auto-cleanup is off.
async fn next_cleanup(ticker: &mut Option<(Interval, Duration)>) -> Duration {
  match ticker {
    Some((interval, older_than)) => {
      interval.tick().await;
      *older_than
    }
    None => std::future::pending().await,
  }
}
