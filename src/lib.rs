//! JobKeeper: An In-Process Background Job Scheduler
//!
//! Decouples slow or unreliable side effects (outbound email, SMS, report generation,
//! reconciliation runs) from a request path. Jobs are admitted with a priority, an
//! optional delay and an attempt ceiling; a tick-driven control loop dispatches them
//! to registered async handlers under a fixed concurrency budget, retrying failures
//! with linear backoff.
//!
//! # Features
//!
//! - Four priority tiers (`urgent > high > normal > low`), strict FIFO within a tier.
//! - Bounded concurrency: at most `concurrency` jobs are `processing` at once.
//! - Delayed jobs, promoted to `pending` once their schedule time passes.
//! - Retries with linear backoff: the k-th failed attempt waits `retry_delay * k`.
//! - Handler isolation: errors and panics are caught per job and classified as failures.
//! - Introspection by ID or status, counts by status and a metrics snapshot.
//! - Lifecycle notifications over a broadcast channel ([`JobEvent`]).
//! - Manual and periodic cleanup of old terminal jobs.
//! - Optional task-local job context for handlers (requires the `job_context` feature).
//! - Optional Serde support for public data types (requires the `serde` feature).
//!
//! # Usage
//!
//! ```no_run
//! use jobkeeper::{JobKeeper, JobOptions, Priority};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Email {
//!     to: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keeper: JobKeeper<Email, String> = JobKeeper::builder()
//!         .concurrency(4)
//!         .tick_interval(Duration::from_millis(200))
//!         .retry_delay(Duration::from_secs(2))
//!         .auto_cleanup(Duration::from_secs(60), Duration::from_secs(3600))
//!         .build()?;
//!
//!     keeper.register_handler("send_email", |job| async move {
//!         if job.payload.to.is_empty() {
//!             return Err("missing recipient".into());
//!         }
//!         Ok(format!("sent to {}", job.payload.to))
//!     });
//!
//!     keeper.start()?;
//!
//!     let job_id = keeper.submit(
//!         "send_email",
//!         Email { to: "ops@example.com".into() },
//!         JobOptions::new().priority(Priority::High).max_attempts(5),
//!     )?;
//!
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     let job = keeper.get_job(job_id)?;
//!     println!("{} is {} after {} attempt(s)", job.id, job.status, job.attempts);
//!     println!("{:?}", keeper.get_stats());
//!
//!     keeper.shutdown_graceful(Some(Duration::from_secs(10))).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use the [`SchedulerBuilder`] to configure the scheduler:
//! - `concurrency`: The concurrency budget (required).
//! - `tick_interval`, `retry_delay`, `default_max_attempts`: Loop period and retry policy.
//! - `event_buffer_size`: Capacity of the lifecycle event channel.
//! - `auto_cleanup`: Periodic removal of old `completed`/`failed` jobs.
//!
//! # Job Lifecycle & State
//!
//! ```text
//! submit ──► pending ◄──────── delayed ◄── submit (with delay)
//!               │   promote       ▲
//!               ▼                 │ retry (attempts remain)
//!          processing ────────────┘
//!            │     │
//!            ▼     ▼
//!      completed  failed  (also: no handler at dispatch, or attempts exhausted)
//! ```
//!
//! - A handler returning `Ok` completes the job and stores the value as its result.
//! - A handler returning `Err` or panicking fails the attempt. The job is re-delayed
//!   if attempts remain, otherwise it fails permanently with the last error message.
//! - A job whose type has no handler at dispatch time fails immediately, without
//!   consuming an attempt.
//! - Low-priority jobs are not protected from starvation under sustained load from
//!   higher tiers.
//!
//! # Observability
//!
//! - Counts by status via [`JobKeeper::get_stats`]; counters, gauges and durations via
//!   [`JobKeeper::metrics_snapshot`]. See [`MetricsSnapshot`].
//! - Lifecycle notifications via [`JobKeeper::subscribe`].
//! - Integrate with the `tracing` crate for detailed logs. Each attempt runs inside a
//!   `job_exec` span carrying `job_id`, `job_type` and `attempt`.

// --- Feature-gated Documentation ---

#[cfg(all(doc, feature = "job_context"))]
pub mod job_context_docs {
    //! # Accessing Job Context (`job_context` feature)
    //!
    //! When the `job_context` feature is enabled, a handler can read information
    //! about the attempt it is running through Tokio's task-local context:
    //!
    //! 1.  **`try_get_current_job_context() -> Option<JobContext>`**: Returns `None`
    //!     if called outside a JobKeeper handler.
    //! 2.  **`job_context!() -> JobContext`**: Retrieves the context, but **panics**
    //!     if called outside a JobKeeper handler.
    //!
    //! ```no_run
    //! use jobkeeper::{job_context, try_get_current_job_context, JobKeeper};
    //!
    //! # fn register(keeper: &JobKeeper<String, ()>) {
    //! keeper.register_handler("report", |_job| async move {
    //!     if let Some(ctx) = try_get_current_job_context() {
    //!         println!("Job {} attempt {}/{}", ctx.job_id, ctx.attempt, ctx.max_attempts);
    //!     }
    //!     let required_ctx = job_context!();
    //!     println!("Running {}", required_ctx.job_type);
    //!     Ok(())
    //! });
    //! # }
    //! ```
}

pub mod error;
pub mod events;
pub mod job;
pub mod metrics;
pub mod retry;
pub mod scheduler;

mod coordinator;
mod macros;
mod queue;
mod registry;
mod store;
mod worker;

// --- Public Re-exports ---

// Core scheduler components
pub use scheduler::{AutoCleanup, JobKeeper, SchedulerBuilder, SchedulerConfig};

// Error types
pub use error::{BuildError, HandlerError, LifecycleError, QueryError, ShutdownError, SubmitError};

// Job related types
pub use job::{
  BoxedHandler, HandlerFuture, Job, JobId, JobOptions, JobStats, JobStatus, JobView, Priority,
};
#[cfg(feature = "job_context")]
pub use job::context::{try_get_current_job_context, JobContext};

// Observability
pub use events::{FailureReason, JobEvent};
pub use metrics::MetricsSnapshot;
pub use retry::{RetryDecision, RetryPolicy};
