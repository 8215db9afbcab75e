use crate::job::JobId;

use std::time::Duration;

use thiserror::Error;

/// The error type handlers return to signal a failed attempt.
///
/// Any `std::error::Error + Send + Sync` (including `anyhow::Error`) and plain
/// strings convert into it with `?` or `.into()`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during the scheduler building phase using `SchedulerBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Concurrency budget (`concurrency`) must be specified and greater than zero")]
  MissingOrZeroConcurrency,
  #[error("Tick interval must be greater than zero")]
  ZeroTickInterval,
  #[error("Default `max_attempts` must be greater than zero")]
  ZeroMaxAttempts,
  #[error("Auto-cleanup interval must be greater than zero")]
  ZeroCleanupInterval,
}

/// Caller errors detected synchronously by `JobKeeper::submit`.
/// A rejected submission never enters the job index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
  #[error("Job type must not be empty.")]
  EmptyJobType,
  #[error("`max_attempts` must be greater than zero.")]
  ZeroMaxAttempts,
  #[error("Delay of {0:?} cannot be represented as a schedule time.")]
  DelayOutOfRange(Duration),
  #[error("Unknown priority '{0}' (expected one of: urgent, high, normal, low).")]
  InvalidPriority(String),
}

/// Errors related to querying job information.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
  #[error("Job with ID {0} not found.")]
  JobNotFound(JobId),
}

/// Errors related to starting the scheduler's tick loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
  #[error("`start` must be called from within a Tokio runtime.")]
  NoRuntime,
}

/// Errors related to stopping the scheduler (`stop`, `shutdown_graceful`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Timed out waiting for processing jobs to finish.")]
  Timeout,
  #[error("The coordinator task panicked.")]
  TaskPanic,
}
