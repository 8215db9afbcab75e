use super::JobId;

/// Contextual information available to a running handler via task-locals.
/// Accessible within a handler using `try_get_current_job_context()`
/// or the `job_context!()` macro when the `job_context` feature is enabled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobContext {
  /// The unique ID of the job being processed.
  pub job_id: JobId,
  /// The job type the handler was registered for.
  pub job_type: String,
  /// 1-based number of the current attempt.
  pub attempt: u32,
  pub max_attempts: u32,
}

tokio::task_local! {
    /// Provides access to the current `JobContext` within a handler's execution scope.
    /// Set by the worker if the `job_context` feature is enabled.
    pub static CURRENT_JOB_CONTEXT: JobContext;
}

/// Attempts to retrieve the current `JobContext` for the executing handler.
///
/// Returns `None` if called outside a handler run by the scheduler.
pub fn try_get_current_job_context() -> Option<JobContext> {
  CURRENT_JOB_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Retrieves the current `JobContext`, panicking if called outside a
/// scheduler-managed handler task where the context has not been set.
///
/// Use `try_get_current_job_context()` for safe, optional access.
///
/// # Panics
/// Panics if the `CURRENT_JOB_CONTEXT` task local has not been set.
#[macro_export]
macro_rules! job_context {
  () => {
    $crate::job::context::CURRENT_JOB_CONTEXT.with(|ctx| ctx.clone())
  };
}
