use crate::job::BoxedHandler;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

/// Maps a job type to the single handler that processes it.
///
/// Registration may happen before or after jobs of that type are submitted. Lookups
/// happen at dispatch time only.
pub(crate) struct HandlerRegistry<P, R> {
  handlers: RwLock<HashMap<String, Arc<BoxedHandler<P, R>>>>,
}

impl<P, R> HandlerRegistry<P, R> {
  pub fn new() -> Self {
    Self {
      handlers: RwLock::new(HashMap::new()),
    }
  }

  /// Registers `handler` for `job_type`, replacing any previous handler.
  /// Returns `true` if a handler was replaced.
  pub fn register(&self, job_type: String, handler: BoxedHandler<P, R>) -> bool {
    let replaced = self
      .handlers
      .write()
      .insert(job_type.clone(), Arc::new(handler))
      .is_some();
    if replaced {
      info!(job_type = %job_type, "Replaced existing handler.");
    } else {
      debug!(job_type = %job_type, "Registered handler.");
    }
    replaced
  }

  pub fn get(&self, job_type: &str) -> Option<Arc<BoxedHandler<P, R>>> {
    self.handlers.read().get(job_type).cloned()
  }

  pub fn contains(&self, job_type: &str) -> bool {
    self.handlers.read().contains_key(job_type)
  }

  /// Registered job types, sorted.
  pub fn job_types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
    types.sort();
    types
  }
}

impl<P, R> fmt::Debug for HandlerRegistry<P, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerRegistry")
      .field("job_types", &self.job_types())
      .finish()
  }
}
