use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::warn;

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
  /// Re-delay the job until `retry_at`.
  Retry {
    retry_at: DateTime<Utc>,
    backoff: StdDuration,
  },
  /// No attempts remain; the job fails terminally.
  Exhausted,
}

/// Linear backoff: the k-th failed attempt is retried `retry_delay × k` after the
/// failure. No jitter is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  retry_delay: StdDuration,
}

impl RetryPolicy {
  pub fn linear(retry_delay: StdDuration) -> Self {
    Self { retry_delay }
  }

  pub fn retry_delay(&self) -> StdDuration {
    self.retry_delay
  }

  /// Backoff applied after the failure of attempt number `attempts`.
  pub fn backoff_for(&self, attempts: u32) -> StdDuration {
    self
      .retry_delay
      .checked_mul(attempts)
      .unwrap_or(StdDuration::MAX)
  }

  /// Classifies a failed attempt.
  ///
  /// `attempts` is the number of attempts made so far, including the one that just
  /// failed. Once `attempts` reaches `max_attempts` the job is exhausted.
  pub fn decide(&self, attempts: u32, max_attempts: u32, failed_at: DateTime<Utc>) -> RetryDecision {
    if attempts >= max_attempts {
      return RetryDecision::Exhausted;
    }
    let backoff = self.backoff_for(attempts);
    RetryDecision::Retry {
      retry_at: add_std_duration(failed_at, backoff),
      backoff,
    }
  }
}

/// Adds a std duration to a timestamp, saturating far in the future on overflow.
pub(crate) fn add_std_duration(at: DateTime<Utc>, duration: StdDuration) -> DateTime<Utc> {
  match ChronoDuration::from_std(duration) {
    Ok(chrono_duration) => at.checked_add_signed(chrono_duration).unwrap_or_else(|| {
      warn!(?duration, "Backoff addition overflowed, clamping.");
      DateTime::<Utc>::MAX_UTC
    }),
    Err(e) => {
      warn!(?duration, error = %e, "Failed to convert backoff duration, clamping.");
      DateTime::<Utc>::MAX_UTC
    }
  }
}
