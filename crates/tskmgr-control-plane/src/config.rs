//! Control plane configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// What a Failed run does with its remaining Pending tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssignmentPolicy {
    /// A Failed run hands out nothing more.
    #[default]
    StopOnFailure,

    /// A Failed, open run without `fail_fast` keeps handing out its
    /// Pending tasks.
    DrainUnlessFailFast,
}

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub bind_addr: String,

    /// Longest wait for a single record lock (milliseconds).
    pub lock_timeout_ms: u64,

    /// Attempts per operation when a record lock times out.
    pub lock_retries: u32,

    /// Backoff before the first retry (milliseconds); doubles per retry.
    pub retry_backoff_ms: u64,

    pub assignment_policy: AssignmentPolicy,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Config {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.lock_retries.max(1),
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3333".to_string(),
            lock_timeout_ms: 5_000,
            lock_retries: 3,
            retry_backoff_ms: 50,
            assignment_policy: AssignmentPolicy::StopOnFailure,
            log_level: "info".to_string(),
        }
    }
}
