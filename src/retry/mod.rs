//! Retry with exponential backoff, and deferred replay of operations.

mod backoff;
mod executor;
mod queue;

pub use backoff::BackoffPolicy;
pub use executor::{RetryConfig, RetryExecutor, RetryHook, RetryPredicate};
pub use queue::{DrainReport, QueueOutcome, QueuedOperation, RetryQueue};
