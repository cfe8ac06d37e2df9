//! Resilience
//!
//! Bounded retry and invocation deadlines.

pub mod deadline;
pub mod retry;

pub use deadline::Deadline;
pub use retry::{
    Backoff, OAuth2RetryExecutor, RetryConfig, RetryStats, DEFAULT_RETRY_CONFIG, MAX_ATTEMPTS,
};
