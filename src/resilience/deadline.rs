//! Invocation Deadline
//!
//! The wall-clock budget of one scheduled invocation.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left, zero once passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether at least `needed` is left.
    pub fn has_at_least(&self, needed: Duration) -> bool {
        self.remaining() >= needed
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
