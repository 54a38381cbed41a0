//! Request-scoped deadlines.
//!
//! Every suspension point (LLM call, tool body, MCP RPC) receives the turn's
//! deadline explicitly; cancellation is cooperative.  No thread-locals.

use std::time::Duration;

use tokio::time::Instant;

/// A point in time after which the current turn must stop.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    /// Time left before the deadline, zero when already past.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
