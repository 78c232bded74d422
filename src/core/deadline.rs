//! Bounded-duration operation context.
//!
//! Every coordinator operation carries a `Deadline`. Store calls consult it before
//! starting, bound their SQLite busy wait by what is left, and interrupt statements
//! that outlive it. Nothing is retried after the budget runs out.

use crate::core::error::AccoladeError;
use std::time::{Duration, Instant};

/// Default per-operation budget.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left before expiry, or `Timeout` naming the store call that was refused.
    pub fn remaining(&self, op: &str) -> Result<Duration, AccoladeError> {
        let left = self.expires_at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(AccoladeError::Timeout(format!(
                "{} exceeded the {}ms operation budget",
                op,
                self.budget.as_millis()
            )));
        }
        Ok(left)
    }

    /// A fresh budget for follow-up work (audit, compensation) that must run even
    /// when the primary call consumed this one.
    pub fn detached(&self, budget: Duration) -> Deadline {
        Deadline::new(budget)
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::new(DEFAULT_OP_TIMEOUT)
    }
}
