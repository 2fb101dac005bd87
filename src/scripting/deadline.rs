//! Wall-clock budget shared between the supervisor and a script worker.

use crate::error::{AppResult, DaqError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A budget that expires at a fixed instant or when cancelled, whichever comes first.
#[derive(Debug, Clone)]
pub struct Deadline {
    budget: Duration,
    expires_at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// Start a budget of `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            budget,
            expires_at: Instant::now() + budget,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The total budget.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Stop the worker at its next check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancelled or past the expiry instant.
    pub fn is_expired(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || Instant::now() >= self.expires_at
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        if self.cancelled.load(Ordering::SeqCst) {
            return Duration::ZERO;
        }
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// `Err(ScriptTimeout)` once expired.
    pub fn check(&self) -> AppResult<()> {
        if self.is_expired() {
            Err(DaqError::ScriptTimeout(self.budget))
        } else {
            Ok(())
        }
    }

    /// Cancel this deadline when the returned guard is dropped.
    pub fn guard(&self) -> DeadlineGuard {
        DeadlineGuard {
            deadline: self.clone(),
        }
    }
}

/// Cancels its deadline on drop, on every exit path of the owner.
#[derive(Debug)]
pub struct DeadlineGuard {
    deadline: Deadline,
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.deadline.cancel();
    }
}
