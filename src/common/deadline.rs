//! Query Deadline
//!
//! Cooperative wall-clock cancellation for query execution. Operators
//! compute synchronously, so cancellation is checked at natural batch
//! boundaries: between position chunks in the mutation sweep and before
//! every streamed result batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::QueryError;

/// Deadline controller shared by all tasks of one query.
///
/// Cloning shares the underlying cancellation flag, so any task hitting the
/// deadline cancels its siblings at their next check.
#[derive(Clone)]
pub struct QueryDeadline {
    cancelled: Arc<AtomicBool>,
    start_time: Instant,
    budget: Option<Duration>,
}

impl QueryDeadline {
    /// Create a controller with the given wall-clock budget.
    pub fn new(budget: Option<Duration>) -> Self {
        QueryDeadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
            budget,
        }
    }

    /// A controller that never expires.
    pub fn unbounded() -> Self {
        QueryDeadline::new(None)
    }

    /// Check whether the query may continue.
    ///
    /// Call this periodically during long CPU-bound stages. Returns
    /// `Err(QueryError::Timeout)` once the budget is exhausted or a sibling
    /// task has already been cancelled.
    pub fn check(&self) -> Result<(), QueryError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(QueryError::Timeout(self.budget.unwrap_or(Duration::ZERO)));
        }
        if let Some(budget) = self.budget {
            if self.start_time.elapsed() > budget {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(QueryError::Timeout(budget));
            }
        }
        Ok(())
    }

    /// Cancel the query explicitly.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
