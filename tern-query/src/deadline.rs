//! Per-query deadlines.
//!
//! Every operator checks the deadline at row-batch boundaries, and the
//! expression evaluator checks it at loop heads. Expiry raises
//! [`QueryError::Cancelled`]; in-flight cache entries are erased so
//! waiters observe the same error.

use crate::error::{QueryError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline and cancellation handle for one query.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl Deadline {
    /// No deadline; only explicit cancellation applies.
    pub fn none() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: None,
        }
    }

    /// Attach an external cancellation flag.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    /// Raise [`QueryError::Cancelled`] when expired or cancelled.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if let Some(flag) = &self.cancelled {
            if flag.load(Ordering::Relaxed) {
                return Err(QueryError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(QueryError::Cancelled);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_expires() {
        Deadline::none().check().unwrap();
    }

    #[test]
    fn test_elapsed_deadline() {
        let d = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        assert!(matches!(d.check(), Err(QueryError::Cancelled)));
    }

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let d = Deadline::none().with_cancel_flag(flag.clone());
        d.check().unwrap();
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(d.check(), Err(QueryError::Cancelled)));
    }
}
