//! Shared memory budget for query execution.
//!
//! All large allocations made on behalf of a query (result tables, join
//! hash tables, distinct sets in the aggregate evaluator) are charged
//! against a [`MemoryBudget`]. Handles are cheap to clone and share one
//! atomic counter, so sibling queries compete for the same global budget.
//!
//! A failed charge surfaces as [`AllocError`]; the query layer maps it to
//! its `AllocationLimitExceeded` error kind, which is never cached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// The shared budget refused an allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("memory limit exceeded: requested {requested} bytes, {available} of {limit} available")]
pub struct AllocError {
    /// Bytes the caller asked for.
    pub requested: usize,
    /// Bytes still available at the time of the request.
    pub available: usize,
    /// Total budget in bytes.
    pub limit: usize,
}

#[derive(Debug)]
struct BudgetInner {
    limit: usize,
    used: AtomicUsize,
}

/// Cloneable handle on a shared byte budget.
///
/// Handles are copied freely but hold shared state; releasing through any
/// clone credits the common counter.
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    inner: Arc<BudgetInner>,
}

impl MemoryBudget {
    /// Create a budget of `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limit,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// A budget that never refuses.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// Total budget in bytes.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Bytes currently charged.
    pub fn used(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    /// Try to charge `bytes` against the budget.
    pub fn try_charge(&self, bytes: usize) -> Result<(), AllocError> {
        let mut current = self.inner.used.load(Ordering::Relaxed);
        loop {
            let new = match current.checked_add(bytes) {
                Some(n) if n <= self.inner.limit => n,
                _ => {
                    return Err(AllocError {
                        requested: bytes,
                        available: self.inner.limit.saturating_sub(current),
                        limit: self.inner.limit,
                    })
                }
            };
            match self.inner.used.compare_exchange_weak(
                current,
                new,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Release `bytes` previously charged.
    pub fn release(&self, bytes: usize) {
        self.inner.used.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Open an empty RAII charge on this budget.
    pub fn open_charge(&self) -> MemoryCharge {
        MemoryCharge {
            budget: self.clone(),
            bytes: 0,
        }
    }
}

/// RAII charge against a [`MemoryBudget`]; releases on drop.
#[derive(Debug)]
pub struct MemoryCharge {
    budget: MemoryBudget,
    bytes: usize,
}

impl MemoryCharge {
    /// Grow the charge by `additional` bytes.
    pub fn grow(&mut self, additional: usize) -> Result<(), AllocError> {
        self.budget.try_charge(additional)?;
        self.bytes += additional;
        Ok(())
    }

    /// Bytes currently held by this charge.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryCharge {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_and_release() {
        let budget = MemoryBudget::new(100);
        budget.try_charge(60).unwrap();
        assert_eq!(budget.used(), 60);
        let err = budget.try_charge(50).unwrap_err();
        assert_eq!(err.requested, 50);
        assert_eq!(err.available, 40);
        budget.release(60);
        budget.try_charge(100).unwrap();
    }

    #[test]
    fn test_shared_across_clones() {
        let budget = MemoryBudget::new(100);
        let clone = budget.clone();
        budget.try_charge(80).unwrap();
        assert!(clone.try_charge(30).is_err());
        clone.release(80);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_raii_charge_releases_on_drop() {
        let budget = MemoryBudget::new(100);
        {
            let mut charge = budget.open_charge();
            charge.grow(70).unwrap();
            assert_eq!(budget.used(), 70);
            assert!(charge.grow(40).is_err());
            assert_eq!(charge.bytes(), 70);
        }
        assert_eq!(budget.used(), 0);
    }
}
