//! Per-operator runtime statistics.
//!
//! A [`RuntimeInformation`] tree mirrors the operator tree of a query and
//! is produced alongside its result table: operator name, produced rows
//! and columns, wall time, cache status, and the same for every
//! descendant. Serialises to JSON for diagnostics.

use serde::Serialize;

/// How an operator's result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Computed by this query.
    Computed,
    /// Served from the non-pinned cache segment.
    CachedNotPinned,
    /// Served from the pinned cache segment.
    CachedPinned,
    /// Not yet computed (descendant of a cache hit).
    NotComputed,
}

/// Statistics tree mirroring one operator tree.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInformation {
    /// Operator name, e.g. `"Join"`.
    pub operator: String,
    /// Rows produced.
    pub rows: usize,
    /// Columns produced.
    pub cols: usize,
    /// Wall time of this operator's own computation, in milliseconds.
    pub time_ms: u64,
    /// Cache status of the result.
    pub cache_status: CacheStatus,
    /// Statistics of the child operators.
    pub children: Vec<RuntimeInformation>,
}

impl RuntimeInformation {
    /// A placeholder for operators whose computation never ran.
    pub fn not_computed(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            rows: 0,
            cols: 0,
            time_ms: 0,
            cache_status: CacheStatus::NotComputed,
            children: Vec::new(),
        }
    }

    /// Total wall time including descendants.
    pub fn total_time_ms(&self) -> u64 {
        self.time_ms + self.children.iter().map(|c| c.total_time_ms()).sum::<u64>()
    }

    /// Number of operators in the tree.
    pub fn num_operators(&self) -> usize {
        1 + self.children.iter().map(|c| c.num_operators()).sum::<usize>()
    }

    /// Re-tag the root as a cache hit of the given flavour.
    pub fn as_cache_hit(mut self, status: CacheStatus) -> Self {
        self.cache_status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_accounting() {
        let child = RuntimeInformation {
            operator: "IndexScan".into(),
            rows: 10,
            cols: 2,
            time_ms: 3,
            cache_status: CacheStatus::Computed,
            children: vec![],
        };
        let root = RuntimeInformation {
            operator: "Join".into(),
            rows: 4,
            cols: 3,
            time_ms: 5,
            cache_status: CacheStatus::Computed,
            children: vec![child.clone(), child],
        };
        assert_eq!(root.total_time_ms(), 11);
        assert_eq!(root.num_operators(), 3);
    }
}
