//! Planner cost models.
//!
//! [`CostFactors`] is a flat `key -> f64` table loaded once from a TSV
//! file; planners multiply their base estimates by the relevant factor.
//! Unknown keys are ignored on load and missing keys default to `1.0`.
//!
//! [`SortCostModel`] prices a sort of `n` rows as `n * log2(n)` scaled by
//! a machine-dependent factor.

use crate::error::{QueryError, Result};
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::debug;

/// Cost factor applied to sort-merge join sizes.
pub const JOIN_SIZE_FACTOR: &str = "JOIN_SIZE_FACTOR";
/// Cost factor applied to hash join sizes.
pub const HASH_JOIN_SIZE_FACTOR: &str = "HASH_JOIN_SIZE_FACTOR";
/// Cost factor applied to filter evaluation.
pub const FILTER_COST_FACTOR: &str = "FILTER_COST_FACTOR";
/// Cost factor applied to the sort model.
pub const SORT_COST_FACTOR: &str = "SORT_COST_FACTOR";

/// Planning cost factors, loaded from a `key\tdouble` TSV.
#[derive(Debug, Clone, Default)]
pub struct CostFactors {
    factors: FxHashMap<String, f64>,
}

impl CostFactors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TSV file: one `key<TAB>double` per line, `#` starts a
    /// comment line, malformed lines are rejected.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            QueryError::Internal(format!(
                "cannot read cost factors from {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::parse(&text)
    }

    /// Parse TSV content (see [`read_from_file`]).
    ///
    /// [`read_from_file`]: CostFactors::read_from_file
    pub fn parse(text: &str) -> Result<Self> {
        let mut factors = FxHashMap::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('\t').ok_or_else(|| {
                QueryError::Internal(format!("cost factors line {}: missing tab", lineno + 1))
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                QueryError::Internal(format!(
                    "cost factors line {}: '{}' is not a double",
                    lineno + 1,
                    value
                ))
            })?;
            factors.insert(key.to_owned(), value);
        }
        debug!(count = factors.len(), "loaded cost factors");
        Ok(Self { factors })
    }

    /// The factor for `key`, defaulting to `1.0`.
    pub fn get(&self, key: &str) -> f64 {
        self.factors.get(key).copied().unwrap_or(1.0)
    }

    /// Override a single factor (used by tests).
    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.factors.insert(key.into(), value);
    }
}

/// Cost model for sorting `n` rows.
#[derive(Debug, Clone, Copy)]
pub struct SortCostModel {
    factor: f64,
}

impl Default for SortCostModel {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl SortCostModel {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    /// Estimated cost of sorting `n` rows.
    pub fn cost(&self, n: usize) -> usize {
        if n < 2 {
            return n;
        }
        let log = (n as f64).log2();
        (n as f64 * log * self.factor).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tsv() {
        let factors = CostFactors::parse(
            "# comment\nJOIN_SIZE_FACTOR\t2.5\n\nSOME_UNKNOWN_KEY\t0.25\n",
        )
        .unwrap();
        assert_eq!(factors.get(JOIN_SIZE_FACTOR), 2.5);
        assert_eq!(factors.get("SOME_UNKNOWN_KEY"), 0.25);
        assert_eq!(factors.get("MISSING"), 1.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CostFactors::parse("no-tab-here").is_err());
        assert!(CostFactors::parse("KEY\tnot-a-number").is_err());
    }

    #[test]
    fn test_sort_cost_monotone() {
        let model = SortCostModel::default();
        assert!(model.cost(10) < model.cost(100));
        assert_eq!(model.cost(0), 0);
        assert_eq!(model.cost(1), 1);
    }
}
