//! Execution context for query planning and evaluation.
//!
//! The [`ExecutionContext`] bundles everything an operator needs while
//! computing: the triple index, the shared result cache, the memory
//! budget, the cost models, the pinning flags and the per-query deadline.
//! It is immutable per query and safe to read concurrently.

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::cost::{CostFactors, SortCostModel};
use crate::deadline::Deadline;
use crate::error::Result;
use std::sync::Arc;
use tern_core::{MemoryBudget, TripleIndex};

/// Per-query handle on the process-wide execution state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    index: Arc<dyn TripleIndex>,
    cache: Arc<ResultCache>,
    budget: MemoryBudget,
    sort_cost: SortCostModel,
    cost_factors: Arc<CostFactors>,
    pin_subtrees: bool,
    pin_result: bool,
    test_mode: bool,
    deadline: Deadline,
}

impl ExecutionContext {
    /// Build a context from an index, a shared cache, and configuration.
    /// Reads the cost-factor TSV when the config names one.
    pub fn new(
        index: Arc<dyn TripleIndex>,
        cache: Arc<ResultCache>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let cost_factors = match &config.cost_factors_file {
            Some(path) => CostFactors::read_from_file(path)?,
            None => CostFactors::new(),
        };
        Ok(Self {
            index,
            cache,
            budget: MemoryBudget::new(config.memory_budget_bytes),
            sort_cost: SortCostModel::default(),
            cost_factors: Arc::new(cost_factors),
            pin_subtrees: config.pin_subtrees,
            pin_result: config.pin_result,
            test_mode: config.test_mode,
            deadline: Deadline::none(),
        })
    }

    /// Attach a deadline for this query.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Share an existing budget instead of the config-derived one.
    pub fn with_budget(mut self, budget: MemoryBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Override the sort cost model.
    pub fn with_sort_cost(mut self, model: SortCostModel) -> Self {
        self.sort_cost = model;
        self
    }

    pub fn index(&self) -> &Arc<dyn TripleIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn sort_cost(&self) -> &SortCostModel {
        &self.sort_cost
    }

    /// Cost factor by key; missing keys are `1.0`.
    pub fn cost_factor(&self, key: &str) -> f64 {
        self.cost_factors.get(key)
    }

    pub fn pin_subtrees(&self) -> bool {
        self.pin_subtrees
    }

    pub fn pin_result(&self) -> bool {
        self.pin_result
    }

    /// Deterministic planner tie-breaking.
    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Shorthand for `deadline().check()`.
    #[inline]
    pub fn check_deadline(&self) -> Result<()> {
        self.deadline.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::MemoryIndex;

    #[test]
    fn test_context_from_config() {
        let index = Arc::new(MemoryIndex::builder().build());
        let cache = Arc::new(ResultCache::new(100, 100, 10));
        let config = EngineConfig::new().with_pin_result(true).with_test_mode();
        let ctx = ExecutionContext::new(index, cache, &config).unwrap();
        assert!(ctx.pin_result());
        assert!(!ctx.pin_subtrees());
        assert!(ctx.test_mode());
        assert_eq!(ctx.cost_factor("ANYTHING"), 1.0);
        ctx.check_deadline().unwrap();
    }
}
