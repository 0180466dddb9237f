//! The neutral element of joining: one row, zero columns.
//!
//! An empty group graph pattern evaluates to a single empty solution;
//! joining anything with it is the identity.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{IdTable, LocalVocab, ResultTable};

/// Produces exactly one row with no columns.
#[derive(Debug)]
pub struct NeutralElement {
    var_columns: VariableColumns,
}

impl NeutralElement {
    pub fn new() -> Self {
        Self {
            var_columns: VariableColumns::new(),
        }
    }
}

impl Default for NeutralElement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for NeutralElement {
    fn name(&self) -> &'static str {
        "NeutralElement"
    }

    fn cache_key(&self) -> String {
        "NEUTRAL_ELEMENT".to_owned()
    }

    fn estimated_size(&self) -> usize {
        1
    }

    fn cost_estimate(&self) -> usize {
        1
    }

    fn variable_columns(&self) -> &VariableColumns {
        &self.var_columns
    }

    fn result_sorted_on(&self) -> &[usize] {
        &[]
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        Vec::new()
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let mut table = IdTable::new(0, ctx.budget());
        table.push_row(&[])?;
        Ok(ResultTable::freeze(table, Vec::new(), LocalVocab::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use std::sync::Arc;
    use tern_core::MemoryIndex;

    #[tokio::test]
    async fn test_single_empty_row() {
        let ctx = ExecutionContext::new(
            Arc::new(MemoryIndex::builder().build()),
            Arc::new(ResultCache::new(100, 100, 10)),
            &EngineConfig::default(),
        )
        .unwrap();
        let tree = ExecutionTree::new(NeutralElement::new());
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 1);
        assert_eq!(result.table.width(), 0);
    }
}
