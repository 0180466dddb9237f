//! Duplicate elimination.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use rustc_hash::FxHashSet;
use tern_core::{Id, IdTable, ResultTable};

/// Removes rows whose values on `compare_cols` were seen before. The
/// first occurrence wins, so the input order (and sort guarantee) is
/// preserved.
#[derive(Debug)]
pub struct Distinct {
    child: ExecutionTree,
    compare_cols: Vec<usize>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    cost_estimate: usize,
}

impl Distinct {
    pub fn new(child: ExecutionTree, compare_cols: Vec<usize>) -> Self {
        let var_columns = child.variable_columns().clone();
        let sorted_on = child.result_sorted_on().to_vec();
        let cost_estimate = child.cost_estimate() + child.estimated_size();
        Self {
            child,
            compare_cols,
            var_columns,
            sorted_on,
            cost_estimate,
        }
    }
}

#[async_trait]
impl Operation for Distinct {
    fn name(&self) -> &'static str {
        "Distinct"
    }

    fn cache_key(&self) -> String {
        let cols: Vec<String> = self.compare_cols.iter().map(|c| c.to_string()).collect();
        format!("DISTINCT on [{}] [{}]", cols.join(","), self.child.cache_key())
    }

    fn estimated_size(&self) -> usize {
        self.child.estimated_size()
    }

    fn cost_estimate(&self) -> usize {
        self.cost_estimate
    }

    fn variable_columns(&self) -> &VariableColumns {
        &self.var_columns
    }

    fn result_sorted_on(&self) -> &[usize] {
        &self.sorted_on
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        vec![&self.child]
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let input = self.child.get_result(ctx).await?;
        let table = &*input.table;

        let mut charge = ctx.budget().open_charge();
        let mut seen: FxHashSet<Vec<Id>> = FxHashSet::default();
        let mut out = IdTable::new(table.width(), ctx.budget());
        for r in 0..table.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let key: Vec<Id> = self.compare_cols.iter().map(|&c| table.at(r, c)).collect();
            if seen.contains(&key) {
                continue;
            }
            charge.grow(std::mem::size_of::<Id>() * key.len() + 16)?;
            seen.insert(key);
            out.push_row(&table.row(r))?;
        }
        Ok(ResultTable::freeze(
            out,
            self.sorted_on.clone(),
            table.local_vocab().clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use crate::ir::{ValueTerm, ValuesClause, Variable};
    use crate::op::values::Values;
    use std::sync::Arc;
    use tern_core::MemoryIndex;

    fn test_ctx() -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(MemoryIndex::builder().build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn rows(ctx: &ExecutionContext, values: &[i64]) -> ExecutionTree {
        let clause = ValuesClause {
            variables: vec![Variable::new("?x")],
            rows: values
                .iter()
                .map(|&v| vec![Some(ValueTerm::Int(v))])
                .collect(),
        };
        ExecutionTree::new(Values::new(ctx, clause))
    }

    #[tokio::test]
    async fn test_distinct_removes_duplicates() {
        let ctx = test_ctx();
        let tree = ExecutionTree::new(Distinct::new(rows(&ctx, &[2, 1, 2, 3, 1]), vec![0]));
        let result = tree.get_result(&ctx).await.unwrap();
        let got: Vec<i64> = (0..result.table.num_rows())
            .map(|r| result.table.at(r, 0).as_int().unwrap())
            .collect();
        assert_eq!(got, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_distinct_is_idempotent() {
        let ctx = test_ctx();
        let once = ExecutionTree::new(Distinct::new(rows(&ctx, &[1, 1, 2]), vec![0]));
        let twice = ExecutionTree::new(Distinct::new(once.clone(), vec![0]));
        let a = once.get_result(&ctx).await.unwrap();
        let b = twice.get_result(&ctx).await.unwrap();
        assert_eq!(a.table.num_rows(), b.table.num_rows());
        for r in 0..a.table.num_rows() {
            assert_eq!(a.table.at(r, 0), b.table.at(r, 0));
        }
    }
}
