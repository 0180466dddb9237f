//! MINUS join.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use rustc_hash::FxHashSet;
use tern_core::{Id, IdTable, ResultTable};

/// Anti-join: keeps the left rows that have no partner in the right
/// input on the shared variables. With no shared variables MINUS removes
/// nothing, so the planner drops such children before building this
/// operator.
#[derive(Debug)]
pub struct MinusJoin {
    left: ExecutionTree,
    right: ExecutionTree,
    /// `(left column, right column)` pairs over the shared variables.
    join_cols: Vec<(usize, usize)>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
}

impl MinusJoin {
    pub fn new(left: ExecutionTree, right: ExecutionTree, join_cols: Vec<(usize, usize)>) -> Self {
        debug_assert!(!join_cols.is_empty());
        let var_columns = left.variable_columns().clone();
        let sorted_on = left.result_sorted_on().to_vec();
        Self {
            left,
            right,
            join_cols,
            var_columns,
            sorted_on,
        }
    }
}

#[async_trait]
impl Operation for MinusJoin {
    fn name(&self) -> &'static str {
        "MinusJoin"
    }

    fn cache_key(&self) -> String {
        let cols: Vec<String> = self
            .join_cols
            .iter()
            .map(|(l, r)| format!("{l}={r}"))
            .collect();
        format!(
            "MINUS_JOIN on ({}) [{}] [{}]",
            cols.join(","),
            self.left.cache_key(),
            self.right.cache_key()
        )
    }

    fn estimated_size(&self) -> usize {
        self.left.estimated_size()
    }

    fn cost_estimate(&self) -> usize {
        self.left.cost_estimate()
            + self.right.cost_estimate()
            + self.left.estimated_size()
            + self.right.estimated_size()
    }

    fn variable_columns(&self) -> &VariableColumns {
        &self.var_columns
    }

    fn result_sorted_on(&self) -> &[usize] {
        &self.sorted_on
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        vec![&self.left, &self.right]
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let left = self.left.get_result(ctx).await?;
        let right = self.right.get_result(ctx).await?;
        let (lt, rt) = (&*left.table, &*right.table);

        let mut charge = ctx.budget().open_charge();
        let mut excluded: FxHashSet<Vec<Id>> = FxHashSet::default();
        for rj in 0..rt.num_rows() {
            if rj % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let key: Vec<Id> = self.join_cols.iter().map(|&(_, r)| rt.at(rj, r)).collect();
            if key.iter().any(|id| id.is_undefined()) {
                continue;
            }
            charge.grow(std::mem::size_of::<Id>() * key.len() + 16)?;
            excluded.insert(key);
        }

        let mut out = IdTable::new(lt.width(), ctx.budget());
        let mut key = Vec::with_capacity(self.join_cols.len());
        for li in 0..lt.num_rows() {
            if li % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            key.clear();
            key.extend(self.join_cols.iter().map(|&(l, _)| lt.at(li, l)));
            // A left row with an unbound shared variable is never
            // excluded.
            let drop = !key.iter().any(|id| id.is_undefined()) && excluded.contains(&key);
            if !drop {
                out.push_row(&lt.row(li))?;
            }
        }
        Ok(ResultTable::freeze(
            out,
            self.sorted_on.clone(),
            lt.local_vocab().clone(),
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

    #[tokio::test]
    async fn test_minus_removes_matches() {
        let ctx = ExecutionContext::new(
            Arc::new(MemoryIndex::builder().build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap();
        let mk = |values: &[i64]| {
            ExecutionTree::new(Values::new(
                &ctx,
                ValuesClause {
                    variables: vec![Variable::new("?x")],
                    rows: values
                        .iter()
                        .map(|&v| vec![Some(ValueTerm::Int(v))])
                        .collect(),
                },
            ))
        };
        let tree = ExecutionTree::new(MinusJoin::new(
            mk(&[1, 2, 3]),
            mk(&[2]),
            vec![(0, 0)],
        ));
        let result = tree.get_result(&ctx).await.unwrap();
        let got: Vec<i64> = (0..result.table.num_rows())
            .map(|r| result.table.at(r, 0).as_int().unwrap())
            .collect();
        assert_eq!(got, vec![1, 3]);
    }
}
