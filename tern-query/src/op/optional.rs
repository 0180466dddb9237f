//! OPTIONAL join.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tern_core::{Id, IdTable, ResultTable};

/// Left outer join on the shared variables. Left rows without a partner
/// survive with the right-only columns unbound. The left row order is
/// preserved, so the left sort guarantee carries over.
#[derive(Debug)]
pub struct OptionalJoin {
    left: ExecutionTree,
    right: ExecutionTree,
    /// `(left column, right column)` pairs over the shared variables.
    join_cols: Vec<(usize, usize)>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
}

impl OptionalJoin {
    pub fn new(left: ExecutionTree, right: ExecutionTree, join_cols: Vec<(usize, usize)>) -> Self {
        let dropped: Vec<usize> = join_cols.iter().map(|&(_, r)| r).collect();
        let left_width = left.width();
        let mut var_columns = VariableColumns::new();
        for (var, col) in left.variable_columns().iter() {
            var_columns.insert(var.clone(), col);
        }
        for (var, col) in right.variable_columns().iter() {
            if dropped.contains(&col) {
                continue;
            }
            let shift = dropped.iter().filter(|&&d| d < col).count();
            var_columns.insert(var.clone(), left_width + col - shift);
        }
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
impl Operation for OptionalJoin {
    fn name(&self) -> &'static str {
        "OptionalJoin"
    }

    fn cache_key(&self) -> String {
        let cols: Vec<String> = self
            .join_cols
            .iter()
            .map(|(l, r)| format!("{l}={r}"))
            .collect();
        format!(
            "OPTIONAL_JOIN on ({}) [{}] [{}]",
            cols.join(","),
            self.left.cache_key(),
            self.right.cache_key()
        )
    }

    fn estimated_size(&self) -> usize {
        // Every left row survives at least once.
        self.left
            .estimated_size()
            .max(self.left.estimated_size().min(self.right.estimated_size()))
    }

    fn cost_estimate(&self) -> usize {
        self.left.cost_estimate()
            + self.right.cost_estimate()
            + self.left.estimated_size()
            + 2 * self.right.estimated_size()
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
        let (vocab, remap) = super::merge_vocabs(lt, rt);

        let mut charge = ctx.budget().open_charge();
        let mut by_key: FxHashMap<Vec<Id>, Vec<usize>> = FxHashMap::default();
        for rj in 0..rt.num_rows() {
            if rj % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let key: Vec<Id> = self.join_cols.iter().map(|&(_, r)| rt.at(rj, r)).collect();
            if key.iter().any(|id| id.is_undefined()) {
                continue;
            }
            charge.grow(std::mem::size_of::<Id>() * key.len() + std::mem::size_of::<usize>())?;
            by_key.entry(key).or_default().push(rj);
        }

        let dropped: Vec<usize> = self.join_cols.iter().map(|&(_, r)| r).collect();
        let left_width = lt.width();
        let width = self.var_columns.len();
        let mut out = IdTable::new(width, ctx.budget());
        let mut row = vec![Id::UNDEFINED; width];
        let mut key = Vec::with_capacity(self.join_cols.len());

        for li in 0..lt.num_rows() {
            if li % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            for c in 0..left_width {
                row[c] = lt.at(li, c);
            }
            key.clear();
            key.extend(self.join_cols.iter().map(|&(l, _)| lt.at(li, l)));
            let matches = if key.iter().any(|id| id.is_undefined()) {
                None
            } else {
                by_key.get(&key)
            };
            match matches {
                Some(partners) => {
                    for &rj in partners {
                        let mut outc = left_width;
                        for c in 0..rt.width() {
                            if dropped.contains(&c) {
                                continue;
                            }
                            row[outc] = super::remap_id(rt.at(rj, c), remap.as_ref());
                            outc += 1;
                        }
                        out.push_row(&row)?;
                    }
                }
                None => {
                    for slot in row.iter_mut().take(width).skip(left_width) {
                        *slot = Id::UNDEFINED;
                    }
                    out.push_row(&row)?;
                }
            }
        }
        Ok(ResultTable::freeze(out, self.sorted_on.clone(), vocab))
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

    fn pairs(ctx: &ExecutionContext, vars: (&str, &str), rows: &[(i64, i64)]) -> ExecutionTree {
        let clause = ValuesClause {
            variables: vec![Variable::new(vars.0), Variable::new(vars.1)],
            rows: rows
                .iter()
                .map(|&(a, b)| vec![Some(ValueTerm::Int(a)), Some(ValueTerm::Int(b))])
                .collect(),
        };
        ExecutionTree::new(Values::new(ctx, clause))
    }

    #[tokio::test]
    async fn test_optional_pads_missing_matches() {
        let ctx = test_ctx();
        let left = pairs(&ctx, ("?x", "?a"), &[(1, 10), (2, 20)]);
        let right = pairs(&ctx, ("?x", "?b"), &[(1, 100)]);
        let tree = ExecutionTree::new(OptionalJoin::new(left, right, vec![(0, 0)]));
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 2);
        // x=1 found a partner.
        assert_eq!(result.table.at(0, 2), Id::from_int(100));
        // x=2 did not; ?b is unbound.
        assert_eq!(result.table.at(1, 0), Id::from_int(2));
        assert!(result.table.at(1, 2).is_undefined());
    }
}
