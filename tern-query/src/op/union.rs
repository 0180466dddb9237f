//! UNION of two subtrees.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{Id, IdTable, ResultTable};

/// Concatenates two inputs, aligning columns by variable. The output
/// columns are the left input's variables followed by the variables only
/// the right input binds; positions a side does not bind are unbound.
#[derive(Debug)]
pub struct Union {
    left: ExecutionTree,
    right: ExecutionTree,
    var_columns: VariableColumns,
    /// For each output column: the source column in the left / right
    /// input, if bound there.
    left_source: Vec<Option<usize>>,
    right_source: Vec<Option<usize>>,
}

impl Union {
    pub fn new(left: ExecutionTree, right: ExecutionTree) -> Self {
        let mut output_vars: Vec<crate::ir::Variable> = left
            .variable_columns()
            .by_column()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        for (_, var) in right.variable_columns().by_column() {
            if !output_vars.contains(&var) {
                output_vars.push(var);
            }
        }
        let left_source: Vec<Option<usize>> = output_vars
            .iter()
            .map(|v| left.variable_columns().get(v))
            .collect();
        let right_source: Vec<Option<usize>> = output_vars
            .iter()
            .map(|v| right.variable_columns().get(v))
            .collect();
        let var_columns = VariableColumns::from_ordered(output_vars);
        Self {
            left,
            right,
            var_columns,
            left_source,
            right_source,
        }
    }
}

#[async_trait]
impl Operation for Union {
    fn name(&self) -> &'static str {
        "Union"
    }

    fn cache_key(&self) -> String {
        // The column alignment depends on which variables the two sides
        // share, which the child keys alone do not capture.
        let fmt_sources = |sources: &[Option<usize>]| {
            let cells: Vec<String> = sources
                .iter()
                .map(|s| s.map_or_else(|| "u".to_owned(), |c| c.to_string()))
                .collect();
            cells.join(",")
        };
        format!(
            "UNION l=[{}] r=[{}] [{}] [{}]",
            fmt_sources(&self.left_source),
            fmt_sources(&self.right_source),
            self.left.cache_key(),
            self.right.cache_key()
        )
    }

    fn estimated_size(&self) -> usize {
        self.left.estimated_size() + self.right.estimated_size()
    }

    fn cost_estimate(&self) -> usize {
        self.left.cost_estimate() + self.right.cost_estimate() + self.estimated_size()
    }

    fn variable_columns(&self) -> &VariableColumns {
        &self.var_columns
    }

    fn result_sorted_on(&self) -> &[usize] {
        &[]
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        vec![&self.left, &self.right]
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let left = self.left.get_result(ctx).await?;
        let right = self.right.get_result(ctx).await?;
        let (lt, rt) = (&*left.table, &*right.table);
        let (vocab, remap) = super::merge_vocabs(lt, rt);

        let width = self.var_columns.len();
        let mut out = IdTable::new(width, ctx.budget());
        out.reserve(lt.num_rows() + rt.num_rows());
        let mut row = vec![Id::UNDEFINED; width];

        for r in 0..lt.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            for (c, source) in self.left_source.iter().enumerate() {
                row[c] = source.map_or(Id::UNDEFINED, |s| lt.at(r, s));
            }
            out.push_row(&row)?;
        }
        for r in 0..rt.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            for (c, source) in self.right_source.iter().enumerate() {
                row[c] = source.map_or(Id::UNDEFINED, |s| {
                    super::remap_id(rt.at(r, s), remap.as_ref())
                });
            }
            out.push_row(&row)?;
        }
        Ok(ResultTable::freeze(out, Vec::new(), vocab))
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
    async fn test_union_aligns_columns() {
        let ctx = ExecutionContext::new(
            Arc::new(MemoryIndex::builder().build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap();
        let left = ExecutionTree::new(Values::new(
            &ctx,
            ValuesClause {
                variables: vec![Variable::new("?x")],
                rows: vec![vec![Some(ValueTerm::Int(1))]],
            },
        ));
        let right = ExecutionTree::new(Values::new(
            &ctx,
            ValuesClause {
                variables: vec![Variable::new("?x"), Variable::new("?y")],
                rows: vec![vec![Some(ValueTerm::Int(2)), Some(ValueTerm::Int(9))]],
            },
        ));
        let union = Union::new(left, right);
        assert_eq!(union.variable_columns().len(), 2);

        let tree = ExecutionTree::new(union);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 2);
        assert_eq!(result.table.at(0, 0), Id::from_int(1));
        assert!(result.table.at(0, 1).is_undefined());
        assert_eq!(result.table.at(1, 0), Id::from_int(2));
        assert_eq!(result.table.at(1, 1), Id::from_int(9));
    }
}
