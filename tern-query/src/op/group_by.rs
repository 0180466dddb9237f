//! GROUP BY with aggregate aliases.

use crate::context::ExecutionContext;
use crate::error::{QueryError, Result};
use crate::expression::{EvaluationContext, Expression, ExpressionResult, Value};
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{Id, IdTable, ResultTable};

/// Partitions the input by the group variables and evaluates one
/// expression per alias over each block. The output columns are the
/// group variables (in clause order) followed by the alias variables.
///
/// With no group variables the whole input forms one implicit group, so
/// `COUNT` over an empty input still produces a row.
#[derive(Debug)]
pub struct GroupBy {
    child: ExecutionTree,
    group_vars: Vec<Variable>,
    aliases: Vec<(Expression, Variable)>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
}

impl GroupBy {
    pub fn new(
        child: ExecutionTree,
        group_vars: Vec<Variable>,
        aliases: Vec<(Expression, Variable)>,
    ) -> Result<Self> {
        for var in &group_vars {
            if child.column_of(var).is_none() {
                return Err(QueryError::Planning(format!(
                    "GROUP BY variable {var} is not bound by the input"
                )));
            }
        }
        // An alias must be an aggregate or only reference group keys.
        for (expr, var) in &aliases {
            if !expr.contains_aggregate() {
                for used in expr.unaggregated_variables() {
                    if !group_vars.contains(&used) {
                        return Err(QueryError::Planning(format!(
                            "alias for {var} uses ungrouped variable {used} outside an aggregate"
                        )));
                    }
                }
            }
        }
        let mut output_vars = group_vars.clone();
        output_vars.extend(aliases.iter().map(|(_, v)| v.clone()));
        let var_columns = VariableColumns::from_ordered(output_vars);
        let sorted_on: Vec<usize> = (0..group_vars.len()).collect();
        Ok(Self {
            child,
            group_vars,
            aliases,
            var_columns,
            sorted_on,
        })
    }
}

#[async_trait]
impl Operation for GroupBy {
    fn name(&self) -> &'static str {
        "GroupBy"
    }

    fn cache_key(&self) -> String {
        let child_vars = self.child.variable_columns();
        let group_cols: Vec<String> = self
            .group_vars
            .iter()
            .map(|v| child_vars.get(v).map_or_else(|| "?".into(), |c| c.to_string()))
            .collect();
        let aliases: Vec<String> = self
            .aliases
            .iter()
            .map(|(e, _)| e.cache_key(child_vars))
            .collect();
        format!(
            "GROUP_BY cols=[{}] aliases=[{}] [{}]",
            group_cols.join(","),
            aliases.join(";"),
            self.child.cache_key()
        )
    }

    fn estimated_size(&self) -> usize {
        if self.group_vars.is_empty() {
            1
        } else {
            (self.child.estimated_size() / 4).max(1)
        }
    }

    fn cost_estimate(&self) -> usize {
        self.child.cost_estimate() + 2 * self.child.estimated_size()
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
        let child_vars = self.child.variable_columns();
        let group_cols: Vec<usize> = self
            .group_vars
            .iter()
            .map(|v| child_vars.get(v).expect("validated at construction"))
            .collect();

        // Sort rows by the group columns so blocks are contiguous.
        let mut perm: Vec<usize> = (0..table.num_rows()).collect();
        perm.sort_by(|&a, &b| {
            for &c in &group_cols {
                let ord = table.at(a, c).cmp(&table.at(b, c));
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        let mut sorted = IdTable::new(table.width(), ctx.budget());
        sorted.reserve(table.num_rows());
        for (i, &r) in perm.iter().enumerate() {
            if i % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            sorted.push_row(&table.row(r))?;
        }
        let sorted = ResultTable::freeze(sorted, group_cols.clone(), table.local_vocab().clone());

        let mut vocab = sorted.local_vocab().clone();
        let width = self.var_columns.len();
        let mut out = IdTable::new(width, ctx.budget());
        let mut row = vec![Id::UNDEFINED; width];

        // Block boundaries over the sorted input. With no group
        // variables the whole input (possibly empty) is one block.
        let mut blocks: Vec<(usize, usize)> = Vec::new();
        if self.group_vars.is_empty() {
            blocks.push((0, sorted.num_rows()));
        } else if sorted.num_rows() > 0 {
            let mut begin = 0;
            for r in 1..=sorted.num_rows() {
                let boundary = r == sorted.num_rows()
                    || group_cols
                        .iter()
                        .any(|&c| sorted.at(r, c) != sorted.at(begin, c));
                if boundary {
                    blocks.push((begin, r));
                    begin = r;
                }
            }
        }

        for (begin, end) in blocks {
            ctx.check_deadline()?;
            let block_ctx = EvaluationContext {
                table: &sorted,
                var_columns: child_vars,
                begin,
                end,
                budget: ctx.budget(),
                deadline: ctx.deadline(),
            };
            for (i, &c) in group_cols.iter().enumerate() {
                row[i] = sorted.at(begin, c);
            }
            for (i, (expr, _)) in self.aliases.iter().enumerate() {
                let value = match expr.evaluate(&block_ctx)? {
                    ExpressionResult::Constant(v) => v,
                    other if end > begin => other.value_at(&block_ctx, 0),
                    _ => Value::UNDEF,
                };
                row[group_cols.len() + i] = match value {
                    Value::Id(id) => id,
                    Value::Int(v) => Id::from_int(v),
                    Value::Double(v) => Id::from_double(v),
                    Value::Bool(v) => Id::from_bool(v),
                    Value::Str(s) => vocab.intern(&s),
                };
            }
            out.push_row(&row)?;
        }
        Ok(ResultTable::freeze(out, self.sorted_on.clone(), vocab))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use crate::expression::AggregateKind;
    use crate::ir::{ValueTerm, ValuesClause};
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

    fn grouped_input(ctx: &ExecutionContext) -> ExecutionTree {
        // (g, v): (1,10) (1,20) (2,30)
        ExecutionTree::new(Values::new(
            ctx,
            ValuesClause {
                variables: vec![Variable::new("?g"), Variable::new("?v")],
                rows: vec![
                    vec![Some(ValueTerm::Int(1)), Some(ValueTerm::Int(10))],
                    vec![Some(ValueTerm::Int(2)), Some(ValueTerm::Int(30))],
                    vec![Some(ValueTerm::Int(1)), Some(ValueTerm::Int(20))],
                ],
            },
        ))
    }

    #[tokio::test]
    async fn test_group_by_sum() {
        let ctx = test_ctx();
        let group_by = GroupBy::new(
            grouped_input(&ctx),
            vec![Variable::new("?g")],
            vec![(
                Expression::aggregate(AggregateKind::Sum, false, Expression::variable("?v")),
                Variable::new("?sum"),
            )],
        )
        .unwrap();
        let tree = ExecutionTree::new(group_by);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 2);
        assert_eq!(result.table.at(0, 0), Id::from_int(1));
        assert_eq!(result.table.at(0, 1), Id::from_int(30));
        assert_eq!(result.table.at(1, 0), Id::from_int(2));
        assert_eq!(result.table.at(1, 1), Id::from_int(30));
    }

    #[tokio::test]
    async fn test_implicit_group_over_empty_input() {
        let ctx = test_ctx();
        let empty = ExecutionTree::new(Values::new(
            &ctx,
            ValuesClause {
                variables: vec![Variable::new("?v")],
                rows: vec![],
            },
        ));
        let group_by = GroupBy::new(
            empty,
            vec![],
            vec![
                (
                    Expression::aggregate(
                        AggregateKind::Count,
                        false,
                        Expression::variable("?v"),
                    ),
                    Variable::new("?c"),
                ),
                (
                    Expression::aggregate(AggregateKind::Avg, false, Expression::variable("?v")),
                    Variable::new("?avg"),
                ),
            ],
        )
        .unwrap();
        let tree = ExecutionTree::new(group_by);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 1);
        assert_eq!(result.table.at(0, 0), Id::from_int(0));
        assert!(result.table.at(0, 1).is_undefined());
    }

    #[test]
    fn test_ungrouped_variable_rejected() {
        let ctx = test_ctx();
        let err = GroupBy::new(
            grouped_input(&ctx),
            vec![Variable::new("?g")],
            vec![(Expression::variable("?v"), Variable::new("?broken"))],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Planning(_)));
    }
}
