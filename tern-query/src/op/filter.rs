//! Row filtering by a boolean expression.

use crate::context::ExecutionContext;
use crate::cost::FILTER_COST_FACTOR;
use crate::error::Result;
use crate::expression::{EvaluationContext, Expression, ExpressionResult};
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{IdTable, ResultTable};

/// Keeps the rows on which the expression evaluates to true. Preserves
/// the input order and therefore the input's sort guarantee.
#[derive(Debug)]
pub struct Filter {
    child: ExecutionTree,
    expr: Expression,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    size_estimate: usize,
    cost_estimate: usize,
}

impl Filter {
    pub fn new(ctx: &ExecutionContext, child: ExecutionTree, expr: Expression) -> Self {
        let var_columns = child.variable_columns().clone();
        let sorted_on = child.result_sorted_on().to_vec();
        // Selectivity guess: a filter halves its input.
        let size_estimate = child.estimated_size() / 2;
        let cost_estimate = child.cost_estimate()
            + (child.estimated_size() as f64 * ctx.cost_factor(FILTER_COST_FACTOR)).ceil()
                as usize;
        Self {
            child,
            expr,
            var_columns,
            sorted_on,
            size_estimate,
            cost_estimate,
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expr
    }
}

#[async_trait]
impl Operation for Filter {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn cache_key(&self) -> String {
        format!(
            "FILTER {} [{}]",
            self.expr.cache_key(&self.var_columns),
            self.child.cache_key()
        )
    }

    fn estimated_size(&self) -> usize {
        self.size_estimate
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
        let eval_ctx = EvaluationContext::over_table(
            table,
            &self.var_columns,
            ctx.budget(),
            ctx.deadline(),
        );
        let verdict = self.expr.evaluate(&eval_ctx)?;

        let mut out = IdTable::new(table.width(), ctx.budget());
        match &verdict {
            // Interval results enumerate the kept rows directly.
            ExpressionResult::Intervals(set) => {
                for (i, r) in set.iter_rows().enumerate() {
                    if i % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    out.push_row(&table.row(r))?;
                }
            }
            other => {
                for r in 0..table.num_rows() {
                    if r % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    if other.truthy_at(&eval_ctx, r) {
                        out.push_row(&table.row(r))?;
                    }
                }
            }
        }
        Ok(ResultTable::freeze(
            out,
            self.sorted_on.clone(),
            table.local_vocab().clone(),
        ))
    }
}
