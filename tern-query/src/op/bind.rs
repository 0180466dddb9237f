//! BIND: append a computed column.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::expression::{EvaluationContext, Expression, Value};
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{Id, IdTable, ResultTable};

/// Evaluates an expression per row and appends the result as a new
/// column bound to the given variable.
#[derive(Debug)]
pub struct Bind {
    child: ExecutionTree,
    variable: Variable,
    expr: Expression,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
}

impl Bind {
    pub fn new(child: ExecutionTree, variable: Variable, expr: Expression) -> Self {
        let mut var_columns = child.variable_columns().clone();
        var_columns.insert(variable.clone(), child.width());
        // Appending a column keeps the existing prefix guarantee.
        let sorted_on = child.result_sorted_on().to_vec();
        Self {
            child,
            variable,
            expr,
            var_columns,
            sorted_on,
        }
    }

    /// The variable the computed column is bound to.
    pub fn variable(&self) -> &Variable {
        &self.variable
    }
}

#[async_trait]
impl Operation for Bind {
    fn name(&self) -> &'static str {
        "Bind"
    }

    fn cache_key(&self) -> String {
        format!(
            "BIND {} [{}]",
            self.expr.cache_key(self.child.variable_columns()),
            self.child.cache_key()
        )
    }

    fn estimated_size(&self) -> usize {
        self.child.estimated_size()
    }

    fn cost_estimate(&self) -> usize {
        self.child.cost_estimate() + self.child.estimated_size()
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
        let eval_ctx =
            EvaluationContext::over_table(table, child_vars, ctx.budget(), ctx.deadline());
        let computed = self.expr.evaluate(&eval_ctx)?;

        let mut vocab = table.local_vocab().clone();
        let width = table.width() + 1;
        let mut out = IdTable::new(width, ctx.budget());
        let mut row = vec![Id::UNDEFINED; width];
        for r in 0..table.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            for c in 0..table.width() {
                row[c] = table.at(r, c);
            }
            row[width - 1] = match computed.value_at(&eval_ctx, r) {
                Value::Id(id) => id,
                Value::Int(v) => Id::from_int(v),
                Value::Double(v) => Id::from_double(v),
                Value::Bool(v) => Id::from_bool(v),
                Value::Str(s) => vocab.intern(&s),
            };
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
    use crate::expression::BinaryOp;
    use crate::ir::{ValueTerm, ValuesClause};
    use crate::op::values::Values;
    use std::sync::Arc;
    use tern_core::MemoryIndex;

    #[tokio::test]
    async fn test_bind_appends_column() {
        let ctx = ExecutionContext::new(
            Arc::new(MemoryIndex::builder().build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap();
        let clause = ValuesClause {
            variables: vec![Variable::new("?x")],
            rows: vec![
                vec![Some(ValueTerm::Int(1))],
                vec![Some(ValueTerm::Int(2))],
            ],
        };
        let child = ExecutionTree::new(Values::new(&ctx, clause));
        let bind = Bind::new(
            child,
            Variable::new("?y"),
            Expression::binary(
                BinaryOp::Mul,
                Expression::variable("?x"),
                Expression::int(10),
            ),
        );
        assert_eq!(bind.variable_columns().get(&Variable::new("?y")), Some(1));

        let tree = ExecutionTree::new(bind);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.at(0, 1), Id::from_int(10));
        assert_eq!(result.table.at(1, 1), Id::from_int(20));
    }
}
