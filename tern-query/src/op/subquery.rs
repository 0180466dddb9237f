//! Subquery projection.

use crate::context::ExecutionContext;
use crate::error::{QueryError, Result};
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{Id, IdTable, ResultTable};

/// Projects an inner query's result onto its selected variables, hiding
/// every internal column from the surrounding query.
#[derive(Debug)]
pub struct Subquery {
    inner: ExecutionTree,
    /// Source column in the inner result for each output column.
    source_cols: Vec<usize>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
}

impl Subquery {
    pub fn new(inner: ExecutionTree, selected: Vec<Variable>) -> Result<Self> {
        let mut source_cols = Vec::with_capacity(selected.len());
        for var in &selected {
            let col = inner.column_of(var).ok_or_else(|| {
                QueryError::Planning(format!(
                    "subquery selects {var}, which its body does not bind"
                ))
            })?;
            source_cols.push(col);
        }
        // The inner sort guarantee survives as long as its leading
        // columns are kept, in order, at the front of the projection.
        let mut sorted_on = Vec::new();
        for &inner_col in inner.result_sorted_on() {
            match source_cols.iter().position(|&c| c == inner_col) {
                Some(out_col) if out_col == sorted_on.len() => sorted_on.push(out_col),
                _ => break,
            }
        }
        let var_columns = VariableColumns::from_ordered(selected);
        Ok(Self {
            inner,
            source_cols,
            var_columns,
            sorted_on,
        })
    }
}

#[async_trait]
impl Operation for Subquery {
    fn name(&self) -> &'static str {
        "Subquery"
    }

    fn cache_key(&self) -> String {
        let cols: Vec<String> = self.source_cols.iter().map(|c| c.to_string()).collect();
        format!("SUBQUERY cols=[{}] [{}]", cols.join(","), self.inner.cache_key())
    }

    fn estimated_size(&self) -> usize {
        self.inner.estimated_size()
    }

    fn cost_estimate(&self) -> usize {
        self.inner.cost_estimate() + self.inner.estimated_size()
    }

    fn variable_columns(&self) -> &VariableColumns {
        &self.var_columns
    }

    fn result_sorted_on(&self) -> &[usize] {
        &self.sorted_on
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        vec![&self.inner]
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let input = self.inner.get_result(ctx).await?;
        let table = &*input.table;
        let mut out = IdTable::new(self.source_cols.len(), ctx.budget());
        out.reserve(table.num_rows());
        let mut row = vec![Id::UNDEFINED; self.source_cols.len()];
        for r in 0..table.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            for (i, &c) in self.source_cols.iter().enumerate() {
                row[i] = table.at(r, c);
            }
            out.push_row(&row)?;
        }
        Ok(ResultTable::freeze(
            out,
            self.sorted_on.clone(),
            table.local_vocab().clone(),
        ))
    }
}
