//! Sorting operators: single-column [`Sort`] and multi-key [`OrderBy`].

use crate::context::ExecutionContext;
use crate::cost::SORT_COST_FACTOR;
use crate::error::Result;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{IdTable, ResultTable};

/// Wrap `tree` in a [`Sort`] if its result is not already sorted on
/// `col` as the leading key.
pub fn ensure_sorted_on(ctx: &ExecutionContext, tree: ExecutionTree, col: usize) -> ExecutionTree {
    if tree.result_sorted_on().first() == Some(&col) {
        return tree;
    }
    ExecutionTree::new(Sort::new(ctx, tree, col))
}

fn sort_cost(ctx: &ExecutionContext, rows: usize) -> usize {
    (ctx.sort_cost().cost(rows) as f64 * ctx.cost_factor(SORT_COST_FACTOR)).ceil() as usize
}

/// Stable sort of the input on one column.
#[derive(Debug)]
pub struct Sort {
    child: ExecutionTree,
    col: usize,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    cost_estimate: usize,
}

impl Sort {
    pub fn new(ctx: &ExecutionContext, child: ExecutionTree, col: usize) -> Self {
        let var_columns = child.variable_columns().clone();
        let cost_estimate = child.cost_estimate() + sort_cost(ctx, child.estimated_size());
        Self {
            child,
            col,
            var_columns,
            sorted_on: vec![col],
            cost_estimate,
        }
    }
}

#[async_trait]
impl Operation for Sort {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn cache_key(&self) -> String {
        format!("SORT on {} [{}]", self.col, self.child.cache_key())
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
        ctx.check_deadline()?;

        let mut perm: Vec<usize> = (0..table.num_rows()).collect();
        perm.sort_by_key(|&r| table.at(r, self.col));

        let mut out = IdTable::new(table.width(), ctx.budget());
        out.reserve(table.num_rows());
        for (i, &r) in perm.iter().enumerate() {
            if i % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            out.push_row(&table.row(r))?;
        }
        Ok(ResultTable::freeze(
            out,
            self.sorted_on.clone(),
            table.local_vocab().clone(),
        ))
    }
}

/// One ORDER BY key: a column and its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub col: usize,
    pub descending: bool,
}

/// Stable multi-key sort.
#[derive(Debug)]
pub struct OrderBy {
    child: ExecutionTree,
    keys: Vec<SortKey>,
    var_columns: VariableColumns,
    /// Only the leading ascending keys are a sort *guarantee*; a
    /// descending key ends the prefix.
    sorted_on: Vec<usize>,
    cost_estimate: usize,
}

impl OrderBy {
    pub fn new(ctx: &ExecutionContext, child: ExecutionTree, keys: Vec<SortKey>) -> Self {
        let var_columns = child.variable_columns().clone();
        let sorted_on: Vec<usize> = keys
            .iter()
            .take_while(|k| !k.descending)
            .map(|k| k.col)
            .collect();
        let cost_estimate = child.cost_estimate() + sort_cost(ctx, child.estimated_size());
        Self {
            child,
            keys,
            var_columns,
            sorted_on,
            cost_estimate,
        }
    }
}

#[async_trait]
impl Operation for OrderBy {
    fn name(&self) -> &'static str {
        "OrderBy"
    }

    fn cache_key(&self) -> String {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|k| format!("{}{}", k.col, if k.descending { "d" } else { "a" }))
            .collect();
        format!("ORDER_BY [{}] [{}]", keys.join(","), self.child.cache_key())
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
        ctx.check_deadline()?;

        let mut perm: Vec<usize> = (0..table.num_rows()).collect();
        perm.sort_by(|&a, &b| {
            for key in &self.keys {
                let ord = table.at(a, key.col).cmp(&table.at(b, key.col));
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        let mut out = IdTable::new(table.width(), ctx.budget());
        out.reserve(table.num_rows());
        for (i, &r) in perm.iter().enumerate() {
            if i % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            out.push_row(&table.row(r))?;
        }
        Ok(ResultTable::freeze(
            out,
            self.sorted_on.clone(),
            table.local_vocab().clone(),
        ))
    }
}
