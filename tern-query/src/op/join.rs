//! Join operators: sort-merge on a single column and hash join on
//! multiple columns.

use crate::context::ExecutionContext;
use crate::cost::{HASH_JOIN_SIZE_FACTOR, JOIN_SIZE_FACTOR};
use crate::error::Result;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tern_core::{Id, IdTable, ResultTable};

/// Heuristic join cardinality: the two inputs share a key column, so the
/// smaller side bounds the expectation.
fn join_size_estimate(left: usize, right: usize, factor: f64) -> usize {
    if left == 0 || right == 0 {
        return 0;
    }
    let base = (left * right) / left.max(right);
    ((base.max(1)) as f64 * factor).ceil() as usize
}

/// Output variable map for a join of `left` and `right` eliminating the
/// given right-side columns (which are bound by the left side already).
fn joined_var_columns(
    left: &ExecutionTree,
    right: &ExecutionTree,
    dropped_right: &[usize],
) -> VariableColumns {
    let left_width = left.width();
    let mut vars = VariableColumns::new();
    for (var, col) in left.variable_columns().iter() {
        vars.insert(var.clone(), col);
    }
    for (var, col) in right.variable_columns().iter() {
        if dropped_right.contains(&col) {
            continue;
        }
        let shift = dropped_right.iter().filter(|&&d| d < col).count();
        vars.insert(var.clone(), left_width + col - shift);
    }
    vars
}

/// Sort-merge join on one column. Both inputs must be sorted on their
/// join column; the planner inserts sorts where needed.
#[derive(Debug)]
pub struct Join {
    left: ExecutionTree,
    right: ExecutionTree,
    left_col: usize,
    right_col: usize,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    size_estimate: usize,
    cost_estimate: usize,
}

impl Join {
    pub fn new(
        ctx: &ExecutionContext,
        left: ExecutionTree,
        right: ExecutionTree,
        left_col: usize,
        right_col: usize,
    ) -> Self {
        debug_assert_eq!(left.result_sorted_on().first(), Some(&left_col));
        debug_assert_eq!(right.result_sorted_on().first(), Some(&right_col));
        let var_columns = joined_var_columns(&left, &right, &[right_col]);
        let size_estimate = join_size_estimate(
            left.estimated_size(),
            right.estimated_size(),
            ctx.cost_factor(JOIN_SIZE_FACTOR),
        );
        let cost_estimate = left.cost_estimate()
            + right.cost_estimate()
            + left.estimated_size()
            + right.estimated_size()
            + size_estimate;
        Self {
            left,
            right,
            left_col,
            right_col,
            var_columns,
            sorted_on: vec![left_col],
            size_estimate,
            cost_estimate,
        }
    }
}

#[async_trait]
impl Operation for Join {
    fn name(&self) -> &'static str {
        "Join"
    }

    fn cache_key(&self) -> String {
        format!(
            "JOIN on ({},{}) [{}] [{}]",
            self.left_col,
            self.right_col,
            self.left.cache_key(),
            self.right.cache_key()
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
        vec![&self.left, &self.right]
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let left = self.left.get_result(ctx).await?;
        let right = self.right.get_result(ctx).await?;
        let (lt, rt) = (&*left.table, &*right.table);
        let (vocab, remap) = super::merge_vocabs(lt, rt);

        let width = self.var_columns.len();
        let mut out = IdTable::new(width, ctx.budget());
        let mut row = vec![Id::UNDEFINED; width];

        let (mut i, mut j) = (0usize, 0usize);
        let mut batch = 0usize;
        while i < lt.num_rows() && j < rt.num_rows() {
            batch += 1;
            if batch % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let lkey = lt.at(i, self.left_col);
            let rkey = rt.at(j, self.right_col);
            // An unbound key never joins.
            if lkey.is_undefined() {
                i += 1;
                continue;
            }
            if rkey.is_undefined() {
                j += 1;
                continue;
            }
            if lkey < rkey {
                i += 1;
            } else if rkey < lkey {
                j += 1;
            } else {
                // Cross product of the two equal-key runs.
                let i_end = run_end(lt, self.left_col, i);
                let j_end = run_end(rt, self.right_col, j);
                for li in i..i_end {
                    for rj in j..j_end {
                        emit_row(
                            &mut row,
                            lt,
                            li,
                            rt,
                            rj,
                            self.right_col,
                            remap.as_ref(),
                        );
                        out.push_row(&row)?;
                    }
                }
                i = i_end;
                j = j_end;
            }
        }
        Ok(ResultTable::freeze(out, self.sorted_on.clone(), vocab))
    }
}

fn run_end(table: &ResultTable, col: usize, start: usize) -> usize {
    let key = table.at(start, col);
    let mut end = start + 1;
    while end < table.num_rows() && table.at(end, col) == key {
        end += 1;
    }
    end
}

fn emit_row(
    row: &mut [Id],
    left: &ResultTable,
    li: usize,
    right: &ResultTable,
    rj: usize,
    dropped_right: usize,
    remap: Option<&FxHashMap<u64, u64>>,
) {
    let left_width = left.width();
    for c in 0..left_width {
        row[c] = left.at(li, c);
    }
    let mut out = left_width;
    for c in 0..right.width() {
        if c == dropped_right {
            continue;
        }
        row[out] = super::remap_id(right.at(rj, c), remap);
        out += 1;
    }
}

/// Hash join on one or more column pairs. Builds a table over the right
/// input and probes with the left input in order, so the left sort order
/// is preserved.
#[derive(Debug)]
pub struct HashJoin {
    left: ExecutionTree,
    right: ExecutionTree,
    /// `(left column, right column)` pairs.
    join_cols: Vec<(usize, usize)>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    size_estimate: usize,
    cost_estimate: usize,
}

impl HashJoin {
    pub fn new(
        ctx: &ExecutionContext,
        left: ExecutionTree,
        right: ExecutionTree,
        join_cols: Vec<(usize, usize)>,
    ) -> Self {
        debug_assert!(!join_cols.is_empty());
        let dropped: Vec<usize> = join_cols.iter().map(|&(_, r)| r).collect();
        let var_columns = joined_var_columns(&left, &right, &dropped);
        let size_estimate = join_size_estimate(
            left.estimated_size(),
            right.estimated_size(),
            ctx.cost_factor(HASH_JOIN_SIZE_FACTOR),
        );
        let cost_estimate = left.cost_estimate()
            + right.cost_estimate()
            + left.estimated_size()
            + 2 * right.estimated_size()
            + size_estimate;
        let sorted_on = left.result_sorted_on().to_vec();
        Self {
            left,
            right,
            join_cols,
            var_columns,
            sorted_on,
            size_estimate,
            cost_estimate,
        }
    }
}

#[async_trait]
impl Operation for HashJoin {
    fn name(&self) -> &'static str {
        "HashJoin"
    }

    fn cache_key(&self) -> String {
        let cols: Vec<String> = self
            .join_cols
            .iter()
            .map(|(l, r)| format!("{l}={r}"))
            .collect();
        format!(
            "HASH_JOIN on ({}) [{}] [{}]",
            cols.join(","),
            self.left.cache_key(),
            self.right.cache_key()
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
        vec![&self.left, &self.right]
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let left = self.left.get_result(ctx).await?;
        let right = self.right.get_result(ctx).await?;
        let (lt, rt) = (&*left.table, &*right.table);
        let (vocab, remap) = super::merge_vocabs(lt, rt);

        // Build side: right rows grouped by key tuple. The hash table is
        // charged against the shared budget.
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
        let width = self.var_columns.len();
        let mut out = IdTable::new(width, ctx.budget());
        let mut row = vec![Id::UNDEFINED; width];
        let mut key = Vec::with_capacity(self.join_cols.len());

        for li in 0..lt.num_rows() {
            if li % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            key.clear();
            key.extend(self.join_cols.iter().map(|&(l, _)| lt.at(li, l)));
            if key.iter().any(|id| id.is_undefined()) {
                continue;
            }
            let Some(matches) = by_key.get(&key) else {
                continue;
            };
            for &rj in matches {
                emit_row_multi(&mut row, lt, li, rt, rj, &dropped, remap.as_ref());
                out.push_row(&row)?;
            }
        }
        Ok(ResultTable::freeze(out, self.sorted_on.clone(), vocab))
    }
}

fn emit_row_multi(
    row: &mut [Id],
    left: &ResultTable,
    li: usize,
    right: &ResultTable,
    rj: usize,
    dropped_right: &[usize],
    remap: Option<&FxHashMap<u64, u64>>,
) {
    let left_width = left.width();
    for c in 0..left_width {
        row[c] = left.at(li, c);
    }
    let mut out = left_width;
    for c in 0..right.width() {
        if dropped_right.contains(&c) {
            continue;
        }
        row[out] = super::remap_id(right.at(rj, c), remap);
        out += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use crate::ir::Variable;
    use crate::op::scan::{IndexScan, ScanTerm};
    use std::sync::Arc;
    use tern_core::{MemoryIndex, Permutation};

    fn test_ctx() -> ExecutionContext {
        let mut b = MemoryIndex::builder();
        b.add_triple("<a>", "<p>", "<o>")
            .add_triple("<a>", "<q>", "<o2>")
            .add_triple("<b>", "<p>", "<o>");
        ExecutionContext::new(
            Arc::new(b.build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn scan_on(ctx: &ExecutionContext, pred: &str, obj: &str) -> ExecutionTree {
        let p = ctx.index().vocab_id(pred).unwrap();
        let o = ctx.index().vocab_id(obj).unwrap();
        ExecutionTree::new(
            IndexScan::try_new(
                ctx,
                Permutation::Pos,
                ScanTerm::Var(Variable::new("?x")),
                ScanTerm::Fixed(p),
                ScanTerm::Fixed(o),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sort_merge_join() {
        let ctx = test_ctx();
        // ?x <p> <o> (a, b) joined with ?x <q> <o2> (a) => a.
        let left = scan_on(&ctx, "<p>", "<o>");
        let right = scan_on(&ctx, "<q>", "<o2>");
        let join = Join::new(&ctx, left, right, 0, 0);
        assert_eq!(
            join.variable_columns().get(&Variable::new("?x")),
            Some(0)
        );
        let tree = ExecutionTree::new(join);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 1);
        assert_eq!(
            result.table.at(0, 0),
            ctx.index().vocab_id("<a>").unwrap()
        );
    }

    #[tokio::test]
    async fn test_hash_join_matches_merge_join() {
        let ctx = test_ctx();
        let left = scan_on(&ctx, "<p>", "<o>");
        let right = scan_on(&ctx, "<q>", "<o2>");
        let join = HashJoin::new(&ctx, left, right, vec![(0, 0)]);
        let tree = ExecutionTree::new(join);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 1);
        assert_eq!(
            result.table.at(0, 0),
            ctx.index().vocab_id("<a>").unwrap()
        );
    }
}
