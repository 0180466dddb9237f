//! Transitive closure over an edge relation.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use tern_core::{Id, IdTable, ResultTable};

/// One endpoint of a transitive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEnd {
    Bound(Id),
    Var(Variable),
}

impl PathEnd {
    fn as_bound(&self) -> Option<Id> {
        match self {
            PathEnd::Bound(id) => Some(*id),
            PathEnd::Var(_) => None,
        }
    }
}

/// An input tree that binds one endpoint of the path; produced by the
/// planner when a transitive path is joined against a computed side.
#[derive(Debug)]
pub struct SideInput {
    pub tree: ExecutionTree,
    /// Column of the side result holding the endpoint values.
    pub join_col: usize,
    /// True when the side binds the left endpoint, false for the right.
    pub binds_left: bool,
}

/// Paths of length `min..=max` through the edge relation computed by
/// `sub` (column 0: from, column 1: to).
///
/// Output columns: without a side input, the unbound endpoints in
/// left-right order. With a side input, the side's columns followed by
/// the opposite endpoint.
#[derive(Debug)]
pub struct TransitivePath {
    sub: ExecutionTree,
    left: PathEnd,
    right: PathEnd,
    min: usize,
    max: usize,
    side: Option<SideInput>,
    var_columns: VariableColumns,
    size_estimate: usize,
    cost_estimate: usize,
}

impl TransitivePath {
    pub fn new(
        sub: ExecutionTree,
        left: PathEnd,
        right: PathEnd,
        min: usize,
        max: Option<usize>,
    ) -> Self {
        let mut vars = Vec::new();
        if let PathEnd::Var(v) = &left {
            vars.push(v.clone());
        }
        if let PathEnd::Var(v) = &right {
            vars.push(v.clone());
        }
        let var_columns = VariableColumns::from_ordered(vars);
        let size_estimate = sub.estimated_size().saturating_mul(4).max(1);
        let cost_estimate = sub.cost_estimate() + 2 * size_estimate;
        Self {
            sub,
            left,
            right,
            min,
            max: max.unwrap_or(usize::MAX),
            side: None,
            var_columns,
            size_estimate,
            cost_estimate,
        }
    }

    /// True if this path has no side input yet and `var` is one of its
    /// free endpoints.
    pub fn can_bind(&self, var: &Variable) -> bool {
        self.side.is_none()
            && (self.left == PathEnd::Var(var.clone()) || self.right == PathEnd::Var(var.clone()))
    }

    /// Rebuild this path with `side` bound to the endpoint named by
    /// `var`. The output becomes the side columns plus the opposite
    /// endpoint.
    pub fn bind_side(&self, side: ExecutionTree, var: &Variable) -> Option<TransitivePath> {
        if !self.can_bind(var) {
            return None;
        }
        let binds_left = self.left == PathEnd::Var(var.clone());
        let join_col = side.column_of(var)?;

        let mut var_columns = side.variable_columns().clone();
        let opposite = if binds_left { &self.right } else { &self.left };
        if let PathEnd::Var(v) = opposite {
            var_columns.insert(v.clone(), side.width());
        }
        let size_estimate = side
            .estimated_size()
            .saturating_mul(2)
            .max(self.sub.estimated_size());
        let cost_estimate = side.cost_estimate() + self.sub.cost_estimate() + 2 * size_estimate;
        Some(TransitivePath {
            sub: self.sub.clone(),
            left: self.left.clone(),
            right: self.right.clone(),
            min: self.min,
            max: self.max,
            side: Some(SideInput {
                tree: side,
                join_col,
                binds_left,
            }),
            var_columns,
            size_estimate,
            cost_estimate,
        })
    }

    /// Nodes reachable from `start` via a path of length in
    /// `[min, max]`. Levels below `min` use per-level frontiers (a node
    /// may be revisited on a longer path); from `min` on, a visited set
    /// makes the closure terminate on cyclic graphs.
    fn reach(&self, adjacency: &FxHashMap<Id, Vec<Id>>, start: Id) -> Vec<Id> {
        let mut result: Vec<Id> = Vec::new();
        let mut in_result: FxHashSet<Id> = FxHashSet::default();
        if self.min == 0 {
            result.push(start);
            in_result.insert(start);
        }

        let mut frontier: Vec<Id> = vec![start];
        let mut depth = 0usize;
        let mut visited: FxHashSet<Id> = FxHashSet::default();
        while !frontier.is_empty() && depth < self.max {
            depth += 1;
            let mut next: Vec<Id> = Vec::new();
            let mut next_seen: FxHashSet<Id> = FxHashSet::default();
            for node in &frontier {
                if let Some(successors) = adjacency.get(node) {
                    for &succ in successors {
                        if next_seen.insert(succ) {
                            next.push(succ);
                        }
                    }
                }
            }
            if depth >= self.min {
                for &node in &next {
                    if in_result.insert(node) {
                        result.push(node);
                    }
                }
                // Past the minimum depth only first visits matter.
                next.retain(|n| visited.insert(*n));
            }
            frontier = next;
        }
        result
    }
}

#[async_trait]
impl Operation for TransitivePath {
    fn name(&self) -> &'static str {
        "TransitivePath"
    }

    fn cache_key(&self) -> String {
        let end_key = |end: &PathEnd| match end {
            PathEnd::Bound(id) => format!("b{:x}", id.bits()),
            PathEnd::Var(_) => "v".to_owned(),
        };
        let side_key = match &self.side {
            None => String::new(),
            Some(side) => format!(
                " side=({},{},[{}])",
                side.join_col,
                if side.binds_left { "l" } else { "r" },
                side.tree.cache_key()
            ),
        };
        format!(
            "TRANSITIVE_PATH {{{},{}}} left={} right={}{} [{}]",
            self.min,
            if self.max == usize::MAX {
                "inf".to_owned()
            } else {
                self.max.to_string()
            },
            end_key(&self.left),
            end_key(&self.right),
            side_key,
            self.sub.cache_key()
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
        &[]
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        let mut children = vec![&self.sub];
        if let Some(side) = &self.side {
            children.push(&side.tree);
        }
        children
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let edges = self.sub.get_result(ctx).await?;
        let et = &*edges.table;

        // Adjacency in travel direction. A side bound to the right
        // endpoint walks the edges backwards.
        let reversed = self.side.as_ref().is_some_and(|s| !s.binds_left);
        let mut charge = ctx.budget().open_charge();
        let mut adjacency: FxHashMap<Id, Vec<Id>> = FxHashMap::default();
        let mut universe: FxHashSet<Id> = FxHashSet::default();
        for r in 0..et.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let (from, to) = if reversed {
                (et.at(r, 1), et.at(r, 0))
            } else {
                (et.at(r, 0), et.at(r, 1))
            };
            charge.grow(2 * std::mem::size_of::<Id>())?;
            adjacency.entry(from).or_default().push(to);
            universe.insert(from);
            universe.insert(to);
        }

        match &self.side {
            Some(side) => {
                let side_result = side.tree.get_result(ctx).await?;
                let st = &*side_result.table;
                let opposite_bound = if side.binds_left {
                    self.right.as_bound()
                } else {
                    self.left.as_bound()
                };
                let emit_opposite = opposite_bound.is_none();
                let width = st.width() + usize::from(emit_opposite);
                let mut out = IdTable::new(width, ctx.budget());
                let mut row = vec![Id::UNDEFINED; width];
                let mut memo: FxHashMap<Id, Vec<Id>> = FxHashMap::default();
                for r in 0..st.num_rows() {
                    if r % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    let start = st.at(r, side.join_col);
                    if start.is_undefined() {
                        continue;
                    }
                    let targets = memo
                        .entry(start)
                        .or_insert_with(|| self.reach(&adjacency, start))
                        .clone();
                    for target in targets {
                        if let Some(required) = opposite_bound {
                            if target != required {
                                continue;
                            }
                        }
                        for c in 0..st.width() {
                            row[c] = st.at(r, c);
                        }
                        if emit_opposite {
                            row[width - 1] = target;
                        }
                        out.push_row(&row)?;
                    }
                }
                Ok(ResultTable::freeze(
                    out,
                    Vec::new(),
                    st.local_vocab().clone(),
                ))
            }
            None => {
                let starts: Vec<Id> = match self.left.as_bound() {
                    Some(id) => vec![id],
                    None => {
                        let mut nodes: Vec<Id> = universe.iter().copied().collect();
                        nodes.sort_unstable();
                        nodes
                    }
                };
                let width = self.var_columns.len();
                let mut out = IdTable::new(width, ctx.budget());
                let mut row = vec![Id::UNDEFINED; width];
                for (i, &start) in starts.iter().enumerate() {
                    if i % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    for target in self.reach(&adjacency, start) {
                        if let Some(required) = self.right.as_bound() {
                            if target != required {
                                continue;
                            }
                        }
                        let mut c = 0;
                        if matches!(self.left, PathEnd::Var(_)) {
                            row[c] = start;
                            c += 1;
                        }
                        if matches!(self.right, PathEnd::Var(_)) {
                            row[c] = target;
                        }
                        out.push_row(&row)?;
                    }
                }
                Ok(ResultTable::freeze(
                    out,
                    Vec::new(),
                    edges.table.local_vocab().clone(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use crate::op::scan::{IndexScan, ScanTerm};
    use std::sync::Arc;
    use tern_core::{MemoryIndex, Permutation};

    fn chain_ctx() -> ExecutionContext {
        // a -> b -> c -> d
        let mut b = MemoryIndex::builder();
        b.add_triple("<a>", "<p>", "<b>")
            .add_triple("<b>", "<p>", "<c>")
            .add_triple("<c>", "<p>", "<d>");
        ExecutionContext::new(
            Arc::new(b.build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn edge_tree(ctx: &ExecutionContext) -> ExecutionTree {
        let p = ctx.index().vocab_id("<p>").unwrap();
        ExecutionTree::new(
            IndexScan::try_new(
                ctx,
                Permutation::Pso,
                ScanTerm::Var(Variable::new("?from")),
                ScanTerm::Fixed(p),
                ScanTerm::Var(Variable::new("?to")),
            )
            .unwrap(),
        )
    }

    fn vocab(ctx: &ExecutionContext, term: &str) -> Id {
        ctx.index().vocab_id(term).unwrap()
    }

    #[tokio::test]
    async fn test_bound_left_plus() {
        let ctx = chain_ctx();
        let path = TransitivePath::new(
            edge_tree(&ctx),
            PathEnd::Bound(vocab(&ctx, "<a>")),
            PathEnd::Var(Variable::new("?y")),
            1,
            None,
        );
        let tree = ExecutionTree::new(path);
        let result = tree.get_result(&ctx).await.unwrap();
        // a+ reaches b, c, d.
        assert_eq!(result.table.num_rows(), 3);
        assert_eq!(result.table.width(), 1);
    }

    #[tokio::test]
    async fn test_star_includes_start() {
        let ctx = chain_ctx();
        let path = TransitivePath::new(
            edge_tree(&ctx),
            PathEnd::Bound(vocab(&ctx, "<a>")),
            PathEnd::Var(Variable::new("?y")),
            0,
            None,
        );
        let tree = ExecutionTree::new(path);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 4);
    }

    #[tokio::test]
    async fn test_bounded_range() {
        let ctx = chain_ctx();
        let path = TransitivePath::new(
            edge_tree(&ctx),
            PathEnd::Bound(vocab(&ctx, "<a>")),
            PathEnd::Var(Variable::new("?y")),
            2,
            Some(2),
        );
        let tree = ExecutionTree::new(path);
        let result = tree.get_result(&ctx).await.unwrap();
        // Exactly two hops from a: only c.
        assert_eq!(result.table.num_rows(), 1);
        assert_eq!(result.table.at(0, 0), vocab(&ctx, "<c>"));
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let mut b = MemoryIndex::builder();
        b.add_triple("<a>", "<p>", "<b>").add_triple("<b>", "<p>", "<a>");
        let ctx = ExecutionContext::new(
            Arc::new(b.build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap();
        let path = TransitivePath::new(
            edge_tree(&ctx),
            PathEnd::Bound(ctx.index().vocab_id("<a>").unwrap()),
            PathEnd::Var(Variable::new("?y")),
            1,
            None,
        );
        let tree = ExecutionTree::new(path);
        let result = tree.get_result(&ctx).await.unwrap();
        // a+ over the 2-cycle reaches both a and b.
        assert_eq!(result.table.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_free_free_closure() {
        let ctx = chain_ctx();
        let path = TransitivePath::new(
            edge_tree(&ctx),
            PathEnd::Var(Variable::new("?x")),
            PathEnd::Var(Variable::new("?y")),
            1,
            None,
        );
        let tree = ExecutionTree::new(path);
        let result = tree.get_result(&ctx).await.unwrap();
        // Pairs: (a,b)(a,c)(a,d)(b,c)(b,d)(c,d).
        assert_eq!(result.table.num_rows(), 6);
        assert_eq!(result.table.width(), 2);
    }
}
