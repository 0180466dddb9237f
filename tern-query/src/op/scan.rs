//! Index scans over one permutation.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{Id, IdTable, LocalVocab, Permutation, ResultTable};

/// One position of a scanned triple: a concrete id or a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTerm {
    Fixed(Id),
    Var(Variable),
}

impl ScanTerm {
    pub fn as_fixed(&self) -> Option<Id> {
        match self {
            ScanTerm::Fixed(id) => Some(*id),
            ScanTerm::Var(_) => None,
        }
    }
}

/// Scan of one index permutation with a fixed key prefix.
///
/// The scan yields one column per free position, in permutation key
/// order, sorted lexicographically. A variable occurring in more than
/// one free position adds an equality constraint; the duplicate columns
/// are dropped from the output.
#[derive(Debug)]
pub struct IndexScan {
    permutation: Permutation,
    prefix: Vec<Id>,
    /// Free variables in permutation order (duplicates removed).
    free_vars: Vec<Variable>,
    /// For each raw scan column, the output column it maps to, or the
    /// earlier column it must equal.
    column_plan: Vec<ColumnPlan>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    size_estimate: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnPlan {
    Keep(usize),
    MustEqual(usize),
}

impl IndexScan {
    /// Build a scan of `permutation` for the given subject, predicate
    /// and object terms. Returns `None` if the permutation does not put
    /// all fixed positions in front of all variable positions.
    pub fn try_new(
        ctx: &ExecutionContext,
        permutation: Permutation,
        subject: ScanTerm,
        predicate: ScanTerm,
        object: ScanTerm,
    ) -> Option<Self> {
        let by_position = [subject, predicate, object];
        let ordered: Vec<&ScanTerm> = permutation
            .key_order()
            .iter()
            .map(|&pos| &by_position[pos])
            .collect();

        let num_fixed = ordered
            .iter()
            .take_while(|t| matches!(t, ScanTerm::Fixed(_)))
            .count();
        if ordered[num_fixed..]
            .iter()
            .any(|t| matches!(t, ScanTerm::Fixed(_)))
        {
            return None;
        }

        let prefix: Vec<Id> = ordered[..num_fixed]
            .iter()
            .map(|t| t.as_fixed().unwrap())
            .collect();

        let mut free_vars: Vec<Variable> = Vec::new();
        let mut column_plan = Vec::new();
        for term in &ordered[num_fixed..] {
            let var = match term {
                ScanTerm::Var(v) => v.clone(),
                ScanTerm::Fixed(_) => unreachable!("fixed terms are all in the prefix"),
            };
            match free_vars.iter().position(|v| *v == var) {
                Some(existing) => column_plan.push(ColumnPlan::MustEqual(existing)),
                None => {
                    column_plan.push(ColumnPlan::Keep(free_vars.len()));
                    free_vars.push(var);
                }
            }
        }

        let var_columns = VariableColumns::from_ordered(free_vars.iter().cloned());
        // Columns are produced in permutation order, so the full output
        // is a guaranteed sort prefix; an equality constraint cuts the
        // guarantee at the first dropped column.
        let sorted_width = column_plan
            .iter()
            .take_while(|p| matches!(p, ColumnPlan::Keep(_)))
            .count();
        let sorted_on: Vec<usize> = (0..sorted_width).collect();
        let size_estimate = ctx.index().count_with_prefix(permutation, &prefix);

        Some(Self {
            permutation,
            prefix,
            free_vars,
            column_plan,
            var_columns,
            sorted_on,
            size_estimate,
        })
    }

    pub fn permutation(&self) -> Permutation {
        self.permutation
    }
}

#[async_trait]
impl Operation for IndexScan {
    fn name(&self) -> &'static str {
        "IndexScan"
    }

    fn cache_key(&self) -> String {
        let prefix: Vec<String> = self.prefix.iter().map(|id| format!("{:x}", id.bits())).collect();
        let plan: Vec<String> = self
            .column_plan
            .iter()
            .map(|p| match p {
                ColumnPlan::Keep(c) => format!("k{c}"),
                ColumnPlan::MustEqual(c) => format!("e{c}"),
            })
            .collect();
        format!(
            "SCAN {} prefix=[{}] cols=[{}]",
            self.permutation,
            prefix.join(","),
            plan.join(",")
        )
    }

    fn estimated_size(&self) -> usize {
        self.size_estimate
    }

    fn cost_estimate(&self) -> usize {
        self.size_estimate
    }

    fn variable_columns(&self) -> &VariableColumns {
        &self.var_columns
    }

    fn result_sorted_on(&self) -> &[usize] {
        &self.sorted_on
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        Vec::new()
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let raw = ctx
            .index()
            .scan(self.permutation, &self.prefix, ctx.budget())
            .await?;

        let no_constraints = self
            .column_plan
            .iter()
            .all(|p| matches!(p, ColumnPlan::Keep(_)));
        if no_constraints {
            return Ok(ResultTable::freeze(
                raw,
                self.sorted_on.clone(),
                LocalVocab::new(),
            ));
        }

        let mut table = IdTable::new(self.free_vars.len(), ctx.budget());
        let mut row = vec![Id::UNDEFINED; self.free_vars.len()];
        'rows: for r in 0..raw.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            for (raw_col, plan) in self.column_plan.iter().enumerate() {
                let id = raw.at(r, raw_col);
                match plan {
                    ColumnPlan::Keep(out) => row[*out] = id,
                    ColumnPlan::MustEqual(out) => {
                        if row[*out] != id {
                            continue 'rows;
                        }
                    }
                }
            }
            table.push_row(&row)?;
        }
        Ok(ResultTable::freeze(
            table,
            self.sorted_on.clone(),
            LocalVocab::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use std::sync::Arc;
    use tern_core::MemoryIndex;

    fn test_ctx() -> ExecutionContext {
        let mut b = MemoryIndex::builder();
        b.add_triple("<a>", "<p>", "<o>")
            .add_triple("<a>", "<q>", "<o2>")
            .add_triple("<b>", "<p>", "<o>")
            .add_triple("<c>", "<r>", "<c>");
        ExecutionContext::new(
            Arc::new(b.build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn vocab(ctx: &ExecutionContext, term: &str) -> Id {
        ctx.index().vocab_id(term).unwrap()
    }

    #[tokio::test]
    async fn test_scan_fixed_predicate() {
        let ctx = test_ctx();
        let p = vocab(&ctx, "<p>");
        let scan = IndexScan::try_new(
            &ctx,
            Permutation::Pso,
            ScanTerm::Var(Variable::new("?s")),
            ScanTerm::Fixed(p),
            ScanTerm::Var(Variable::new("?o")),
        )
        .unwrap();
        assert_eq!(scan.estimated_size(), 2);
        assert_eq!(scan.result_sorted_on(), &[0, 1]);

        let tree = ExecutionTree::new(scan);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 2);
        assert_eq!(result.table.width(), 2);
        assert!(result.table.at(0, 0) <= result.table.at(1, 0));
    }

    #[test]
    fn test_fixed_after_variable_is_rejected() {
        let ctx = test_ctx();
        let p = vocab(&ctx, "<p>");
        // SPO puts the variable subject before the fixed predicate.
        assert!(IndexScan::try_new(
            &ctx,
            Permutation::Spo,
            ScanTerm::Var(Variable::new("?s")),
            ScanTerm::Fixed(p),
            ScanTerm::Var(Variable::new("?o")),
        )
        .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_variable_adds_equality() {
        let ctx = test_ctx();
        let r = vocab(&ctx, "<r>");
        // ?x <r> ?x matches only the reflexive triple (c, r, c).
        let scan = IndexScan::try_new(
            &ctx,
            Permutation::Pso,
            ScanTerm::Var(Variable::new("?x")),
            ScanTerm::Fixed(r),
            ScanTerm::Var(Variable::new("?x")),
        )
        .unwrap();
        assert_eq!(scan.variable_columns().len(), 1);

        let tree = ExecutionTree::new(scan);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 1);
        assert_eq!(result.table.at(0, 0), vocab(&ctx, "<c>"));
    }

    #[tokio::test]
    async fn test_unknown_term_scans_empty() {
        let ctx = test_ctx();
        // An unresolvable term is represented as UNDEFINED; nothing in
        // the index matches it.
        let scan = IndexScan::try_new(
            &ctx,
            Permutation::Pso,
            ScanTerm::Var(Variable::new("?s")),
            ScanTerm::Fixed(Id::UNDEFINED),
            ScanTerm::Var(Variable::new("?o")),
        )
        .unwrap();
        assert_eq!(scan.estimated_size(), 0);
        let tree = ExecutionTree::new(scan);
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 0);
    }
}
