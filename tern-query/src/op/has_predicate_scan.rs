//! Scans over the precomputed subject-pattern table.
//!
//! `?s ql:has-predicate ?p` enumerates, per subject, the predicates that
//! subject carries, without touching the triples themselves. The bound
//! form takes a computed input and appends the predicate column per row.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{Id, IdTable, ResultTable};

#[derive(Debug)]
enum Subject {
    /// Enumerate all subjects from the pattern table.
    Free(Variable),
    /// Take subjects from a computed input tree.
    Bound { tree: ExecutionTree, col: usize },
}

/// Emits `(subject, predicate)` rows from the pattern table.
#[derive(Debug)]
pub struct HasPredicateScan {
    subject: Subject,
    predicate_var: Variable,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    size_estimate: usize,
    cost_estimate: usize,
}

impl HasPredicateScan {
    /// Average predicates per pattern, for sizing.
    fn avg_pattern_width(ctx: &ExecutionContext) -> usize {
        let subjects = ctx.index().subject_patterns();
        if subjects.is_empty() {
            return 1;
        }
        let total: usize = subjects
            .iter()
            .map(|&(_, p)| ctx.index().predicates_in_pattern(p).len())
            .sum();
        (total / subjects.len()).max(1)
    }

    /// `?s ql:has-predicate ?p` with both positions free.
    pub fn free(ctx: &ExecutionContext, subject_var: Variable, predicate_var: Variable) -> Self {
        let var_columns =
            VariableColumns::from_ordered([subject_var.clone(), predicate_var.clone()]);
        let size_estimate =
            ctx.index().subject_patterns().len() * Self::avg_pattern_width(ctx);
        Self {
            subject: Subject::Free(subject_var),
            predicate_var,
            var_columns,
            sorted_on: vec![0],
            size_estimate,
            cost_estimate: size_estimate,
        }
    }

    /// Bound form: `tree` supplies the subjects in column `col`.
    pub fn bound(
        ctx: &ExecutionContext,
        tree: ExecutionTree,
        col: usize,
        predicate_var: Variable,
    ) -> Self {
        let mut var_columns = tree.variable_columns().clone();
        var_columns.insert(predicate_var.clone(), tree.width());
        let size_estimate = tree.estimated_size() * Self::avg_pattern_width(ctx);
        let cost_estimate = tree.cost_estimate() + size_estimate;
        let sorted_on = tree.result_sorted_on().to_vec();
        Self {
            subject: Subject::Bound { tree, col },
            predicate_var,
            var_columns,
            sorted_on,
            size_estimate,
            cost_estimate,
        }
    }

    /// The subject variable of the free form.
    pub fn subject_variable(&self) -> Option<&Variable> {
        match &self.subject {
            Subject::Free(v) => Some(v),
            Subject::Bound { .. } => None,
        }
    }

    pub fn predicate_variable(&self) -> &Variable {
        &self.predicate_var
    }
}

#[async_trait]
impl Operation for HasPredicateScan {
    fn name(&self) -> &'static str {
        "HasPredicateScan"
    }

    fn cache_key(&self) -> String {
        match &self.subject {
            Subject::Free(_) => "HAS_PREDICATE_SCAN free".to_owned(),
            Subject::Bound { tree, col } => {
                format!("HAS_PREDICATE_SCAN col={} [{}]", col, tree.cache_key())
            }
        }
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
        match &self.subject {
            Subject::Free(_) => Vec::new(),
            Subject::Bound { tree, .. } => vec![tree],
        }
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let index = ctx.index();
        match &self.subject {
            Subject::Free(_) => {
                let mut out = IdTable::new(2, ctx.budget());
                for (i, &(subject, pattern)) in index.subject_patterns().iter().enumerate() {
                    if i % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    for &pred in index.predicates_in_pattern(pattern) {
                        out.push_row(&[subject, pred])?;
                    }
                }
                Ok(ResultTable::freeze(
                    out,
                    self.sorted_on.clone(),
                    Default::default(),
                ))
            }
            Subject::Bound { tree, col } => {
                let input = tree.get_result(ctx).await?;
                let table = &*input.table;
                let width = table.width() + 1;
                let mut out = IdTable::new(width, ctx.budget());
                let mut row = vec![Id::UNDEFINED; width];
                for r in 0..table.num_rows() {
                    if r % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    let subject = table.at(r, *col);
                    let Some(pattern) = index.pattern_for(subject) else {
                        continue;
                    };
                    for c in 0..table.width() {
                        row[c] = table.at(r, c);
                    }
                    for &pred in index.predicates_in_pattern(pattern) {
                        row[width - 1] = pred;
                        out.push_row(&row)?;
                    }
                }
                Ok(ResultTable::freeze(
                    out,
                    self.sorted_on.clone(),
                    table.local_vocab().clone(),
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
    use std::sync::Arc;
    use tern_core::MemoryIndex;

    fn test_ctx() -> ExecutionContext {
        let mut b = MemoryIndex::builder();
        b.add_triple("<a>", "<p>", "<o>")
            .add_triple("<a>", "<q>", "<o>")
            .add_triple("<b>", "<p>", "<o>");
        ExecutionContext::new(
            Arc::new(b.build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_free_scan_enumerates_pattern_entries() {
        let ctx = test_ctx();
        let scan =
            HasPredicateScan::free(&ctx, Variable::new("?s"), Variable::new("?p"));
        assert_eq!(scan.estimated_size(), 2); // 2 subjects * avg 1
        let tree = ExecutionTree::new(scan);
        let result = tree.get_result(&ctx).await.unwrap();
        // a has {p,q}, b has {p}: three rows.
        assert_eq!(result.table.num_rows(), 3);
        assert_eq!(result.table.width(), 2);
    }
}
