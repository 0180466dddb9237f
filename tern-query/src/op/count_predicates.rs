//! The pattern-trick operator.
//!
//! `SELECT ?p (COUNT(?s) AS ?c) WHERE { ?s ?p ?o } GROUP BY ?p` does not
//! need to enumerate triples: the precomputed pattern table already maps
//! each subject to its predicate set, so counting subjects per predicate
//! is a walk over that table.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tern_core::{Id, IdTable, ResultTable};

/// Counts, per predicate, the subjects carrying that predicate. Either
/// over the whole pattern table or over the subjects produced by an
/// input tree (one count per input row; the planner prepends a Distinct
/// when the counted variable is distinct).
#[derive(Debug)]
pub struct CountAvailablePredicates {
    input: Option<(ExecutionTree, usize)>,
    predicate_var: Variable,
    count_var: Variable,
    var_columns: VariableColumns,
    size_estimate: usize,
    cost_estimate: usize,
}

impl CountAvailablePredicates {
    /// Count over every subject in the pattern table.
    pub fn full(
        ctx: &ExecutionContext,
        predicate_var: Variable,
        count_var: Variable,
    ) -> Self {
        let var_columns =
            VariableColumns::from_ordered([predicate_var.clone(), count_var.clone()]);
        // One row per distinct predicate.
        let size_estimate = ctx.index().num_triples().max(1);
        Self {
            input: None,
            predicate_var,
            count_var,
            var_columns,
            size_estimate,
            cost_estimate: size_estimate,
        }
    }

    /// Count over the subjects in `col` of `input`.
    pub fn for_subtree(
        input: ExecutionTree,
        subject_col: usize,
        predicate_var: Variable,
        count_var: Variable,
    ) -> Self {
        let var_columns =
            VariableColumns::from_ordered([predicate_var.clone(), count_var.clone()]);
        let size_estimate = input.estimated_size().max(1);
        let cost_estimate = input.cost_estimate() + 2 * size_estimate;
        Self {
            input: Some((input, subject_col)),
            predicate_var,
            count_var,
            var_columns,
            size_estimate,
            cost_estimate,
        }
    }

    pub fn predicate_variable(&self) -> &Variable {
        &self.predicate_var
    }

    pub fn count_variable(&self) -> &Variable {
        &self.count_var
    }
}

#[async_trait]
impl Operation for CountAvailablePredicates {
    fn name(&self) -> &'static str {
        "CountAvailablePredicates"
    }

    fn cache_key(&self) -> String {
        match &self.input {
            None => "COUNT_AVAILABLE_PREDICATES full".to_owned(),
            Some((tree, col)) => format!(
                "COUNT_AVAILABLE_PREDICATES col={} [{}]",
                col,
                tree.cache_key()
            ),
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
        &[]
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        match &self.input {
            None => Vec::new(),
            Some((tree, _)) => vec![tree],
        }
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let index = ctx.index();
        let mut charge = ctx.budget().open_charge();
        let mut counts: FxHashMap<Id, i64> = FxHashMap::default();

        let mut count_subject = |subject: Id,
                                 counts: &mut FxHashMap<Id, i64>,
                                 charge: &mut tern_core::MemoryCharge|
         -> Result<()> {
            if let Some(pattern) = index.pattern_for(subject) {
                for &pred in index.predicates_in_pattern(pattern) {
                    if let Some(slot) = counts.get_mut(&pred) {
                        *slot += 1;
                    } else {
                        charge.grow(std::mem::size_of::<(Id, i64)>() + 8)?;
                        counts.insert(pred, 1);
                    }
                }
            }
            Ok(())
        };

        match &self.input {
            None => {
                for (i, &(subject, _)) in index.subject_patterns().iter().enumerate() {
                    if i % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    count_subject(subject, &mut counts, &mut charge)?;
                }
            }
            Some((tree, col)) => {
                let input = tree.get_result(ctx).await?;
                let table = &*input.table;
                for r in 0..table.num_rows() {
                    if r % super::BATCH_CHECK == 0 {
                        ctx.check_deadline()?;
                    }
                    count_subject(table.at(r, *col), &mut counts, &mut charge)?;
                }
            }
        }

        let mut rows: Vec<(Id, i64)> = counts.into_iter().collect();
        rows.sort_unstable_by_key(|&(pred, _)| pred);
        let mut out = IdTable::new(2, ctx.budget());
        for (pred, count) in rows {
            out.push_row(&[pred, Id::from_int(count)])?;
        }
        Ok(ResultTable::freeze(out, vec![0], Default::default()))
    }
}
