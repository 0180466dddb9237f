//! Text-search operators.
//!
//! A text clique (all triples sharing one context variable) collapses
//! into a single node carrying the word list and the connected entity
//! variables. [`TextOperationWithoutFilter`] materialises that node as a
//! leaf; [`TextOperationWithFilter`] additionally restricts one entity
//! variable by a computed input, which the planner folds in when a join
//! covers that variable.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::ir::Variable;
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tern_core::{Id, IdTable, ResultTable};

fn intersect_sorted(a: Vec<Id>, b: Vec<Id>) -> Vec<Id> {
    let mut result = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                result.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result
}

/// Records matching all words of a clique, sorted.
fn matching_records(ctx: &ExecutionContext, words: &[String]) -> Vec<Id> {
    let mut records: Option<Vec<Id>> = None;
    for word in words {
        let mut hits = ctx.index().text_records(word);
        hits.sort_unstable();
        records = Some(match records {
            None => hits,
            Some(current) => intersect_sorted(current, hits),
        });
    }
    records.unwrap_or_default()
}

/// Leaf operator for a text clique: one column for the context variable
/// and one per connected entity variable (a cross product of the
/// record's entities per extra variable).
#[derive(Debug)]
pub struct TextOperationWithoutFilter {
    words: Vec<String>,
    entity_vars: Vec<Variable>,
    var_columns: VariableColumns,
    sorted_on: Vec<usize>,
    size_estimate: usize,
}

impl TextOperationWithoutFilter {
    pub fn new(
        _ctx: &ExecutionContext,
        words: Vec<String>,
        context_var: Variable,
        entity_vars: Vec<Variable>,
    ) -> Self {
        let mut vars = vec![context_var];
        vars.extend(entity_vars.iter().cloned());
        let var_columns = VariableColumns::from_ordered(vars);
        // Text hits are usually few; scale down with more required
        // words, up with crossed entity variables.
        let size_estimate =
            (1000 / words.len().max(1)) * (entity_vars.len() + 1);
        Self {
            words,
            entity_vars,
            var_columns,
            sorted_on: vec![0],
            size_estimate,
        }
    }

    /// The entity variables this clique binds.
    pub fn entity_variables(&self) -> &[Variable] {
        &self.entity_vars
    }
}

fn push_entity_rows(
    out: &mut IdTable,
    record: Id,
    entities: &[Id],
    num_entity_vars: usize,
) -> std::result::Result<(), tern_core::AllocError> {
    let width = 1 + num_entity_vars;
    let mut row = vec![Id::UNDEFINED; width];
    row[0] = record;
    if num_entity_vars == 0 {
        return out.push_row(&row);
    }
    if entities.is_empty() {
        return Ok(());
    }
    // Odometer over entities^num_entity_vars.
    let mut counters = vec![0usize; num_entity_vars];
    loop {
        for (i, &c) in counters.iter().enumerate() {
            row[1 + i] = entities[c];
        }
        out.push_row(&row)?;
        let mut pos = num_entity_vars;
        loop {
            if pos == 0 {
                return Ok(());
            }
            pos -= 1;
            counters[pos] += 1;
            if counters[pos] < entities.len() {
                break;
            }
            counters[pos] = 0;
        }
    }
}

#[async_trait]
impl Operation for TextOperationWithoutFilter {
    fn name(&self) -> &'static str {
        "TextOperationWithoutFilter"
    }

    fn cache_key(&self) -> String {
        format!(
            "TEXT words=[{}] entities={}",
            self.words.join(","),
            self.entity_vars.len()
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
        let records = matching_records(ctx, &self.words);
        let mut out = IdTable::new(1 + self.entity_vars.len(), ctx.budget());
        for (i, &record) in records.iter().enumerate() {
            if i % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let entities = ctx.index().entities_in_record(record);
            push_entity_rows(&mut out, record, entities, self.entity_vars.len())?;
        }
        Ok(ResultTable::freeze(
            out,
            self.sorted_on.clone(),
            Default::default(),
        ))
    }
}

/// Text clique joined against a computed input on its first entity
/// variable.
#[derive(Debug)]
pub struct TextOperationWithFilter {
    words: Vec<String>,
    entity_vars: Vec<Variable>,
    filter: ExecutionTree,
    /// Column of the filtered entity variable in the filter input.
    filter_col: usize,
    var_columns: VariableColumns,
    size_estimate: usize,
    cost_estimate: usize,
}

impl TextOperationWithFilter {
    /// The filtered entity variable is `entity_vars[0]`, which `filter`
    /// binds in `filter_col`.
    pub fn new(
        _ctx: &ExecutionContext,
        words: Vec<String>,
        context_var: Variable,
        entity_vars: Vec<Variable>,
        filter: ExecutionTree,
        filter_col: usize,
    ) -> Self {
        debug_assert!(!entity_vars.is_empty());
        let mut vars = vec![context_var];
        vars.extend(entity_vars.iter().cloned());
        let mut var_columns = VariableColumns::from_ordered(vars);
        // Filter columns append after the text columns; its join column
        // is already bound to entity_vars[0].
        let base = 1 + entity_vars.len();
        let mut appended = 0usize;
        for (var, col) in filter.variable_columns().iter() {
            if col == filter_col {
                continue;
            }
            if var_columns.contains(var) {
                continue;
            }
            var_columns.insert(var.clone(), base + appended);
            appended += 1;
        }
        let size_estimate = filter.estimated_size().max(1) * (entity_vars.len() + 1);
        let cost_estimate = filter.cost_estimate() + 2 * size_estimate;
        Self {
            words,
            entity_vars,
            filter,
            filter_col,
            var_columns,
            size_estimate,
            cost_estimate,
        }
    }
}

#[async_trait]
impl Operation for TextOperationWithFilter {
    fn name(&self) -> &'static str {
        "TextOperationWithFilter"
    }

    fn cache_key(&self) -> String {
        format!(
            "TEXT_FILTER words=[{}] entities={} fcol={} [{}]",
            self.words.join(","),
            self.entity_vars.len(),
            self.filter_col,
            self.filter.cache_key()
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
        vec![&self.filter]
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let filter_result = self.filter.get_result(ctx).await?;
        let ft = &*filter_result.table;

        // Filter rows grouped by the joined entity.
        let mut charge = ctx.budget().open_charge();
        let mut by_entity: FxHashMap<Id, Vec<usize>> = FxHashMap::default();
        for r in 0..ft.num_rows() {
            if r % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let entity = ft.at(r, self.filter_col);
            if entity.is_undefined() {
                continue;
            }
            charge.grow(std::mem::size_of::<Id>() + std::mem::size_of::<usize>())?;
            by_entity.entry(entity).or_default().push(r);
        }

        let records = matching_records(ctx, &self.words);
        let num_entities = self.entity_vars.len();
        let width = self.var_columns.len();
        let mut out = IdTable::new(width, ctx.budget());
        let mut row = vec![Id::UNDEFINED; width];

        for (i, &record) in records.iter().enumerate() {
            if i % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            let entities = ctx.index().entities_in_record(record);
            for &joined in entities {
                let Some(filter_rows) = by_entity.get(&joined) else {
                    continue;
                };
                // The remaining entity variables cross over the record's
                // entities.
                let extra = num_entities - 1;
                let mut counters = vec![0usize; extra];
                loop {
                    row[0] = record;
                    row[1] = joined;
                    for (k, &c) in counters.iter().enumerate() {
                        row[2 + k] = entities[c];
                    }
                    for &fr in filter_rows {
                        let mut outc = 1 + num_entities;
                        for c in 0..ft.width() {
                            if c == self.filter_col {
                                continue;
                            }
                            row[outc] = ft.at(fr, c);
                            outc += 1;
                        }
                        out.push_row(&row)?;
                    }
                    if extra == 0 {
                        break;
                    }
                    let mut pos = extra;
                    let mut done = false;
                    loop {
                        if pos == 0 {
                            done = true;
                            break;
                        }
                        pos -= 1;
                        counters[pos] += 1;
                        if counters[pos] < entities.len() {
                            break;
                        }
                        counters[pos] = 0;
                    }
                    if done {
                        break;
                    }
                }
            }
        }
        Ok(ResultTable::freeze(
            out,
            Vec::new(),
            ft.local_vocab().clone(),
        ))
    }
}
