//! Inline VALUES tables.

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::ir::{ValueTerm, ValuesClause};
use crate::operator::{ExecutionTree, Operation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use tern_core::{Id, IdTable, LocalVocab, ResultTable};

/// Materialises an inline table. IRIs and literals resolve through the
/// global vocabulary where possible and land in the result-local
/// vocabulary otherwise; `UNDEF` entries stay unbound.
#[derive(Debug)]
pub struct Values {
    clause: ValuesClause,
    var_columns: VariableColumns,
}

impl Values {
    pub fn new(_ctx: &ExecutionContext, clause: ValuesClause) -> Self {
        let var_columns = VariableColumns::from_ordered(clause.variables.iter().cloned());
        Self {
            clause,
            var_columns,
        }
    }
}

fn term_key(term: &Option<ValueTerm>) -> String {
    match term {
        None => "U".to_owned(),
        Some(ValueTerm::Iri(s)) => format!("i<{s}>"),
        Some(ValueTerm::Literal(s)) => format!("l<{s}>"),
        Some(ValueTerm::Int(v)) => format!("n{v}"),
        Some(ValueTerm::Double(v)) => format!("d{}", v.to_bits()),
        Some(ValueTerm::Bool(v)) => format!("b{v}"),
    }
}

#[async_trait]
impl Operation for Values {
    fn name(&self) -> &'static str {
        "Values"
    }

    fn cache_key(&self) -> String {
        let rows: Vec<String> = self
            .clause
            .rows
            .iter()
            .map(|row| {
                let cells: Vec<String> = row.iter().map(term_key).collect();
                cells.join(",")
            })
            .collect();
        format!(
            "VALUES width={} rows=[{}]",
            self.clause.variables.len(),
            rows.join(";")
        )
    }

    fn estimated_size(&self) -> usize {
        self.clause.rows.len()
    }

    fn cost_estimate(&self) -> usize {
        self.clause.rows.len()
    }

    fn variable_columns(&self) -> &VariableColumns {
        &self.var_columns
    }

    fn result_sorted_on(&self) -> &[usize] {
        &[]
    }

    fn children(&self) -> Vec<&ExecutionTree> {
        Vec::new()
    }

    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable> {
        let mut vocab = LocalVocab::new();
        let mut table = IdTable::new(self.clause.variables.len(), ctx.budget());
        let mut row = Vec::with_capacity(self.clause.variables.len());
        for (i, entries) in self.clause.rows.iter().enumerate() {
            if i % super::BATCH_CHECK == 0 {
                ctx.check_deadline()?;
            }
            row.clear();
            for entry in entries {
                row.push(match entry {
                    None => Id::UNDEFINED,
                    Some(ValueTerm::Int(v)) => Id::from_int(*v),
                    Some(ValueTerm::Double(v)) => Id::from_double(*v),
                    Some(ValueTerm::Bool(v)) => Id::from_bool(*v),
                    Some(ValueTerm::Iri(term)) | Some(ValueTerm::Literal(term)) => ctx
                        .index()
                        .vocab_id(term)
                        .unwrap_or_else(|| vocab.intern(term)),
                });
            }
            table.push_row(&row)?;
        }
        Ok(ResultTable::freeze(table, Vec::new(), vocab))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use crate::ir::Variable;
    use std::sync::Arc;
    use tern_core::MemoryIndex;

    #[tokio::test]
    async fn test_values_resolution() {
        let mut b = MemoryIndex::builder();
        b.add_triple("<a>", "<p>", "<o>");
        let ctx = ExecutionContext::new(
            Arc::new(b.build()),
            Arc::new(ResultCache::new(1000, 1000, 100)),
            &EngineConfig::default(),
        )
        .unwrap();

        let clause = ValuesClause {
            variables: vec![Variable::new("?x"), Variable::new("?y")],
            rows: vec![
                vec![Some(ValueTerm::Iri("<a>".into())), None],
                vec![
                    Some(ValueTerm::Iri("<unknown>".into())),
                    Some(ValueTerm::Int(7)),
                ],
            ],
        };
        let tree = ExecutionTree::new(Values::new(&ctx, clause));
        let result = tree.get_result(&ctx).await.unwrap();
        assert_eq!(result.table.num_rows(), 2);
        // Known IRI resolves globally.
        assert_eq!(
            result.table.at(0, 0),
            ctx.index().vocab_id("<a>").unwrap()
        );
        // UNDEF stays unbound.
        assert!(result.table.at(0, 1).is_undefined());
        // Unknown IRI lands in the local vocabulary.
        let local = result.table.at(1, 0);
        assert!(local.is_local_vocab());
        assert_eq!(result.table.resolve_local(local), Some("<unknown>"));
        assert_eq!(result.table.at(1, 1), Id::from_int(7));
    }
}
