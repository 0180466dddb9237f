//! Column-major tables of [`Id`]s.
//!
//! [`IdTable`] is the mutable building block operators fill while
//! computing; [`ResultTable`] freezes one together with its sort order and
//! local vocabulary. A frozen table is immutable; once published to the
//! result cache it is shared by reference and never touched again.
//!
//! Table memory is charged against the shared [`MemoryBudget`], so a query
//! that materialises more than the global limit fails with an allocation
//! error instead of exhausting the process.

use crate::alloc::{AllocError, MemoryBudget, MemoryCharge};
use crate::id::Id;
use crate::local_vocab::LocalVocab;

/// Mutable column-major table.
#[derive(Debug)]
pub struct IdTable {
    columns: Vec<Vec<Id>>,
    num_rows: usize,
    charge: MemoryCharge,
}

impl IdTable {
    /// Create an empty table with `width` columns, charging against
    /// `budget` as rows are appended.
    pub fn new(width: usize, budget: &MemoryBudget) -> Self {
        Self {
            columns: (0..width).map(|_| Vec::new()).collect(),
            num_rows: 0,
            charge: budget.open_charge(),
        }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Append a row. `row.len()` must equal `width()`.
    pub fn push_row(&mut self, row: &[Id]) -> Result<(), AllocError> {
        debug_assert_eq!(row.len(), self.width());
        self.charge.grow(row.len() * std::mem::size_of::<Id>())?;
        for (column, &id) in self.columns.iter_mut().zip(row) {
            column.push(id);
        }
        self.num_rows += 1;
        Ok(())
    }

    /// Reserve room for `additional` rows (the charge is still taken per
    /// appended row).
    pub fn reserve(&mut self, additional: usize) {
        for column in &mut self.columns {
            column.reserve(additional);
        }
    }

    /// The cell at `(row, col)`.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> Id {
        self.columns[col][row]
    }

    /// A full column.
    #[inline]
    pub fn column(&self, col: usize) -> &[Id] {
        &self.columns[col]
    }

    /// Materialise one row.
    pub fn row(&self, row: usize) -> Vec<Id> {
        self.columns.iter().map(|c| c[row]).collect()
    }

    /// Reorder rows in place according to `perm`, where `perm[i]` is the
    /// source row for destination row `i`.
    pub fn permute_rows(&mut self, perm: &[usize]) {
        debug_assert_eq!(perm.len(), self.num_rows);
        for column in &mut self.columns {
            let reordered: Vec<Id> = perm.iter().map(|&i| column[i]).collect();
            *column = reordered;
        }
    }
}

/// Immutable result of one operator computation.
///
/// Carries the table data, the guaranteed sort prefix (`sorted_on` is a
/// possibly-empty list of column indices the rows are lexicographically
/// ordered by), and the local vocabulary for strings outside the global
/// index.
#[derive(Debug)]
pub struct ResultTable {
    table: IdTable,
    sorted_on: Vec<usize>,
    local_vocab: LocalVocab,
}

impl ResultTable {
    /// Freeze `table` with its sort order and local vocabulary.
    pub fn freeze(table: IdTable, sorted_on: Vec<usize>, local_vocab: LocalVocab) -> Self {
        debug_assert!(sorted_on.iter().all(|&c| c < table.width()));
        Self {
            table,
            sorted_on,
            local_vocab,
        }
    }

    /// An empty zero-column, zero-row result.
    pub fn empty(budget: &MemoryBudget) -> Self {
        Self::freeze(IdTable::new(0, budget), Vec::new(), LocalVocab::new())
    }

    pub fn width(&self) -> usize {
        self.table.width()
    }

    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The `rows × columns` size metric used by the result cache.
    pub fn size_metric(&self) -> usize {
        self.num_rows() * self.width()
    }

    /// Sort prefix guaranteed by the producing operator.
    pub fn sorted_on(&self) -> &[usize] {
        &self.sorted_on
    }

    pub fn local_vocab(&self) -> &LocalVocab {
        &self.local_vocab
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> Id {
        self.table.at(row, col)
    }

    #[inline]
    pub fn column(&self, col: usize) -> &[Id] {
        self.table.column(col)
    }

    pub fn row(&self, row: usize) -> Vec<Id> {
        self.table.row(row)
    }

    /// Resolve an id to a string: local-vocab ids through the local
    /// vocabulary, everything else through the caller's global lookup.
    pub fn resolve_local(&self, id: Id) -> Option<&str> {
        self.local_vocab.lookup(id).map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> MemoryBudget {
        MemoryBudget::unlimited()
    }

    #[test]
    fn test_push_and_access() {
        let b = budget();
        let mut t = IdTable::new(2, &b);
        t.push_row(&[Id::from_int(1), Id::from_int(2)]).unwrap();
        t.push_row(&[Id::from_int(3), Id::from_int(4)]).unwrap();
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.at(1, 0), Id::from_int(3));
        assert_eq!(t.column(1), &[Id::from_int(2), Id::from_int(4)]);
    }

    #[test]
    fn test_zero_column_rows() {
        let b = budget();
        let mut t = IdTable::new(0, &b);
        t.push_row(&[]).unwrap();
        assert_eq!(t.num_rows(), 1);
        assert_eq!(t.width(), 0);
        let frozen = ResultTable::freeze(t, Vec::new(), LocalVocab::new());
        assert_eq!(frozen.size_metric(), 0);
        assert_eq!(frozen.num_rows(), 1);
    }

    #[test]
    fn test_budget_enforced() {
        let b = MemoryBudget::new(24);
        let mut t = IdTable::new(2, &b);
        t.push_row(&[Id::UNDEFINED, Id::UNDEFINED]).unwrap();
        let err = t.push_row(&[Id::UNDEFINED, Id::UNDEFINED]).unwrap_err();
        assert_eq!(err.requested, 16);
        drop(t);
        assert_eq!(b.used(), 0);
    }

    #[test]
    fn test_permute_rows() {
        let b = budget();
        let mut t = IdTable::new(1, &b);
        for v in [3i64, 1, 2] {
            t.push_row(&[Id::from_int(v)]).unwrap();
        }
        t.permute_rows(&[1, 2, 0]);
        let got: Vec<i64> = t.column(0).iter().map(|id| id.as_int().unwrap()).collect();
        assert_eq!(got, vec![1, 2, 3]);
    }
}
