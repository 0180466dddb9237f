//! Runtime values, numeric coercion, and expression results.

use crate::deadline::Deadline;
use crate::var_map::VariableColumns;
use std::cmp::Ordering;
use std::sync::Arc;
use tern_core::{Datatype, Id, MemoryBudget, ResultTable};

/// A typed value flowing through the expression evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A tagged id (possibly `UNDEFINED`).
    Id(Id),
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(Arc<str>),
}

impl Value {
    /// The unbound value.
    pub const UNDEF: Value = Value::Id(Id::UNDEFINED);

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Id(id) if id.is_undefined())
    }

    /// Numeric view of this value; ids decode their payload.
    pub fn as_numeric(&self) -> Numeric {
        match self {
            Value::Int(i) => Numeric::Int(*i),
            Value::Double(d) => Numeric::Double(*d),
            Value::Bool(_) | Value::Str(_) => Numeric::NotNumeric,
            Value::Id(id) => match id.datatype() {
                Datatype::Int => Numeric::Int(id.as_int().unwrap()),
                Datatype::Double => Numeric::Double(id.as_double().unwrap()),
                _ => Numeric::NotNumeric,
            },
        }
    }

    /// Effective boolean value (SPARQL EBV, reduced to the tern type set).
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(d) => *d != 0.0 && !d.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Id(id) => match id.datatype() {
                Datatype::Undefined => false,
                Datatype::Bool => id.payload() != 0,
                Datatype::Int => id.as_int().unwrap() != 0,
                Datatype::Double => {
                    let d = id.as_double().unwrap();
                    d != 0.0 && !d.is_nan()
                }
                _ => true,
            },
        }
    }

    /// Compare two values. Numerics compare numerically across `Int` /
    /// `Double`; strings compare byte-wise (locale-agnostic); two ids
    /// compare by datatype then payload. `None` when the kinds are not
    /// comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if let (Value::Str(a), Value::Str(b)) = (self, other) {
            return Some(a.as_bytes().cmp(b.as_bytes()));
        }
        if let (Value::Bool(a), Value::Bool(b)) = (self, other) {
            return Some(a.cmp(b));
        }
        match (self.as_numeric(), other.as_numeric()) {
            (Numeric::NotNumeric, _) | (_, Numeric::NotNumeric) => match (self, other) {
                (Value::Id(a), Value::Id(b)) => Some(a.compare_by_type(*b)),
                _ => None,
            },
            (a, b) => a.compare(&b),
        }
    }
}

/// Result of numeric coercion. `NotNumeric` is absorbing: any operation
/// involving it yields `NotNumeric` and poisons SUM/AVG.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    NotNumeric,
    Int(i64),
    Double(f64),
}

impl Numeric {
    pub fn add(self, other: Numeric) -> Numeric {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => Numeric::Int(a.wrapping_add(b)),
            (Numeric::Int(a), Numeric::Double(b)) => Numeric::Double(a as f64 + b),
            (Numeric::Double(a), Numeric::Int(b)) => Numeric::Double(a + b as f64),
            (Numeric::Double(a), Numeric::Double(b)) => Numeric::Double(a + b),
            _ => Numeric::NotNumeric,
        }
    }

    pub fn sub(self, other: Numeric) -> Numeric {
        self.add(other.negate())
    }

    pub fn mul(self, other: Numeric) -> Numeric {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => Numeric::Int(a.wrapping_mul(b)),
            (Numeric::Int(a), Numeric::Double(b)) => Numeric::Double(a as f64 * b),
            (Numeric::Double(a), Numeric::Int(b)) => Numeric::Double(a * b as f64),
            (Numeric::Double(a), Numeric::Double(b)) => Numeric::Double(a * b),
            _ => Numeric::NotNumeric,
        }
    }

    /// Division always produces a double (or `NotNumeric`).
    pub fn div(self, other: Numeric) -> Numeric {
        let a = match self {
            Numeric::Int(i) => i as f64,
            Numeric::Double(d) => d,
            Numeric::NotNumeric => return Numeric::NotNumeric,
        };
        let b = match other {
            Numeric::Int(i) => i as f64,
            Numeric::Double(d) => d,
            Numeric::NotNumeric => return Numeric::NotNumeric,
        };
        if b == 0.0 {
            return Numeric::NotNumeric;
        }
        Numeric::Double(a / b)
    }

    pub fn negate(self) -> Numeric {
        match self {
            Numeric::Int(i) => Numeric::Int(-i),
            Numeric::Double(d) => Numeric::Double(-d),
            Numeric::NotNumeric => Numeric::NotNumeric,
        }
    }

    pub fn compare(&self, other: &Numeric) -> Option<Ordering> {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => Some(a.cmp(b)),
            (Numeric::Int(a), Numeric::Double(b)) => (*a as f64).partial_cmp(b),
            (Numeric::Double(a), Numeric::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Numeric::Double(a), Numeric::Double(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Wrap a numeric scalar into a tagged id.
    pub fn into_value(self) -> Value {
        match self {
            Numeric::Int(i) => Value::Id(Id::from_int(i)),
            Numeric::Double(d) => Value::Id(Id::from_double(d)),
            Numeric::NotNumeric => Value::UNDEF,
        }
    }
}

/// Sorted, disjoint, half-open row-index ranges. The run-length encoded
/// representation of a boolean result over rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<(usize, usize)>,
}

impl IntervalSet {
    /// Build from sorted, disjoint half-open intervals. Empty and
    /// touching intervals are normalised away.
    pub fn new(intervals: Vec<(usize, usize)>) -> Self {
        let mut normalised: Vec<(usize, usize)> = Vec::with_capacity(intervals.len());
        for (start, end) in intervals {
            if start >= end {
                continue;
            }
            match normalised.last_mut() {
                Some((_, last_end)) if *last_end >= start => *last_end = (*last_end).max(end),
                _ => normalised.push((start, end)),
            }
        }
        Self {
            intervals: normalised,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Total number of covered rows.
    pub fn total_len(&self) -> usize {
        self.intervals.iter().map(|(s, e)| e - s).sum()
    }

    pub fn contains(&self, row: usize) -> bool {
        self.intervals
            .binary_search_by(|&(s, e)| {
                if row < s {
                    Ordering::Greater
                } else if row >= e {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .is_ok()
    }

    pub fn intervals(&self) -> &[(usize, usize)] {
        &self.intervals
    }

    /// Iterate all covered rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.intervals.iter().flat_map(|&(s, e)| s..e)
    }

    /// Rows of `[begin, end)` not covered by `self`.
    pub fn complement(&self, begin: usize, end: usize) -> IntervalSet {
        let mut result = Vec::new();
        let mut cursor = begin;
        for &(s, e) in &self.intervals {
            if s > cursor {
                result.push((cursor, s.min(end)));
            }
            cursor = cursor.max(e);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            result.push((cursor, end));
        }
        IntervalSet::new(result)
    }

    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let (a_s, a_e) = self.intervals[i];
            let (b_s, b_e) = other.intervals[j];
            let start = a_s.max(b_s);
            let end = a_e.min(b_e);
            if start < end {
                result.push((start, end));
            }
            if a_e <= b_e {
                i += 1;
            } else {
                j += 1;
            }
        }
        IntervalSet::new(result)
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut merged: Vec<(usize, usize)> = self
            .intervals
            .iter()
            .chain(other.intervals.iter())
            .copied()
            .collect();
        merged.sort_unstable();
        IntervalSet::new(merged)
    }
}

/// The result of evaluating an expression over the rows of an evaluation
/// context: a broadcast constant, a reference to an input column, a
/// buffer of per-row values, or an interval set over row indices.
#[derive(Debug, Clone)]
pub enum ExpressionResult {
    Constant(Value),
    Column(usize),
    /// One value per context row, in row order.
    Values(Vec<Value>),
    /// Absolute row indices where the (boolean) result is true.
    Intervals(IntervalSet),
}

/// The rows and bindings an expression is evaluated over.
pub struct EvaluationContext<'a> {
    pub table: &'a ResultTable,
    pub var_columns: &'a VariableColumns,
    /// First row (inclusive).
    pub begin: usize,
    /// Last row (exclusive).
    pub end: usize,
    pub budget: &'a MemoryBudget,
    pub deadline: &'a Deadline,
}

impl<'a> EvaluationContext<'a> {
    /// Context over the whole table.
    pub fn over_table(
        table: &'a ResultTable,
        var_columns: &'a VariableColumns,
        budget: &'a MemoryBudget,
        deadline: &'a Deadline,
    ) -> Self {
        Self {
            table,
            var_columns,
            begin: 0,
            end: table.num_rows(),
            budget,
            deadline,
        }
    }

    /// Number of input rows.
    pub fn num_rows(&self) -> usize {
        self.end - self.begin
    }
}

impl ExpressionResult {
    /// The value for context-relative row `offset`.
    pub fn value_at(&self, ctx: &EvaluationContext<'_>, offset: usize) -> Value {
        match self {
            ExpressionResult::Constant(v) => v.clone(),
            ExpressionResult::Column(col) => Value::Id(ctx.table.at(ctx.begin + offset, *col)),
            ExpressionResult::Values(values) => values[offset].clone(),
            ExpressionResult::Intervals(set) => Value::Bool(set.contains(ctx.begin + offset)),
        }
    }

    /// The boolean value for context-relative row `offset`.
    pub fn truthy_at(&self, ctx: &EvaluationContext<'_>, offset: usize) -> bool {
        match self {
            ExpressionResult::Intervals(set) => set.contains(ctx.begin + offset),
            other => other.value_at(ctx, offset).truthy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_poisoning() {
        let sum = Numeric::Int(1)
            .add(Numeric::NotNumeric)
            .add(Numeric::Int(5));
        assert_eq!(sum, Numeric::NotNumeric);
        assert_eq!(sum.into_value(), Value::UNDEF);
    }

    #[test]
    fn test_numeric_mixed_add() {
        assert_eq!(
            Numeric::Int(1).add(Numeric::Double(0.5)),
            Numeric::Double(1.5)
        );
    }

    #[test]
    fn test_value_compare_cross_kind() {
        assert_eq!(
            Value::Int(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Id(Id::from_int(3)).compare(&Value::Int(3)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Str("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_interval_set_normalisation() {
        let set = IntervalSet::new(vec![(0, 2), (2, 4), (6, 6), (8, 10)]);
        assert_eq!(set.intervals(), &[(0, 4), (8, 10)]);
        assert_eq!(set.total_len(), 6);
        assert!(set.contains(3));
        assert!(!set.contains(5));
    }

    #[test]
    fn test_interval_set_algebra() {
        let a = IntervalSet::new(vec![(0, 5), (10, 15)]);
        let b = IntervalSet::new(vec![(3, 12)]);
        assert_eq!(a.intersect(&b).intervals(), &[(3, 5), (10, 12)]);
        assert_eq!(a.union(&b).intervals(), &[(0, 15)]);
        assert_eq!(a.complement(0, 20).intervals(), &[(5, 10), (15, 20)]);
    }
}
