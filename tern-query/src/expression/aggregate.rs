//! Aggregate evaluation.
//!
//! An aggregate reduces the operand values of the current evaluation
//! context with a binary combine step and an optional final operation
//! (AVG divides by the element count; the others finish with the
//! reduction itself). Evaluation order:
//!
//! 1. determine the input size from the context,
//! 2. use the interval-set fast path when one applies,
//! 3. otherwise produce operand values row by row,
//! 4. non-distinct: fold `combine` over the getter outputs,
//! 5. distinct: hash operands *before* the value getter into a
//!    memory-bounded set and only combine on first insertion,
//! 6. wrap numeric scalars into tagged ids.
//!
//! Hashing before the getter matters: `COUNT(DISTINCT ?x)` over three
//! different strings sees the getter return `1` three times, but there
//! are still three distinct inputs.

use super::value::{EvaluationContext, ExpressionResult, Numeric, Value};
use crate::error::{QueryError, Result};
use hashbrown::HashSet;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use tern_core::{Id, MemoryBudget, MemoryCharge};

/// How often the per-row loops poll the deadline.
const DEADLINE_STRIDE: usize = 256;

/// The supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    pub const fn name(self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        }
    }
}

/// Evaluate `kind` over the operand result within `ctx`'s row range.
pub(super) fn evaluate_aggregate(
    kind: AggregateKind,
    distinct: bool,
    operand: &ExpressionResult,
    ctx: &EvaluationContext<'_>,
) -> Result<Value> {
    let input_size = ctx.num_rows();

    // Interval-set fast path: a boolean result over rows counts in O(1).
    if kind == AggregateKind::Count && !distinct {
        if let ExpressionResult::Intervals(set) = operand {
            return Ok(Numeric::Int(set.total_len() as i64).into_value());
        }
    }

    if input_size == 0 {
        return Ok(empty_input_result(kind));
    }

    if distinct {
        evaluate_distinct(kind, operand, ctx, input_size)
    } else {
        evaluate_plain(kind, operand, ctx, input_size)
    }
}

/// The result over zero input rows.
fn empty_input_result(kind: AggregateKind) -> Value {
    match kind {
        AggregateKind::Count => Numeric::Int(0).into_value(),
        AggregateKind::Sum => Numeric::Int(0).into_value(),
        AggregateKind::Avg | AggregateKind::Min | AggregateKind::Max => Value::UNDEF,
    }
}

fn evaluate_plain(
    kind: AggregateKind,
    operand: &ExpressionResult,
    ctx: &EvaluationContext<'_>,
    input_size: usize,
) -> Result<Value> {
    match kind {
        AggregateKind::Count => {
            let mut count = 0i64;
            for offset in 0..input_size {
                check_stride(ctx, offset)?;
                count += is_valid(&operand.value_at(ctx, offset));
            }
            Ok(Numeric::Int(count).into_value())
        }
        AggregateKind::Sum | AggregateKind::Avg => {
            let mut sum = operand.value_at(ctx, 0).as_numeric();
            for offset in 1..input_size {
                check_stride(ctx, offset)?;
                sum = sum.add(operand.value_at(ctx, offset).as_numeric());
            }
            if kind == AggregateKind::Avg {
                sum = sum.div(Numeric::Double(input_size as f64));
            }
            Ok(sum.into_value())
        }
        AggregateKind::Min | AggregateKind::Max => {
            let mut best = operand.value_at(ctx, 0);
            for offset in 1..input_size {
                check_stride(ctx, offset)?;
                best = min_max_combine(best, operand.value_at(ctx, offset), kind)?;
            }
            Ok(best)
        }
    }
}

fn evaluate_distinct(
    kind: AggregateKind,
    operand: &ExpressionResult,
    ctx: &EvaluationContext<'_>,
    input_size: usize,
) -> Result<Value> {
    let mut seen = BoundedValueSet::new(ctx.budget);
    let mut acc: Option<AggregateAcc> = None;

    for offset in 0..input_size {
        check_stride(ctx, offset)?;
        let value = operand.value_at(ctx, offset);
        if !seen.insert(value.clone())? {
            continue;
        }
        acc = Some(match acc.take() {
            None => AggregateAcc::seed(kind, &value),
            Some(a) => a.combine(kind, value)?,
        });
    }

    let acc = acc.expect("input_size > 0 implies at least one insertion");
    Ok(acc.finish(kind, seen.len()))
}

/// Running reduction state.
enum AggregateAcc {
    Count(i64),
    Numeric(Numeric),
    Value(Value),
}

impl AggregateAcc {
    fn seed(kind: AggregateKind, value: &Value) -> Self {
        match kind {
            AggregateKind::Count => AggregateAcc::Count(is_valid(value)),
            AggregateKind::Sum | AggregateKind::Avg => AggregateAcc::Numeric(value.as_numeric()),
            AggregateKind::Min | AggregateKind::Max => AggregateAcc::Value(value.clone()),
        }
    }

    fn combine(self, kind: AggregateKind, value: Value) -> Result<Self> {
        Ok(match (self, kind) {
            (AggregateAcc::Count(c), AggregateKind::Count) => {
                AggregateAcc::Count(c + is_valid(&value))
            }
            (AggregateAcc::Numeric(n), AggregateKind::Sum | AggregateKind::Avg) => {
                AggregateAcc::Numeric(n.add(value.as_numeric()))
            }
            (AggregateAcc::Value(best), AggregateKind::Min | AggregateKind::Max) => {
                AggregateAcc::Value(min_max_combine(best, value, kind)?)
            }
            _ => return Err(QueryError::Internal("aggregate accumulator mixed up".into())),
        })
    }

    fn finish(self, kind: AggregateKind, distinct_count: usize) -> Value {
        match self {
            AggregateAcc::Count(c) => Numeric::Int(c).into_value(),
            AggregateAcc::Numeric(n) => {
                let n = if kind == AggregateKind::Avg {
                    n.div(Numeric::Double(distinct_count as f64))
                } else {
                    n
                };
                n.into_value()
            }
            AggregateAcc::Value(v) => v,
        }
    }
}

/// The COUNT value getter: is the operand bound and valid?
fn is_valid(value: &Value) -> i64 {
    if value.is_undefined() {
        0
    } else {
        1
    }
}

/// The MIN/MAX combine step.
///
/// For two ids, `Undefined` is absorbing: its bit pattern is all zeros,
/// so a bitwise OR selects the other operand. Mixed datatypes compare by
/// tag, then payload. Arithmetic values compare numerically and strings
/// byte-wise; incomparable kinds are a type mismatch.
fn min_max_combine(a: Value, b: Value, kind: AggregateKind) -> Result<Value> {
    let take_min = kind == AggregateKind::Min;
    if let (Value::Id(x), Value::Id(y)) = (&a, &b) {
        if x.is_undefined() || y.is_undefined() {
            return Ok(Value::Id(Id::from_bits(x.bits() | y.bits())));
        }
        let keep_a = match x.compare_by_type(*y) {
            Ordering::Less => take_min,
            Ordering::Greater => !take_min,
            Ordering::Equal => true,
        };
        return Ok(if keep_a { a } else { b });
    }
    if a.is_undefined() {
        return Ok(b);
    }
    if b.is_undefined() {
        return Ok(a);
    }
    match a.compare(&b) {
        Some(Ordering::Less) => Ok(if take_min { a } else { b }),
        Some(Ordering::Greater) => Ok(if take_min { b } else { a }),
        Some(Ordering::Equal) => Ok(a),
        None => Err(QueryError::TypeMismatch(format!(
            "{} cannot compare {:?} with {:?}",
            kind.name(),
            a,
            b
        ))),
    }
}

#[inline]
fn check_stride(ctx: &EvaluationContext<'_>, offset: usize) -> Result<()> {
    if offset % DEADLINE_STRIDE == 0 {
        ctx.deadline.check()?;
    }
    Ok(())
}

/// A [`Value`] with bitwise hashing for doubles, usable as a distinct
/// key.
#[derive(Debug, Clone, PartialEq)]
struct HashableValue(Value);

impl Eq for HashableValue {}

impl Hash for HashableValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Id(id) => (0u8, id.bits()).hash(state),
            Value::Int(i) => (1u8, *i).hash(state),
            Value::Double(d) => (2u8, d.to_bits()).hash(state),
            Value::Bool(b) => (3u8, *b).hash(state),
            Value::Str(s) => (4u8, s.as_bytes()).hash(state),
        }
    }
}

/// Hash set of operand values charged against the shared memory budget.
struct BoundedValueSet {
    set: HashSet<HashableValue>,
    charge: MemoryCharge,
}

/// Approximate per-entry footprint (value + bucket overhead).
const ENTRY_FOOTPRINT: usize = std::mem::size_of::<HashableValue>() + 16;

impl BoundedValueSet {
    fn new(budget: &MemoryBudget) -> Self {
        Self {
            set: HashSet::new(),
            charge: budget.open_charge(),
        }
    }

    /// Insert; `Ok(true)` on first insertion.
    fn insert(&mut self, value: Value) -> Result<bool> {
        let wrapped = HashableValue(value);
        if self.set.contains(&wrapped) {
            return Ok(false);
        }
        self.charge.grow(ENTRY_FOOTPRINT)?;
        self.set.insert(wrapped);
        Ok(true)
    }

    fn len(&self) -> usize {
        self.set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Deadline;
    use crate::var_map::VariableColumns;
    use tern_core::{IdTable, LocalVocab, ResultTable};

    fn table_of(ids: &[Id]) -> ResultTable {
        let budget = MemoryBudget::unlimited();
        let mut t = IdTable::new(1, &budget);
        for &id in ids {
            t.push_row(&[id]).unwrap();
        }
        ResultTable::freeze(t, vec![], LocalVocab::new())
    }

    fn eval_over(kind: AggregateKind, distinct: bool, ids: &[Id]) -> Result<Value> {
        let table = table_of(ids);
        let vars = VariableColumns::new();
        let budget = MemoryBudget::unlimited();
        let deadline = Deadline::none();
        let ctx = EvaluationContext::over_table(&table, &vars, &budget, &deadline);
        evaluate_aggregate(kind, distinct, &ExpressionResult::Column(0), &ctx)
    }

    #[test]
    fn test_count_empty_is_zero() {
        let v = eval_over(AggregateKind::Count, false, &[]).unwrap();
        assert_eq!(v, Value::Id(Id::from_int(0)));
    }

    #[test]
    fn test_avg_empty_is_undefined() {
        let v = eval_over(AggregateKind::Avg, false, &[]).unwrap();
        assert!(v.is_undefined());
    }

    #[test]
    fn test_count_skips_undefined() {
        let v = eval_over(
            AggregateKind::Count,
            false,
            &[Id::from_int(1), Id::UNDEFINED, Id::from_int(2)],
        )
        .unwrap();
        assert_eq!(v, Value::Id(Id::from_int(2)));
    }

    #[test]
    fn test_count_distinct() {
        let p1 = Id::from_vocab(10);
        let p2 = Id::from_vocab(20);
        let v = eval_over(AggregateKind::Count, true, &[p1, p2, p1]).unwrap();
        assert_eq!(v, Value::Id(Id::from_int(2)));
    }

    #[test]
    fn test_sum_and_avg() {
        let ids = [Id::from_int(1), Id::from_int(2), Id::from_int(3)];
        assert_eq!(
            eval_over(AggregateKind::Sum, false, &ids).unwrap(),
            Value::Id(Id::from_int(6))
        );
        assert_eq!(
            eval_over(AggregateKind::Avg, false, &ids).unwrap(),
            Value::Id(Id::from_double(2.0))
        );
    }

    #[test]
    fn test_sum_poisoned_by_not_numeric() {
        let ids = [Id::from_int(1), Id::from_vocab(5)];
        let v = eval_over(AggregateKind::Sum, false, &ids).unwrap();
        assert!(v.is_undefined());
    }

    #[test]
    fn test_min_max_with_undefined_absorption() {
        let ids = [Id::UNDEFINED, Id::from_int(3), Id::from_int(1)];
        assert_eq!(
            eval_over(AggregateKind::Min, false, &ids).unwrap(),
            Value::Id(Id::from_int(1))
        );
        assert_eq!(
            eval_over(AggregateKind::Max, false, &ids).unwrap(),
            Value::Id(Id::from_int(3))
        );
    }

    #[test]
    fn test_min_mixed_datatypes_by_tag() {
        // Int tag sorts before VocabIndex tag.
        let ids = [Id::from_vocab(0), Id::from_int(100)];
        assert_eq!(
            eval_over(AggregateKind::Min, false, &ids).unwrap(),
            Value::Id(Id::from_int(100))
        );
    }

    #[test]
    fn test_count_interval_fast_path() {
        let table = table_of(&[Id::from_int(0); 10]);
        let vars = VariableColumns::new();
        let budget = MemoryBudget::unlimited();
        let deadline = Deadline::none();
        let ctx = EvaluationContext::over_table(&table, &vars, &budget, &deadline);
        let set = super::super::value::IntervalSet::new(vec![(0, 3), (7, 9)]);
        let v = evaluate_aggregate(
            AggregateKind::Count,
            false,
            &ExpressionResult::Intervals(set),
            &ctx,
        )
        .unwrap();
        assert_eq!(v, Value::Id(Id::from_int(5)));
    }

    #[test]
    fn test_distinct_set_respects_budget() {
        let table = table_of(&(0..1000).map(Id::from_int).collect::<Vec<_>>());
        let vars = VariableColumns::new();
        let budget = MemoryBudget::new(200);
        let deadline = Deadline::none();
        let ctx = EvaluationContext {
            table: &table,
            var_columns: &vars,
            begin: 0,
            end: table.num_rows(),
            budget: &budget,
            deadline: &deadline,
        };
        let err = evaluate_aggregate(
            AggregateKind::Count,
            true,
            &ExpressionResult::Column(0),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::AllocationLimitExceeded(_)));
    }
}
