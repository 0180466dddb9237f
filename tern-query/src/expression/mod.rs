//! Expression trees and their evaluator.
//!
//! Expressions are a sealed set: variable references, literals, unary
//! and binary scalar operations, and the aggregates. Every node exposes
//! the same capability surface — evaluate over a row range, enumerate
//! children, report unaggregated variables, produce a deterministic
//! cache key, and (for COUNT) reveal the counted variable for the
//! pattern-trick analysis.

pub mod aggregate;
pub mod value;

pub use aggregate::AggregateKind;
pub use value::{EvaluationContext, ExpressionResult, IntervalSet, Numeric, Value};

use crate::error::{QueryError, Result};
use crate::ir::Variable;
use crate::var_map::VariableColumns;
use std::cmp::Ordering;

/// Unary scalar operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Minus,
}

/// Binary scalar operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

/// A scalar or aggregate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A constant value.
    Literal(Value),
    /// A variable reference, resolved to a column at evaluation time.
    Variable(Variable),
    Unary {
        op: UnaryOp,
        child: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Aggregate {
        kind: AggregateKind,
        distinct: bool,
        child: Box<Expression>,
    },
}

impl Expression {
    pub fn variable(name: impl AsRef<str>) -> Self {
        Expression::Variable(Variable::new(name))
    }

    pub fn int(value: i64) -> Self {
        Expression::Literal(Value::Int(value))
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn aggregate(kind: AggregateKind, distinct: bool, child: Expression) -> Self {
        Expression::Aggregate {
            kind,
            distinct,
            child: Box::new(child),
        }
    }

    /// Direct children of this node.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal(_) | Expression::Variable(_) => Vec::new(),
            Expression::Unary { child, .. } | Expression::Aggregate { child, .. } => {
                vec![child]
            }
            Expression::Binary { left, right, .. } => vec![left, right],
        }
    }

    /// True when any descendant is an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expression::Aggregate { .. } => true,
            other => other.children().iter().any(|c| c.contains_aggregate()),
        }
    }

    /// Variables not enclosed by an aggregate, in first-occurrence order.
    pub fn unaggregated_variables(&self) -> Vec<Variable> {
        let mut vars = Vec::new();
        self.collect_unaggregated(&mut vars);
        vars
    }

    fn collect_unaggregated(&self, out: &mut Vec<Variable>) {
        match self {
            Expression::Variable(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Expression::Aggregate { .. } => {}
            other => {
                for child in other.children() {
                    child.collect_unaggregated(out);
                }
            }
        }
    }

    /// All variables, aggregated or not.
    pub fn all_variables(&self) -> Vec<Variable> {
        let mut vars = Vec::new();
        self.collect_all(&mut vars);
        vars
    }

    fn collect_all(&self, out: &mut Vec<Variable>) {
        match self {
            Expression::Variable(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            other => {
                for child in other.children() {
                    child.collect_all(out);
                }
            }
        }
    }

    /// For `COUNT(?x)` (or `COUNT(DISTINCT ?x)`): the counted variable
    /// and the distinctness. Drives the pattern-trick analysis.
    pub fn variable_for_count(&self) -> Option<(Variable, bool)> {
        match self {
            Expression::Aggregate {
                kind: AggregateKind::Count,
                distinct,
                child,
            } => match child.as_ref() {
                Expression::Variable(v) => Some((v.clone(), *distinct)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Deterministic key: a pure function of the expression shape and
    /// the column indices of its variables.
    pub fn cache_key(&self, var_columns: &VariableColumns) -> String {
        match self {
            Expression::Literal(v) => format!("{v:?}"),
            Expression::Variable(var) => match var_columns.get(var) {
                Some(col) => format!("#col{col}#"),
                None => format!("#unbound:{var}#"),
            },
            Expression::Unary { op, child } => {
                format!("{:?}({})", op, child.cache_key(var_columns))
            }
            Expression::Binary { op, left, right } => format!(
                "({} {} {})",
                left.cache_key(var_columns),
                op.symbol(),
                right.cache_key(var_columns)
            ),
            Expression::Aggregate {
                kind,
                distinct,
                child,
            } => format!(
                "{}({}{})",
                kind.name(),
                if *distinct { "DISTINCT " } else { "" },
                child.cache_key(var_columns)
            ),
        }
    }

    /// Evaluate over the rows of `ctx`.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<ExpressionResult> {
        ctx.deadline.check()?;
        match self {
            Expression::Literal(v) => Ok(ExpressionResult::Constant(v.clone())),
            Expression::Variable(var) => match ctx.var_columns.get(var) {
                Some(col) => Ok(ExpressionResult::Column(col)),
                None => Err(QueryError::TypeMismatch(format!(
                    "variable {var} is not bound in this scope"
                ))),
            },
            Expression::Unary { op, child } => {
                let inner = child.evaluate(ctx)?;
                evaluate_unary(*op, inner, ctx)
            }
            Expression::Binary { op, left, right } => {
                let l = left.evaluate(ctx)?;
                let r = right.evaluate(ctx)?;
                evaluate_binary(*op, l, r, ctx)
            }
            Expression::Aggregate {
                kind,
                distinct,
                child,
            } => {
                let operand = child.evaluate(ctx)?;
                let value = aggregate::evaluate_aggregate(*kind, *distinct, &operand, ctx)?;
                Ok(ExpressionResult::Constant(value))
            }
        }
    }
}

fn evaluate_unary(
    op: UnaryOp,
    inner: ExpressionResult,
    ctx: &EvaluationContext<'_>,
) -> Result<ExpressionResult> {
    match op {
        UnaryOp::Not => {
            if let ExpressionResult::Intervals(set) = &inner {
                return Ok(ExpressionResult::Intervals(set.complement(ctx.begin, ctx.end)));
            }
            let values = (0..ctx.num_rows())
                .map(|offset| Value::Bool(!inner.truthy_at(ctx, offset)))
                .collect();
            Ok(ExpressionResult::Values(values))
        }
        UnaryOp::Minus => {
            let values = (0..ctx.num_rows())
                .map(|offset| inner.value_at(ctx, offset).as_numeric().negate().into_value())
                .collect();
            Ok(ExpressionResult::Values(values))
        }
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: ExpressionResult,
    right: ExpressionResult,
    ctx: &EvaluationContext<'_>,
) -> Result<ExpressionResult> {
    // Interval algebra for boolean connectives.
    if let (BinaryOp::And | BinaryOp::Or, ExpressionResult::Intervals(l), ExpressionResult::Intervals(r)) =
        (op, &left, &right)
    {
        let combined = match op {
            BinaryOp::And => l.intersect(r),
            _ => l.union(r),
        };
        return Ok(ExpressionResult::Intervals(combined));
    }

    // Comparison of the leading sort column against a constant: binary
    // search the column and return an interval set.
    if op.is_comparison() {
        if let (ExpressionResult::Column(col), ExpressionResult::Constant(Value::Id(needle))) =
            (&left, &right)
        {
            if ctx.table.sorted_on().first() == Some(col) {
                return Ok(ExpressionResult::Intervals(compare_sorted_column(
                    ctx, *col, *needle, op,
                )));
            }
        }
    }

    let rows = ctx.num_rows();
    let mut values = Vec::with_capacity(rows);
    for offset in 0..rows {
        if offset % 256 == 0 {
            ctx.deadline.check()?;
        }
        let a = left.value_at(ctx, offset);
        let b = right.value_at(ctx, offset);
        values.push(apply_binary(op, a, b));
    }
    Ok(ExpressionResult::Values(values))
}

fn apply_binary(op: BinaryOp, a: Value, b: Value) -> Value {
    match op {
        BinaryOp::And => Value::Bool(a.truthy() && b.truthy()),
        BinaryOp::Or => Value::Bool(a.truthy() || b.truthy()),
        BinaryOp::Add => a.as_numeric().add(b.as_numeric()).into_value(),
        BinaryOp::Sub => a.as_numeric().sub(b.as_numeric()).into_value(),
        BinaryOp::Mul => a.as_numeric().mul(b.as_numeric()).into_value(),
        BinaryOp::Div => a.as_numeric().div(b.as_numeric()).into_value(),
        _ => {
            // Unbound operands never satisfy a comparison.
            if a.is_undefined() || b.is_undefined() {
                return Value::Bool(false);
            }
            match a.compare(&b) {
                Some(ord) => Value::Bool(match op {
                    BinaryOp::Eq => ord == Ordering::Equal,
                    BinaryOp::Ne => ord != Ordering::Equal,
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Ge => ord != Ordering::Less,
                    _ => unreachable!("comparison operators only"),
                }),
                None => Value::Bool(false),
            }
        }
    }
}

/// Binary-search a sorted column for the rows satisfying `column op
/// needle`, as absolute row intervals.
fn compare_sorted_column(
    ctx: &EvaluationContext<'_>,
    col: usize,
    needle: tern_core::Id,
    op: BinaryOp,
) -> IntervalSet {
    let column = &ctx.table.column(col)[ctx.begin..ctx.end];
    let lower = ctx.begin + column.partition_point(|&id| id < needle);
    let upper = ctx.begin + column.partition_point(|&id| id <= needle);
    let (begin, end) = (ctx.begin, ctx.end);
    match op {
        BinaryOp::Eq => IntervalSet::new(vec![(lower, upper)]),
        BinaryOp::Ne => IntervalSet::new(vec![(begin, lower), (upper, end)]),
        BinaryOp::Lt => IntervalSet::new(vec![(begin, lower)]),
        BinaryOp::Le => IntervalSet::new(vec![(begin, upper)]),
        BinaryOp::Gt => IntervalSet::new(vec![(upper, end)]),
        BinaryOp::Ge => IntervalSet::new(vec![(lower, end)]),
        _ => unreachable!("comparison operators only"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Deadline;
    use tern_core::{Id, IdTable, LocalVocab, MemoryBudget, ResultTable};

    fn sorted_table(ints: &[i64]) -> ResultTable {
        let budget = MemoryBudget::unlimited();
        let mut t = IdTable::new(1, &budget);
        for &v in ints {
            t.push_row(&[Id::from_int(v)]).unwrap();
        }
        ResultTable::freeze(t, vec![0], LocalVocab::new())
    }

    fn ctx_parts() -> (MemoryBudget, Deadline) {
        (MemoryBudget::unlimited(), Deadline::none())
    }

    #[test]
    fn test_comparison_on_sorted_column_yields_intervals() {
        let table = sorted_table(&[1, 2, 2, 3, 5]);
        let vars = VariableColumns::from_ordered([Variable::new("?x")]);
        let (budget, deadline) = ctx_parts();
        let ctx = EvaluationContext::over_table(&table, &vars, &budget, &deadline);

        let expr = Expression::binary(
            BinaryOp::Le,
            Expression::variable("?x"),
            Expression::Literal(Value::Id(Id::from_int(2))),
        );
        match expr.evaluate(&ctx).unwrap() {
            ExpressionResult::Intervals(set) => {
                assert_eq!(set.intervals(), &[(0, 3)]);
            }
            other => panic!("expected intervals, got {other:?}"),
        }
    }

    #[test]
    fn test_and_of_intervals_intersects() {
        let table = sorted_table(&[1, 2, 3, 4, 5]);
        let vars = VariableColumns::from_ordered([Variable::new("?x")]);
        let (budget, deadline) = ctx_parts();
        let ctx = EvaluationContext::over_table(&table, &vars, &budget, &deadline);

        let expr = Expression::binary(
            BinaryOp::And,
            Expression::binary(
                BinaryOp::Ge,
                Expression::variable("?x"),
                Expression::Literal(Value::Id(Id::from_int(2))),
            ),
            Expression::binary(
                BinaryOp::Lt,
                Expression::variable("?x"),
                Expression::Literal(Value::Id(Id::from_int(5))),
            ),
        );
        match expr.evaluate(&ctx).unwrap() {
            ExpressionResult::Intervals(set) => assert_eq!(set.intervals(), &[(1, 4)]),
            other => panic!("expected intervals, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_broadcast() {
        let table = sorted_table(&[10, 20]);
        let vars = VariableColumns::from_ordered([Variable::new("?x")]);
        let (budget, deadline) = ctx_parts();
        let ctx = EvaluationContext::over_table(&table, &vars, &budget, &deadline);

        let expr = Expression::binary(
            BinaryOp::Add,
            Expression::variable("?x"),
            Expression::int(1),
        );
        match expr.evaluate(&ctx).unwrap() {
            ExpressionResult::Values(values) => {
                assert_eq!(values[0], Value::Id(Id::from_int(11)));
                assert_eq!(values[1], Value::Id(Id::from_int(21)));
            }
            other => panic!("expected values, got {other:?}"),
        }
    }

    #[test]
    fn test_capability_surface() {
        let agg = Expression::aggregate(
            AggregateKind::Count,
            true,
            Expression::variable("?p"),
        );
        assert!(agg.contains_aggregate());
        assert_eq!(agg.unaggregated_variables(), Vec::<Variable>::new());
        assert_eq!(
            agg.variable_for_count(),
            Some((Variable::new("?p"), true))
        );

        let mixed = Expression::binary(BinaryOp::Add, agg, Expression::variable("?y"));
        assert!(mixed.contains_aggregate());
        assert_eq!(mixed.unaggregated_variables(), vec![Variable::new("?y")]);
    }

    #[test]
    fn test_cache_key_uses_columns_not_names() {
        let vars = VariableColumns::from_ordered([Variable::new("?a")]);
        let expr = Expression::binary(
            BinaryOp::Lt,
            Expression::variable("?a"),
            Expression::int(7),
        );
        let key = expr.cache_key(&vars);
        assert!(key.contains("#col0#"), "{key}");
        assert!(!key.contains("?a"), "{key}");

        // Same shape, different variable name mapped to the same column:
        // identical key.
        let vars2 = VariableColumns::from_ordered([Variable::new("?b")]);
        let expr2 = Expression::binary(
            BinaryOp::Lt,
            Expression::variable("?b"),
            Expression::int(7),
        );
        assert_eq!(key, expr2.cache_key(&vars2));
    }

    #[test]
    fn test_comparison_with_undefined_is_false() {
        assert_eq!(
            apply_binary(BinaryOp::Eq, Value::UNDEF, Value::UNDEF),
            Value::Bool(false)
        );
        assert_eq!(
            apply_binary(BinaryOp::Le, Value::UNDEF, Value::Int(3)),
            Value::Bool(false)
        );
    }
}
