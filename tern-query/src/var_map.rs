//! Variable-to-column mapping.

use crate::ir::Variable;
use std::collections::BTreeMap;

/// Bijection from named variables to result-table column indices.
///
/// Backed by an ordered map so every iteration order is deterministic
/// (cache keys must not depend on hash-map iteration).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableColumns {
    map: BTreeMap<Variable, usize>,
}

impl VariableColumns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(variable, column)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Variable, usize)>) -> Self {
        Self {
            map: pairs.into_iter().collect(),
        }
    }

    /// Build from variables in column order.
    pub fn from_ordered(vars: impl IntoIterator<Item = Variable>) -> Self {
        Self {
            map: vars.into_iter().enumerate().map(|(i, v)| (v, i)).collect(),
        }
    }

    pub fn insert(&mut self, var: Variable, column: usize) {
        self.map.insert(var, column);
    }

    pub fn get(&self, var: &Variable) -> Option<usize> {
        self.map.get(var).copied()
    }

    pub fn contains(&self, var: &Variable) -> bool {
        self.map.contains_key(var)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate `(variable, column)` in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, usize)> {
        self.map.iter().map(|(v, &c)| (v, c))
    }

    /// `(column, variable)` pairs sorted by column index.
    pub fn by_column(&self) -> Vec<(usize, Variable)> {
        let mut pairs: Vec<(usize, Variable)> =
            self.map.iter().map(|(v, &c)| (c, v.clone())).collect();
        pairs.sort_by_key(|(c, _)| *c);
        pairs
    }

    /// The variable mapped to `column`, if any.
    pub fn variable_at(&self, column: usize) -> Option<&Variable> {
        self.map
            .iter()
            .find_map(|(v, &c)| (c == column).then_some(v))
    }

    /// Variables shared with `other`, in variable order.
    pub fn shared_variables(&self, other: &VariableColumns) -> Vec<Variable> {
        self.map
            .keys()
            .filter(|v| other.contains(v))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    #[test]
    fn test_from_ordered() {
        let cols = VariableColumns::from_ordered([var("?b"), var("?a")]);
        assert_eq!(cols.get(&var("?b")), Some(0));
        assert_eq!(cols.get(&var("?a")), Some(1));
        assert_eq!(cols.variable_at(1), Some(&var("?a")));
    }

    #[test]
    fn test_shared_variables() {
        let a = VariableColumns::from_ordered([var("?x"), var("?y")]);
        let b = VariableColumns::from_ordered([var("?y"), var("?z")]);
        assert_eq!(a.shared_variables(&b), vec![var("?y")]);
    }
}
