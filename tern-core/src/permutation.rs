//! The six orderings of the triple positions.

use std::fmt;

/// Identifier for one of the six index permutations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Permutation {
    Pso,
    Pos,
    Spo,
    Sop,
    Ops,
    Osp,
}

impl Permutation {
    /// All six permutations, in the canonical enumeration order.
    pub const ALL: [Permutation; 6] = [
        Permutation::Pso,
        Permutation::Pos,
        Permutation::Spo,
        Permutation::Sop,
        Permutation::Ops,
        Permutation::Osp,
    ];

    /// Key order over the positions `[subject, predicate, object]` =
    /// `[0, 1, 2]`. `Pso` is `[1, 0, 2]`: first key is the predicate,
    /// second the subject, third the object.
    pub const fn key_order(self) -> [usize; 3] {
        match self {
            Permutation::Pso => [1, 0, 2],
            Permutation::Pos => [1, 2, 0],
            Permutation::Spo => [0, 1, 2],
            Permutation::Sop => [0, 2, 1],
            Permutation::Ops => [2, 1, 0],
            Permutation::Osp => [2, 0, 1],
        }
    }

    /// Canonical upper-case name, e.g. `"PSO"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Permutation::Pso => "PSO",
            Permutation::Pos => "POS",
            Permutation::Spo => "SPO",
            Permutation::Sop => "SOP",
            Permutation::Ops => "OPS",
            Permutation::Osp => "OSP",
        }
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_orders_are_permutations() {
        for p in Permutation::ALL {
            let mut order = p.key_order();
            order.sort_unstable();
            assert_eq!(order, [0, 1, 2], "{p}");
        }
    }

    #[test]
    fn test_names_unique() {
        let mut names: Vec<_> = Permutation::ALL.iter().map(|p| p.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 6);
    }
}
