//! Static detection of the pattern trick.
//!
//! Queries of the shape
//! `SELECT ?p (COUNT(?s) AS ?c) WHERE { ?s ?p ?o } GROUP BY ?p`
//! (optionally `COUNT(DISTINCT ?s)`, optionally over
//! `?s ql:has-predicate ?p`) can skip the GROUP BY + COUNT pipeline and
//! read the precomputed pattern table instead.
//!
//! The WHERE clause may carry further triples restricting `?s`, as long
//! as they mention neither the grouped predicate variable nor the trick
//! triple's object. Those triples become the *remainder*: the planner
//! plans them as an ordinary subtree and counts over its subject
//! column.

use crate::ir::{
    GraphPattern, ParsedQuery, PatternOperation, PropertyPath, SelectEntry, SparqlTriple,
    Variable,
};

/// Predicate of the explicit has-predicate form.
pub const HAS_PREDICATE: &str = "ql:has-predicate";

/// The variables of a detected pattern-trick query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTrickTuple {
    /// The grouped predicate variable.
    pub predicate_var: Variable,
    /// The counted subject variable, when the count names one.
    pub subject_var: Option<Variable>,
    /// Whether the count is DISTINCT.
    pub distinct: bool,
    /// The variable the count is bound to.
    pub count_var: Variable,
}

/// The result of a successful pattern-trick detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternTrick {
    pub tuple: PatternTrickTuple,
    /// What remains of the WHERE clause once the trick triple is
    /// removed; `None` when the triple was the whole clause.
    pub remainder: Option<GraphPattern>,
}

/// Check whether `query` is a pattern-trick candidate.
pub fn check_pattern_trick(query: &ParsedQuery) -> Option<PatternTrick> {
    // GROUP BY over exactly one variable, no HAVING, no filters.
    let [group_var] = query.modifiers.group_by.as_slice() else {
        return None;
    };
    if !query.modifiers.having.is_empty() || !query.pattern.filters.is_empty() {
        return None;
    }

    // SELECT ?p and exactly one COUNT alias.
    let mut count: Option<(Variable, bool, Variable)> = None;
    for entry in &query.select.entries {
        match entry {
            SelectEntry::Var(v) if v == group_var => {}
            SelectEntry::Alias { expr, var } => {
                if count.is_some() {
                    return None;
                }
                let (counted, distinct) = expr.variable_for_count()?;
                count = Some((counted, distinct, var.clone()));
            }
            _ => return None,
        }
    }
    let (counted, distinct, count_var) = count?;

    // The WHERE clause is a single basic graph pattern containing the
    // trick triple.
    let [PatternOperation::Basic(triples)] = query.pattern.operations.as_slice() else {
        return None;
    };
    let position = triples
        .iter()
        .position(|t| triple_matches(t, group_var, &counted))?;
    let trick_triple = &triples[position];

    // Neither the grouped predicate nor the trick triple's object may
    // occur in the remaining triples: the trick never materialises
    // their bindings.
    let object_var = trick_triple.o.as_variable().filter(|o| *o != group_var);
    let rest: Vec<SparqlTriple> = triples
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != position)
        .map(|(_, t)| t.clone())
        .collect();
    for t in &rest {
        let vars = t.variables();
        if vars.contains(group_var) {
            return None;
        }
        if let Some(o) = object_var {
            if vars.contains(o) {
                return None;
            }
        }
    }
    let remainder = if rest.is_empty() {
        None
    } else {
        // The remainder must bind the counted subject, else the count
        // would run over a disconnected subtree.
        if !rest.iter().any(|t| t.variables().contains(&counted)) {
            return None;
        }
        Some(GraphPattern::basic(rest))
    };

    Some(PatternTrick {
        tuple: PatternTrickTuple {
            predicate_var: group_var.clone(),
            subject_var: trick_triple.s.as_variable().cloned(),
            distinct,
            count_var,
        },
        remainder,
    })
}

/// `?s ?p ?o` with `?p` grouped and `?s` counted, or
/// `?s ql:has-predicate ?p` likewise.
fn triple_matches(triple: &SparqlTriple, group_var: &Variable, counted: &Variable) -> bool {
    let Some(subject) = triple.s.as_variable() else {
        return false;
    };
    if subject != counted {
        return false;
    }
    match &triple.p {
        PropertyPath::Variable(p) => {
            // ?s ?p ?o with all three distinct variables.
            if p != group_var {
                return false;
            }
            match triple.o.as_variable() {
                Some(o) => o != subject && o != p,
                None => false,
            }
        }
        PropertyPath::Iri(iri) if iri == HAS_PREDICATE => {
            triple.o.as_variable() == Some(group_var)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{AggregateKind, Expression};
    use crate::ir::{Modifiers, SelectClause, TripleComponent};

    fn trick_query(distinct: bool) -> ParsedQuery {
        let triple = SparqlTriple::new(
            TripleComponent::Variable(Variable::new("?s")),
            PropertyPath::Variable(Variable::new("?p")),
            TripleComponent::Variable(Variable::new("?o")),
        );
        let select = SelectClause {
            distinct: false,
            entries: vec![
                SelectEntry::Var(Variable::new("?p")),
                SelectEntry::Alias {
                    expr: Expression::aggregate(
                        AggregateKind::Count,
                        distinct,
                        Expression::variable("?s"),
                    ),
                    var: Variable::new("?c"),
                },
            ],
        };
        ParsedQuery::new(select, GraphPattern::basic(vec![triple])).with_modifiers(Modifiers {
            group_by: vec![Variable::new("?p")],
            ..Modifiers::default()
        })
    }

    fn push_triple(query: &mut ParsedQuery, s: &str, p: &str, o: &str) {
        let component = |name: &str| {
            if name.starts_with('?') {
                TripleComponent::Variable(Variable::new(name))
            } else {
                TripleComponent::Iri(name.into())
            }
        };
        if let PatternOperation::Basic(triples) = &mut query.pattern.operations[0] {
            triples.push(SparqlTriple::new(
                component(s),
                PropertyPath::Iri(p.into()),
                component(o),
            ));
        }
    }

    #[test]
    fn test_detects_canonical_shape() {
        let trick = check_pattern_trick(&trick_query(false)).unwrap();
        assert_eq!(trick.tuple.predicate_var, Variable::new("?p"));
        assert_eq!(trick.tuple.subject_var, Some(Variable::new("?s")));
        assert!(!trick.tuple.distinct);
        assert_eq!(trick.tuple.count_var, Variable::new("?c"));
        assert!(trick.remainder.is_none());
    }

    #[test]
    fn test_detects_distinct_count() {
        assert!(check_pattern_trick(&trick_query(true)).unwrap().tuple.distinct);
    }

    #[test]
    fn test_rejects_group_by_subject() {
        let mut query = trick_query(false);
        query.modifiers.group_by = vec![Variable::new("?o")];
        assert!(check_pattern_trick(&query).is_none());
    }

    #[test]
    fn test_restricting_triples_become_remainder() {
        let mut query = trick_query(false);
        push_triple(&mut query, "?s", "<type>", "<person>");
        let trick = check_pattern_trick(&query).unwrap();
        let remainder = trick.remainder.unwrap();
        assert_eq!(remainder.operations.len(), 1);
        let PatternOperation::Basic(triples) = &remainder.operations[0] else {
            panic!("remainder is a basic graph pattern");
        };
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].p.as_iri(), Some("<type>"));
    }

    #[test]
    fn test_rejects_remainder_using_predicate_variable() {
        let mut query = trick_query(false);
        push_triple(&mut query, "?s", "<type>", "?p");
        assert!(check_pattern_trick(&query).is_none());
    }

    #[test]
    fn test_rejects_remainder_using_object_variable() {
        let mut query = trick_query(false);
        push_triple(&mut query, "?o", "<type>", "<person>");
        assert!(check_pattern_trick(&query).is_none());
    }

    #[test]
    fn test_rejects_remainder_not_binding_subject() {
        let mut query = trick_query(false);
        push_triple(&mut query, "?z", "<type>", "<person>");
        assert!(check_pattern_trick(&query).is_none());
    }
}
