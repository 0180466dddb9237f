//! Parsed-query intermediate representation.
//!
//! The parser collaborator produces this structure; the planner consumes
//! it. A query is a select clause, a tree of graph patterns, and the
//! solution modifiers. Triples may carry property-path predicates which
//! the planner expands before graph construction.

use crate::expression::Expression;
use std::fmt;
use std::sync::Arc;

/// Predicate marking a text-search triple that binds a context variable
/// to the text records containing a word.
pub const CONTAINS_WORD: &str = "ql:contains-word";
/// Predicate marking a text-search triple that binds a context variable
/// to the entities co-occurring in its text records.
pub const CONTAINS_ENTITY: &str = "ql:contains-entity";

/// A named SPARQL variable, including the leading `?`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(Arc<str>);

impl Variable {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        debug_assert!(name.starts_with('?'), "variable names start with '?'");
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variable({})", self.0)
    }
}

/// Subject or object position of a triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TripleComponent {
    /// A concrete IRI, e.g. `<http://example.org/a>`.
    Iri(String),
    /// A literal, stored in its lexical form.
    Literal(String),
    /// A variable.
    Variable(Variable),
}

impl TripleComponent {
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            TripleComponent::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, TripleComponent::Variable(_))
    }

    /// The concrete term (IRI or literal), if any.
    pub fn as_term(&self) -> Option<&str> {
        match self {
            TripleComponent::Iri(s) | TripleComponent::Literal(s) => Some(s),
            TripleComponent::Variable(_) => None,
        }
    }
}

impl fmt::Display for TripleComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripleComponent::Iri(s) | TripleComponent::Literal(s) => f.write_str(s),
            TripleComponent::Variable(v) => write!(f, "{v}"),
        }
    }
}

/// Predicate position: a plain IRI, a variable, or a composite property
/// path the planner expands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyPath {
    Iri(String),
    Variable(Variable),
    /// `A / B / ...` — path concatenation through fresh variables.
    Sequence(Vec<PropertyPath>),
    /// `A | B | ...` — union of the alternatives.
    Alternative(Vec<PropertyPath>),
    /// `^A` — inverted direction.
    Inverse(Box<PropertyPath>),
    /// `A*`, `A+`, `A{min,max}` — transitive closure with bounds.
    Transitive {
        inner: Box<PropertyPath>,
        min: usize,
        /// `None` means unbounded.
        max: Option<usize>,
    },
}

impl PropertyPath {
    /// `A*`.
    pub fn star(inner: PropertyPath) -> Self {
        PropertyPath::Transitive {
            inner: Box::new(inner),
            min: 0,
            max: None,
        }
    }

    /// `A+`.
    pub fn plus(inner: PropertyPath) -> Self {
        PropertyPath::Transitive {
            inner: Box::new(inner),
            min: 1,
            max: None,
        }
    }

    /// `A{min,max}`.
    pub fn range(inner: PropertyPath, min: usize, max: Option<usize>) -> Self {
        PropertyPath::Transitive {
            inner: Box::new(inner),
            min,
            max,
        }
    }

    /// The IRI when this path is a single predicate.
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            PropertyPath::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            PropertyPath::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// True when the predicate needs no expansion (IRI or variable).
    pub fn is_simple(&self) -> bool {
        matches!(self, PropertyPath::Iri(_) | PropertyPath::Variable(_))
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyPath::Iri(iri) => f.write_str(iri),
            PropertyPath::Variable(v) => write!(f, "{v}"),
            PropertyPath::Sequence(parts) => {
                let joined: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", joined.join("/"))
            }
            PropertyPath::Alternative(parts) => {
                let joined: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", joined.join("|"))
            }
            PropertyPath::Inverse(inner) => write!(f, "^({inner})"),
            PropertyPath::Transitive { inner, min, max } => match max {
                Some(max) => write!(f, "({inner}){{{min},{max}}}"),
                None => write!(f, "({inner}){{{min},}}"),
            },
        }
    }
}

/// One triple of a basic graph pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SparqlTriple {
    pub s: TripleComponent,
    pub p: PropertyPath,
    pub o: TripleComponent,
}

impl SparqlTriple {
    pub fn new(s: TripleComponent, p: PropertyPath, o: TripleComponent) -> Self {
        Self { s, p, o }
    }

    /// The variables of this triple (subject, predicate and object
    /// positions).
    pub fn variables(&self) -> Vec<Variable> {
        let mut vars = Vec::new();
        if let Some(v) = self.s.as_variable() {
            vars.push(v.clone());
        }
        if let Some(v) = self.p.as_variable() {
            vars.push(v.clone());
        }
        if let Some(v) = self.o.as_variable() {
            vars.push(v.clone());
        }
        vars
    }

    /// True for `ql:contains-word` / `ql:contains-entity` triples.
    pub fn is_text_triple(&self) -> bool {
        matches!(self.p.as_iri(), Some(CONTAINS_WORD) | Some(CONTAINS_ENTITY))
    }
}

impl fmt::Display for SparqlTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.s, self.p, self.o)
    }
}

/// A concrete entry of a VALUES row.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueTerm {
    Iri(String),
    Literal(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

/// Inline VALUES table; `None` entries are UNDEF.
#[derive(Clone, Debug, PartialEq)]
pub struct ValuesClause {
    pub variables: Vec<Variable>,
    pub rows: Vec<Vec<Option<ValueTerm>>>,
}

/// One operation inside a graph pattern.
#[derive(Clone, Debug, PartialEq)]
pub enum PatternOperation {
    /// A basic graph pattern (a set of triples).
    Basic(Vec<SparqlTriple>),
    /// `OPTIONAL { ... }`.
    Optional(GraphPattern),
    /// `MINUS { ... }`.
    Minus(GraphPattern),
    /// `{ ... } UNION { ... }`.
    Union(Box<GraphPattern>, Box<GraphPattern>),
    /// Inline data.
    Values(ValuesClause),
    /// `BIND(expr AS ?var)`.
    Bind { variable: Variable, expr: Expression },
    /// A nested `SELECT`.
    Subquery(Box<ParsedQuery>),
}

/// A group graph pattern: operations plus the FILTERs scoped to it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphPattern {
    pub operations: Vec<PatternOperation>,
    pub filters: Vec<Expression>,
}

impl GraphPattern {
    /// A pattern containing a single basic graph pattern.
    pub fn basic(triples: Vec<SparqlTriple>) -> Self {
        Self {
            operations: vec![PatternOperation::Basic(triples)],
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filters.push(filter);
        self
    }
}

/// One SELECT entry: a plain variable or an aliased expression.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectEntry {
    Var(Variable),
    Alias { expr: Expression, var: Variable },
}

impl SelectEntry {
    /// The variable this entry binds in the result.
    pub fn bound_variable(&self) -> &Variable {
        match self {
            SelectEntry::Var(v) => v,
            SelectEntry::Alias { var, .. } => var,
        }
    }
}

/// The SELECT clause.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectClause {
    pub distinct: bool,
    pub entries: Vec<SelectEntry>,
}

impl SelectClause {
    pub fn vars(vars: impl IntoIterator<Item = Variable>) -> Self {
        Self {
            distinct: false,
            entries: vars.into_iter().map(SelectEntry::Var).collect(),
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// The variables bound by the result, in clause order.
    pub fn selected_variables(&self) -> Vec<Variable> {
        self.entries
            .iter()
            .map(|e| e.bound_variable().clone())
            .collect()
    }

    /// Aliased expressions, in clause order.
    pub fn aliases(&self) -> Vec<(&Expression, &Variable)> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                SelectEntry::Alias { expr, var } => Some((expr, var)),
                SelectEntry::Var(_) => None,
            })
            .collect()
    }
}

/// One ORDER BY key.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderKey {
    pub variable: Variable,
    pub descending: bool,
}

impl OrderKey {
    pub fn asc(variable: Variable) -> Self {
        Self {
            variable,
            descending: false,
        }
    }

    pub fn desc(variable: Variable) -> Self {
        Self {
            variable,
            descending: true,
        }
    }
}

/// Solution modifiers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Modifiers {
    pub group_by: Vec<Variable>,
    pub having: Vec<Expression>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// A parsed SPARQL query.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedQuery {
    pub select: SelectClause,
    pub pattern: GraphPattern,
    pub modifiers: Modifiers,
}

impl ParsedQuery {
    pub fn new(select: SelectClause, pattern: GraphPattern) -> Self {
        Self {
            select,
            pattern,
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    #[test]
    fn test_triple_variables() {
        let t = SparqlTriple::new(
            TripleComponent::Variable(var("?s")),
            PropertyPath::Variable(var("?p")),
            TripleComponent::Iri("<o>".into()),
        );
        assert_eq!(t.variables(), vec![var("?s"), var("?p")]);
    }

    #[test]
    fn test_text_triple_detection() {
        let t = SparqlTriple::new(
            TripleComponent::Variable(var("?t")),
            PropertyPath::Iri(CONTAINS_WORD.into()),
            TripleComponent::Literal("\"quantum\"".into()),
        );
        assert!(t.is_text_triple());
        let u = SparqlTriple::new(
            TripleComponent::Variable(var("?t")),
            PropertyPath::Iri("<p>".into()),
            TripleComponent::Variable(var("?o")),
        );
        assert!(!u.is_text_triple());
    }

    #[test]
    fn test_path_display_is_stable() {
        let path = PropertyPath::star(PropertyPath::Sequence(vec![
            PropertyPath::Iri("<a>".into()),
            PropertyPath::Inverse(Box::new(PropertyPath::Iri("<b>".into()))),
        ]));
        assert_eq!(path.to_string(), "((<a>/^(<b>))){0,}");
    }
}
