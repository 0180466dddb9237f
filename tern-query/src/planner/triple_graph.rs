//! The triple graph the join enumeration runs on.
//!
//! One node per triple; an edge connects two nodes iff their variable
//! sets intersect. Text-search triples sharing a context variable are
//! collapsed into a single synthetic node carrying the word list and the
//! connected entity variables.

use crate::error::{QueryError, Result};
use crate::ir::{SparqlTriple, TripleComponent, Variable, CONTAINS_ENTITY, CONTAINS_WORD};
use std::collections::{BTreeMap, BTreeSet};

/// One node of the triple graph: a plain triple or a collapsed text
/// clique.
#[derive(Debug, Clone)]
pub struct TgNode {
    pub id: usize,
    /// The triple, for plain nodes.
    pub triple: Option<SparqlTriple>,
    /// The context variable, for text nodes.
    pub cvar: Option<Variable>,
    /// The word list, for text nodes.
    pub words: Vec<String>,
    /// Entity variables connected through the clique, for text nodes.
    pub entity_vars: Vec<Variable>,
    /// All variables of the node, ordered.
    pub variables: BTreeSet<Variable>,
}

impl TgNode {
    fn from_triple(id: usize, triple: SparqlTriple) -> Self {
        let variables: BTreeSet<Variable> = triple.variables().into_iter().collect();
        Self {
            id,
            triple: Some(triple),
            cvar: None,
            words: Vec::new(),
            entity_vars: Vec::new(),
            variables,
        }
    }

    pub fn is_text_node(&self) -> bool {
        self.cvar.is_some()
    }
}

/// Undirected graph over triple nodes, stored as adjacency lists plus
/// the node list (ids are dense `0..len`).
#[derive(Debug, Default)]
pub struct TripleGraph {
    pub nodes: Vec<TgNode>,
    pub adj: Vec<Vec<usize>>,
}

impl TripleGraph {
    pub fn new(triples: Vec<SparqlTriple>) -> Self {
        let nodes: Vec<TgNode> = triples
            .into_iter()
            .enumerate()
            .map(|(id, t)| TgNode::from_triple(id, t))
            .collect();
        let adj = Self::build_adjacency(&nodes);
        Self { nodes, adj }
    }

    fn build_adjacency(nodes: &[TgNode]) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); nodes.len()];
        for i in 0..nodes.len() {
            for j in i + 1..nodes.len() {
                if !nodes[i].variables.is_disjoint(&nodes[j].variables) {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }
        adj
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Context variables and the text-triple nodes bound to them, in
    /// variable order.
    fn identify_text_cliques(&self) -> Result<BTreeMap<Variable, Vec<usize>>> {
        let mut cliques: BTreeMap<Variable, Vec<usize>> = BTreeMap::new();
        for node in &self.nodes {
            let Some(triple) = &node.triple else { continue };
            if !triple.is_text_triple() {
                continue;
            }
            let cvar = triple.s.as_variable().ok_or_else(|| {
                QueryError::NotYetImplemented(
                    "text-search triples need a variable context subject".into(),
                )
            })?;
            cliques.entry(cvar.clone()).or_default().push(node.id);
        }
        Ok(cliques)
    }

    /// Replace every text clique by one synthetic node. Node ids are
    /// re-assigned densely and the adjacency is rebuilt.
    pub fn collapse_text_cliques(&mut self) -> Result<()> {
        let cliques = self.identify_text_cliques()?;
        if cliques.is_empty() {
            return Ok(());
        }
        let clique_members: BTreeSet<usize> =
            cliques.values().flatten().copied().collect();

        let mut new_nodes: Vec<TgNode> = Vec::new();
        for node in &self.nodes {
            if !clique_members.contains(&node.id) {
                let mut kept = node.clone();
                kept.id = new_nodes.len();
                new_nodes.push(kept);
            }
        }
        for (cvar, members) in cliques {
            let mut words: Vec<String> = Vec::new();
            let mut entity_vars: BTreeSet<Variable> = BTreeSet::new();
            for &member in &members {
                let triple = self.nodes[member].triple.as_ref().unwrap();
                match triple.p.as_iri() {
                    Some(CONTAINS_WORD) => {
                        let literal = triple.o.as_term().ok_or_else(|| {
                            QueryError::NotYetImplemented(
                                "ql:contains-word needs a literal word list".into(),
                            )
                        })?;
                        words.extend(
                            literal
                                .trim_matches('"')
                                .split_whitespace()
                                .map(|w| w.to_lowercase()),
                        );
                    }
                    Some(CONTAINS_ENTITY) => {
                        let var = triple.o.as_variable().ok_or_else(|| {
                            QueryError::NotYetImplemented(
                                "ql:contains-entity with a fixed entity".into(),
                            )
                        })?;
                        entity_vars.insert(var.clone());
                    }
                    _ => unreachable!("clique members are text triples"),
                }
            }
            if words.is_empty() {
                return Err(QueryError::Planning(format!(
                    "text context {cvar} has no ql:contains-word triple"
                )));
            }
            words.sort();
            words.dedup();
            let mut variables: BTreeSet<Variable> = entity_vars.clone();
            variables.insert(cvar.clone());
            new_nodes.push(TgNode {
                id: new_nodes.len(),
                triple: None,
                cvar: Some(cvar),
                words,
                entity_vars: entity_vars.into_iter().collect(),
                variables,
            });
        }
        self.adj = Self::build_adjacency(&new_nodes);
        self.nodes = new_nodes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::PropertyPath;

    fn var(name: &str) -> TripleComponent {
        TripleComponent::Variable(Variable::new(name))
    }

    fn triple(s: &str, p: &str, o: TripleComponent) -> SparqlTriple {
        SparqlTriple::new(var(s), PropertyPath::Iri(p.into()), o)
    }

    #[test]
    fn test_edges_on_shared_variables() {
        let g = TripleGraph::new(vec![
            triple("?x", "<p>", TripleComponent::Iri("<o>".into())),
            triple("?x", "<q>", var("?y")),
            triple("?z", "<r>", var("?w")),
        ]);
        assert_eq!(g.adj[0], vec![1]);
        assert_eq!(g.adj[1], vec![0]);
        assert!(g.adj[2].is_empty());
    }

    #[test]
    fn test_text_clique_collapse() {
        let mut g = TripleGraph::new(vec![
            triple("?t", CONTAINS_WORD, TripleComponent::Literal("\"quantum physics\"".into())),
            triple("?t", CONTAINS_ENTITY, var("?e")),
            triple("?e", "<type>", TripleComponent::Iri("<thing>".into())),
        ]);
        g.collapse_text_cliques().unwrap();
        assert_eq!(g.len(), 2);
        // The kept triple comes first, the synthetic node second.
        let text = &g.nodes[1];
        assert!(text.is_text_node());
        assert_eq!(text.words, vec!["physics", "quantum"]);
        assert_eq!(text.entity_vars, vec![Variable::new("?e")]);
        // The text node connects to the type triple through ?e.
        assert_eq!(g.adj[0], vec![1]);
    }

    #[test]
    fn test_ids_stay_dense() {
        let mut g = TripleGraph::new(vec![
            triple("?t", CONTAINS_WORD, TripleComponent::Literal("\"w\"".into())),
            triple("?a", "<p>", var("?b")),
        ]);
        g.collapse_text_cliques().unwrap();
        for (i, node) in g.nodes.iter().enumerate() {
            assert_eq!(node.id, i);
        }
    }
}
