//! The query planner.
//!
//! Turns a [`ParsedQuery`] into candidate execution trees and picks the
//! cheapest. Basic graph patterns are optimised by dynamic programming
//! over the triple graph: seed with scans (one per admissible index
//! permutation), build larger plans by joining connected, disjoint
//! sub-plans, prune dominated plans per (covered nodes, covered
//! filters, sort order), and apply filters as soon as their variables
//! are bound. OPTIONAL and MINUS children join after the inner DP has
//! produced plans for the non-optional portion, in syntactic order.

pub mod pattern_trick;
pub mod triple_graph;

pub use pattern_trick::{check_pattern_trick, PatternTrick, PatternTrickTuple, HAS_PREDICATE};
pub use triple_graph::{TgNode, TripleGraph};

use crate::context::ExecutionContext;
use crate::error::{QueryError, Result};
use crate::expression::Expression;
use crate::ir::{
    GraphPattern, ParsedQuery, PatternOperation, PropertyPath, SparqlTriple, TripleComponent,
    Variable,
};
use crate::op::{
    ensure_sorted_on, Bind, CountAvailablePredicates, Distinct, Filter, GroupBy, HasPredicateScan,
    HashJoin, IndexScan, Join, MinusJoin, NeutralElement, OptionalJoin, OrderBy, PathEnd,
    ScanTerm, Sort, Subquery, TextOperationWithFilter, TextOperationWithoutFilter, TransitivePath,
    Union, Values,
};
use crate::op::sort::SortKey;
use crate::operator::ExecutionTree;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use tern_core::{Id, Permutation};
use tracing::debug;

/// A chosen plan plus the modifiers applied at result-delivery time.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub tree: ExecutionTree,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// Above this row size the planner stops distinguishing plans by sort
/// order (see [`QueryPlanner::prune`]).
const MAX_PLANS_PER_ROW: usize = 256;

/// How a plan combines with its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanType {
    Basic,
    Optional,
    Minus,
}

/// What kind of seed a plan grew from; drives the specialised join
/// variants of §join-candidates.
#[derive(Debug, Clone)]
enum SeedKind {
    Plain,
    Transitive {
        sub: ExecutionTree,
        left: PathEnd,
        right: PathEnd,
        min: usize,
        max: Option<usize>,
    },
    HasPredicateFree {
        subject: Variable,
        predicate: Variable,
    },
    Text {
        words: Vec<String>,
        cvar: Variable,
        entity_vars: Vec<Variable>,
    },
}

/// One entry of the DP table: an execution tree plus the bitsets of
/// graph nodes and filters it covers.
#[derive(Debug, Clone)]
pub struct SubtreePlan {
    pub tree: ExecutionTree,
    pub covered_nodes: u64,
    pub covered_filters: u64,
    pub plan_type: PlanType,
    seed: SeedKind,
}

impl SubtreePlan {
    fn basic(tree: ExecutionTree) -> Self {
        Self {
            tree,
            covered_nodes: 0,
            covered_filters: 0,
            plan_type: PlanType::Basic,
            seed: SeedKind::Plain,
        }
    }

    fn with_nodes(mut self, nodes: u64) -> Self {
        self.covered_nodes = nodes;
        self
    }

    pub fn cost(&self) -> usize {
        self.tree.cost_estimate()
    }
}

/// The query planner. One instance per query; the internal variable
/// counter makes property-path expansion deterministic.
pub struct QueryPlanner {
    ctx: ExecutionContext,
    enable_pattern_trick: bool,
    internal_var_count: Cell<usize>,
}

impl QueryPlanner {
    pub fn new(ctx: &ExecutionContext) -> Self {
        Self {
            ctx: ctx.clone(),
            enable_pattern_trick: true,
            internal_var_count: Cell::new(0),
        }
    }

    pub fn with_pattern_trick(mut self, enable: bool) -> Self {
        self.enable_pattern_trick = enable;
        self
    }

    /// Plan `query` and return the cheapest execution tree together
    /// with its limit/offset modifiers.
    pub fn create_execution_tree(&self, query: &ParsedQuery) -> Result<PlannedQuery> {
        let plans = self.create_execution_trees(query, false)?;
        let best = self.find_cheapest_execution_tree(&plans)?;
        debug!(
            candidates = plans.len(),
            cost = plans[best].cost(),
            "chose execution tree"
        );
        Ok(PlannedQuery {
            tree: plans[best].tree.clone(),
            limit: query.modifiers.limit,
            offset: query.modifiers.offset,
        })
    }

    /// Candidate plans for `query`. When the query has no ORDER BY and
    /// is a subquery, one cheapest plan per single-column ordering is
    /// kept, since the surrounding query may prefer any of them.
    pub fn create_execution_trees(
        &self,
        query: &ParsedQuery,
        is_subquery: bool,
    ) -> Result<Vec<SubtreePlan>> {
        let trick = if self.enable_pattern_trick {
            check_pattern_trick(query)
        } else {
            None
        };

        let grouped = trick.is_some()
            || !query.modifiers.group_by.is_empty()
            || query
                .select
                .aliases()
                .iter()
                .any(|(e, _)| e.contains_aggregate());

        let mut row = if let Some(trick) = &trick {
            debug!(predicate = %trick.tuple.predicate_var, "using the pattern trick");
            self.pattern_trick_row(trick)?
        } else {
            let mut row = self.optimize(&query.pattern)?;
            if grouped {
                row = self.group_by_row(query, row)?;
            }
            row
        };

        if !query.modifiers.having.is_empty() {
            row = self.having_row(query, row)?;
        }
        row = self.select_row(query, row, grouped)?;
        if !query.modifiers.order_by.is_empty() {
            row = self.order_by_row(query, row)?;
        } else if is_subquery {
            row = keep_one_plan_per_ordering(row);
        }
        Ok(row)
    }

    /// Index of the minimum-cost plan. In test mode equally cheap plans
    /// tie-break by cache key, making planning deterministic.
    pub fn find_cheapest_execution_tree(&self, row: &[SubtreePlan]) -> Result<usize> {
        if row.is_empty() {
            return Err(QueryError::Internal("no candidate plans".into()));
        }
        let mut best = 0;
        for i in 1..row.len() {
            let better = match row[i].cost().cmp(&row[best].cost()) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal if self.ctx.test_mode() => {
                    row[i].tree.cache_key() < row[best].tree.cache_key()
                }
                _ => false,
            };
            if better {
                best = i;
            }
        }
        Ok(best)
    }

    fn fresh_var(&self) -> Variable {
        let n = self.internal_var_count.get();
        self.internal_var_count.set(n + 1);
        Variable::new(format!("?_internal_{n}"))
    }

    fn resolve_term(&self, term: &str) -> Id {
        // Unknown terms resolve to UNDEFINED, which matches nothing.
        self.ctx.index().vocab_id(term).unwrap_or(Id::UNDEFINED)
    }

    fn scan_term(&self, component: &TripleComponent) -> ScanTerm {
        match component {
            TripleComponent::Variable(v) => ScanTerm::Var(v.clone()),
            other => ScanTerm::Fixed(self.resolve_term(other.as_term().unwrap())),
        }
    }

    fn path_end(&self, component: &TripleComponent) -> PathEnd {
        match component {
            TripleComponent::Variable(v) => PathEnd::Var(v.clone()),
            other => PathEnd::Bound(self.resolve_term(other.as_term().unwrap())),
        }
    }

    // ------------------------------------------------------------------
    // Graph-pattern optimisation
    // ------------------------------------------------------------------

    /// Optimise one group graph pattern into a row of candidate plans.
    fn optimize(&self, pattern: &GraphPattern) -> Result<Vec<SubtreePlan>> {
        let mut triples: Vec<SparqlTriple> = Vec::new();
        let mut children: Vec<(Vec<SubtreePlan>, BTreeSet<Variable>)> = Vec::new();
        enum Deferred<'a> {
            OptionalMinus(&'a GraphPattern, PlanType),
            Bind(&'a Variable, &'a Expression),
        }
        let mut deferred: Vec<Deferred> = Vec::new();

        for op in &pattern.operations {
            match op {
                PatternOperation::Basic(ts) => {
                    for t in ts {
                        self.expand_triple(t.clone(), &mut triples, &mut children)?;
                    }
                }
                PatternOperation::Optional(inner) => {
                    deferred.push(Deferred::OptionalMinus(inner, PlanType::Optional));
                }
                PatternOperation::Minus(inner) => {
                    deferred.push(Deferred::OptionalMinus(inner, PlanType::Minus));
                }
                PatternOperation::Union(a, b) => {
                    children.push(self.plan_union(a, b)?);
                }
                PatternOperation::Values(clause) => {
                    let tree = ExecutionTree::new(Values::new(&self.ctx, clause.clone()));
                    let vars: BTreeSet<Variable> = clause.variables.iter().cloned().collect();
                    children.push((vec![SubtreePlan::basic(tree)], vars));
                }
                PatternOperation::Bind { variable, expr } => {
                    deferred.push(Deferred::Bind(variable, expr));
                }
                PatternOperation::Subquery(inner) => {
                    children.push(self.plan_subquery(inner)?);
                }
            }
        }

        let mut graph = TripleGraph::new(triples);
        graph.collapse_text_cliques()?;
        let mut row = self.fill_dp_table(&graph, children, &pattern.filters)?;

        for d in deferred {
            match d {
                Deferred::OptionalMinus(inner, plan_type) => {
                    row = self.apply_optional_minus(row, inner, plan_type)?;
                }
                Deferred::Bind(variable, expr) => {
                    row = row
                        .into_iter()
                        .map(|plan| {
                            let tree = ExecutionTree::new(Bind::new(
                                plan.tree.clone(),
                                variable.clone(),
                                expr.clone(),
                            ));
                            SubtreePlan {
                                tree,
                                seed: SeedKind::Plain,
                                ..plan
                            }
                        })
                        .collect();
                }
            }
        }

        self.apply_filters_if_possible(&mut row, &pattern.filters, true);
        for plan in &row {
            if plan.covered_filters.count_ones() as usize != pattern.filters.len() {
                return Err(QueryError::Planning(
                    "a FILTER references a variable that is never bound".into(),
                ));
            }
        }
        Ok(row)
    }

    /// Expand a property-path triple into plain triples and/or prebuilt
    /// child plans, before graph construction.
    fn expand_triple(
        &self,
        triple: SparqlTriple,
        triples: &mut Vec<SparqlTriple>,
        children: &mut Vec<(Vec<SubtreePlan>, BTreeSet<Variable>)>,
    ) -> Result<()> {
        match triple.p.clone() {
            PropertyPath::Iri(_) | PropertyPath::Variable(_) => {
                triples.push(triple);
                Ok(())
            }
            PropertyPath::Inverse(inner) => self.expand_triple(
                SparqlTriple::new(triple.o, *inner, triple.s),
                triples,
                children,
            ),
            PropertyPath::Sequence(parts) => {
                if parts.is_empty() {
                    return Err(QueryError::Planning("empty property-path sequence".into()));
                }
                let mut left = triple.s;
                for (i, part) in parts.iter().enumerate() {
                    let right = if i + 1 == parts.len() {
                        triple.o.clone()
                    } else {
                        TripleComponent::Variable(self.fresh_var())
                    };
                    self.expand_triple(
                        SparqlTriple::new(left, part.clone(), right.clone()),
                        triples,
                        children,
                    )?;
                    left = right;
                }
                Ok(())
            }
            PropertyPath::Alternative(parts) => {
                if parts.len() < 2 {
                    return Err(QueryError::Planning(
                        "property-path alternative needs two branches".into(),
                    ));
                }
                let mut tree: Option<ExecutionTree> = None;
                for part in &parts {
                    let branch = self.plan_single_path_triple(
                        triple.s.clone(),
                        part.clone(),
                        triple.o.clone(),
                    )?;
                    tree = Some(match tree {
                        None => branch,
                        Some(acc) => ExecutionTree::new(Union::new(acc, branch)),
                    });
                }
                let tree = tree.unwrap();
                let vars: BTreeSet<Variable> = tree
                    .variable_columns()
                    .iter()
                    .map(|(v, _)| v.clone())
                    .collect();
                children.push((vec![SubtreePlan::basic(tree)], vars));
                Ok(())
            }
            PropertyPath::Transitive { inner, min, max } => {
                let f1 = self.fresh_var();
                let f2 = self.fresh_var();
                let sub = self.plan_single_path_triple(
                    TripleComponent::Variable(f1.clone()),
                    *inner,
                    TripleComponent::Variable(f2.clone()),
                )?;
                // The path operator reads endpoints from columns 0/1.
                let sub = if sub.column_of(&f1) == Some(0)
                    && sub.column_of(&f2) == Some(1)
                    && sub.width() == 2
                {
                    sub
                } else {
                    ExecutionTree::new(Subquery::new(sub, vec![f1.clone(), f2.clone()])?)
                };
                let left = self.path_end(&triple.s);
                let right = self.path_end(&triple.o);
                let op =
                    TransitivePath::new(sub.clone(), left.clone(), right.clone(), min, max);
                let mut vars: BTreeSet<Variable> = BTreeSet::new();
                if let PathEnd::Var(v) = &left {
                    vars.insert(v.clone());
                }
                if let PathEnd::Var(v) = &right {
                    vars.insert(v.clone());
                }
                let plan = SubtreePlan {
                    tree: ExecutionTree::new(op),
                    covered_nodes: 0,
                    covered_filters: 0,
                    plan_type: PlanType::Basic,
                    seed: SeedKind::Transitive {
                        sub,
                        left,
                        right,
                        min,
                        max,
                    },
                };
                children.push((vec![plan], vars));
                Ok(())
            }
        }
    }

    /// The cheapest tree for `s path o` planned as its own pattern.
    fn plan_single_path_triple(
        &self,
        s: TripleComponent,
        path: PropertyPath,
        o: TripleComponent,
    ) -> Result<ExecutionTree> {
        let row = self.optimize(&GraphPattern::basic(vec![SparqlTriple::new(s, path, o)]))?;
        let best = self.find_cheapest_execution_tree(&row)?;
        Ok(row[best].tree.clone())
    }

    fn plan_union(
        &self,
        a: &GraphPattern,
        b: &GraphPattern,
    ) -> Result<(Vec<SubtreePlan>, BTreeSet<Variable>)> {
        let left_row = self.optimize(a)?;
        let right_row = self.optimize(b)?;
        let left = left_row[self.find_cheapest_execution_tree(&left_row)?]
            .tree
            .clone();
        let right = right_row[self.find_cheapest_execution_tree(&right_row)?]
            .tree
            .clone();
        let tree = ExecutionTree::new(Union::new(left, right));
        let vars: BTreeSet<Variable> = tree
            .variable_columns()
            .iter()
            .map(|(v, _)| v.clone())
            .collect();
        Ok((vec![SubtreePlan::basic(tree)], vars))
    }

    fn plan_subquery(
        &self,
        inner: &ParsedQuery,
    ) -> Result<(Vec<SubtreePlan>, BTreeSet<Variable>)> {
        let plans = self.create_execution_trees(inner, true)?;
        let vars: BTreeSet<Variable> = inner.select.selected_variables().into_iter().collect();
        let plans = plans
            .into_iter()
            .map(|plan| SubtreePlan {
                seed: SeedKind::Plain,
                ..plan
            })
            .collect();
        Ok((plans, vars))
    }

    // ------------------------------------------------------------------
    // DP over the triple graph
    // ------------------------------------------------------------------

    fn fill_dp_table(
        &self,
        graph: &TripleGraph,
        children: Vec<(Vec<SubtreePlan>, BTreeSet<Variable>)>,
        filters: &[Expression],
    ) -> Result<Vec<SubtreePlan>> {
        let n = graph.len() + children.len();
        if n > 64 {
            return Err(QueryError::Planning(format!(
                "graph pattern has {n} nodes after clique collapse, the maximum is 64"
            )));
        }
        if filters.len() > 64 {
            return Err(QueryError::Planning(format!(
                "graph pattern has {} filters, the maximum is 64",
                filters.len()
            )));
        }
        if n == 0 {
            // The empty pattern: a single empty solution.
            return Ok(vec![SubtreePlan::basic(ExecutionTree::new(
                NeutralElement::new(),
            ))]);
        }

        // Variable sets per node (graph nodes first, then children).
        let mut node_vars: Vec<BTreeSet<Variable>> = graph
            .nodes
            .iter()
            .map(|node| node.variables.clone())
            .collect();
        node_vars.extend(children.iter().map(|(_, vars)| vars.clone()));

        let mut adj_mask = vec![0u64; n];
        for i in 0..n {
            for j in i + 1..n {
                if !node_vars[i].is_disjoint(&node_vars[j]) {
                    adj_mask[i] |= 1 << j;
                    adj_mask[j] |= 1 << i;
                }
            }
        }

        let mut dp: Vec<Vec<SubtreePlan>> = vec![Vec::new(); n + 1];
        let mut seeds: Vec<SubtreePlan> = Vec::new();
        for node in &graph.nodes {
            let bit = 1u64 << node.id;
            for plan in self.seed_from_node(node)? {
                seeds.push(plan.with_nodes(bit));
            }
        }
        for (k, (plans, _)) in children.into_iter().enumerate() {
            let bit = 1u64 << (graph.len() + k);
            for plan in plans {
                seeds.push(plan.with_nodes(bit));
            }
        }
        self.apply_filters_if_possible(&mut seeds, filters, false);
        dp[1] = self.prune(seeds);

        for k in 2..=n {
            let mut candidates: Vec<SubtreePlan> = Vec::new();
            for i in 1..=k / 2 {
                for a in &dp[i] {
                    for b in &dp[k - i] {
                        if a.covered_nodes & b.covered_nodes != 0 {
                            continue;
                        }
                        if !connected(a, b, &adj_mask) {
                            continue;
                        }
                        candidates.extend(self.create_join_candidates(a, b)?);
                    }
                }
            }
            self.apply_filters_if_possible(&mut candidates, filters, false);
            dp[k] = self.prune(candidates);
        }

        let mut last = std::mem::take(&mut dp[n]);
        self.apply_filters_if_possible(&mut last, filters, true);
        if last.is_empty() {
            return Err(QueryError::Planning(
                "graph pattern is disconnected; cartesian products are not supported".into(),
            ));
        }
        Ok(self.prune(last))
    }

    /// Candidate scans (or the text leaf) for one graph node.
    fn seed_from_node(&self, node: &TgNode) -> Result<Vec<SubtreePlan>> {
        if node.is_text_node() {
            let cvar = node.cvar.clone().unwrap();
            let op = TextOperationWithoutFilter::new(
                &self.ctx,
                node.words.clone(),
                cvar.clone(),
                node.entity_vars.clone(),
            );
            let mut plan = SubtreePlan::basic(ExecutionTree::new(op));
            plan.seed = SeedKind::Text {
                words: node.words.clone(),
                cvar,
                entity_vars: node.entity_vars.clone(),
            };
            return Ok(vec![plan]);
        }

        let triple = node.triple.as_ref().unwrap();
        if triple.p.as_iri() == Some(HAS_PREDICATE) {
            let (Some(subject), Some(predicate)) =
                (triple.s.as_variable(), triple.o.as_variable())
            else {
                return Err(QueryError::NotYetImplemented(
                    "ql:has-predicate with fixed subject or predicate".into(),
                ));
            };
            let op = HasPredicateScan::free(&self.ctx, subject.clone(), predicate.clone());
            let mut plan = SubtreePlan::basic(ExecutionTree::new(op));
            plan.seed = SeedKind::HasPredicateFree {
                subject: subject.clone(),
                predicate: predicate.clone(),
            };
            return Ok(vec![plan]);
        }

        let s = self.scan_term(&triple.s);
        let p = match &triple.p {
            PropertyPath::Iri(iri) => ScanTerm::Fixed(self.resolve_term(iri)),
            PropertyPath::Variable(v) => ScanTerm::Var(v.clone()),
            other => {
                return Err(QueryError::Internal(format!(
                    "property path {other} survived expansion"
                )))
            }
        };
        let o = self.scan_term(&triple.o);

        let mut plans = Vec::new();
        for perm in Permutation::ALL {
            if let Some(scan) =
                IndexScan::try_new(&self.ctx, perm, s.clone(), p.clone(), o.clone())
            {
                plans.push(SubtreePlan::basic(ExecutionTree::new(scan)));
            }
        }
        debug_assert!(!plans.is_empty(), "every triple admits at least one scan");
        Ok(plans)
    }

    /// Join two plans; emits the standard join plus the specialised
    /// variants that apply (bound transitive path, bound has-predicate
    /// scan, text-filter fold).
    fn create_join_candidates(
        &self,
        a: &SubtreePlan,
        b: &SubtreePlan,
    ) -> Result<Vec<SubtreePlan>> {
        if a.plan_type != PlanType::Basic && b.plan_type != PlanType::Basic {
            return Ok(Vec::new());
        }
        // Normalise: `left` is the BASIC side.
        let (left, right) = if a.plan_type == PlanType::Basic {
            (a, b)
        } else {
            (b, a)
        };
        let covered_nodes = a.covered_nodes | b.covered_nodes;
        let covered_filters = a.covered_filters | b.covered_filters;
        let finish = |tree: ExecutionTree| SubtreePlan {
            tree,
            covered_nodes,
            covered_filters,
            plan_type: PlanType::Basic,
            seed: SeedKind::Plain,
        };

        let jcs = join_columns(&left.tree, &right.tree);
        match right.plan_type {
            PlanType::Optional => {
                if jcs.is_empty() {
                    return Ok(Vec::new());
                }
                let tree = ExecutionTree::new(OptionalJoin::new(
                    left.tree.clone(),
                    right.tree.clone(),
                    jcs,
                ));
                return Ok(vec![finish(tree)]);
            }
            PlanType::Minus => {
                if jcs.is_empty() {
                    return Ok(Vec::new());
                }
                let tree = ExecutionTree::new(MinusJoin::new(
                    left.tree.clone(),
                    right.tree.clone(),
                    jcs,
                ));
                return Ok(vec![finish(tree)]);
            }
            PlanType::Basic => {}
        }
        if jcs.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        if let Some(tree) = self.try_transitive_bind(left, right, &jcs)? {
            out.push(finish(tree));
        }
        if let Some(tree) = self.try_has_predicate_bind(left, right, &jcs) {
            out.push(finish(tree));
        }
        if let Some(tree) = self.try_text_fold(left, right, &jcs) {
            out.push(finish(tree));
        }

        // Standard join: sort-merge on a single column, hash join on
        // several. A transitive path with two free endpoints is never
        // materialised as a plain join input.
        let free_transitive = |plan: &SubtreePlan| {
            matches!(
                &plan.seed,
                SeedKind::Transitive { left, right, .. }
                    if matches!(left, PathEnd::Var(_)) && matches!(right, PathEnd::Var(_))
            )
        };
        if !free_transitive(left) && !free_transitive(right) {
            if let [(lc, rc)] = jcs.as_slice() {
                let ls = ensure_sorted_on(&self.ctx, left.tree.clone(), *lc);
                let rs = ensure_sorted_on(&self.ctx, right.tree.clone(), *rc);
                out.push(finish(ExecutionTree::new(Join::new(
                    &self.ctx, ls, rs, *lc, *rc,
                ))));
            } else {
                out.push(finish(ExecutionTree::new(HashJoin::new(
                    &self.ctx,
                    left.tree.clone(),
                    right.tree.clone(),
                    jcs,
                ))));
            }
        }
        Ok(out)
    }

    /// If one side is a transitive path with a free endpoint on the
    /// (single) join variable, bind that endpoint to the other side.
    fn try_transitive_bind(
        &self,
        a: &SubtreePlan,
        b: &SubtreePlan,
        jcs: &[(usize, usize)],
    ) -> Result<Option<ExecutionTree>> {
        let [(ca, cb)] = jcs else { return Ok(None) };
        let candidates = [(a, b, *ca, *cb), (b, a, *cb, *ca)];
        for (path_side, other, path_col, _) in candidates {
            let SeedKind::Transitive {
                sub,
                left,
                right,
                min,
                max,
            } = &path_side.seed
            else {
                continue;
            };
            if matches!(other.seed, SeedKind::Transitive { .. }) {
                continue;
            }
            let Some(var) = path_side.tree.variable_columns().variable_at(path_col) else {
                continue;
            };
            let path = TransitivePath::new(sub.clone(), left.clone(), right.clone(), *min, *max);
            if let Some(bound) = path.bind_side(other.tree.clone(), var) {
                return Ok(Some(ExecutionTree::new(bound)));
            }
        }
        Ok(None)
    }

    /// If one side is a free has-predicate scan joined on its subject,
    /// feed the other side into the scan.
    fn try_has_predicate_bind(
        &self,
        a: &SubtreePlan,
        b: &SubtreePlan,
        jcs: &[(usize, usize)],
    ) -> Option<ExecutionTree> {
        let [(ca, cb)] = jcs else { return None };
        let candidates = [(a, b, *ca), (b, a, *cb)];
        for (scan_side, other, scan_col) in candidates {
            let SeedKind::HasPredicateFree { subject, predicate } = &scan_side.seed else {
                continue;
            };
            let joined = scan_side.tree.variable_columns().variable_at(scan_col)?;
            if joined != subject {
                continue;
            }
            let other_col = other.tree.column_of(subject)?;
            return Some(ExecutionTree::new(HasPredicateScan::bound(
                &self.ctx,
                other.tree.clone(),
                other_col,
                predicate.clone(),
            )));
        }
        None
    }

    /// If one side is a text leaf joined on one of its entity
    /// variables, fold the other side in as the text filter.
    fn try_text_fold(
        &self,
        a: &SubtreePlan,
        b: &SubtreePlan,
        jcs: &[(usize, usize)],
    ) -> Option<ExecutionTree> {
        let [(ca, cb)] = jcs else { return None };
        let candidates = [(a, b, *ca), (b, a, *cb)];
        for (text_side, other, text_col) in candidates {
            let SeedKind::Text {
                words,
                cvar,
                entity_vars,
            } = &text_side.seed
            else {
                continue;
            };
            let joined = text_side.tree.variable_columns().variable_at(text_col)?;
            if !entity_vars.contains(joined) {
                continue;
            }
            // The folded entity variable becomes the first one.
            let mut reordered = vec![joined.clone()];
            reordered.extend(entity_vars.iter().filter(|v| *v != joined).cloned());
            let other_col = other.tree.column_of(joined)?;
            return Some(ExecutionTree::new(TextOperationWithFilter::new(
                &self.ctx,
                words.clone(),
                cvar.clone(),
                reordered,
                other.tree.clone(),
                other_col,
            )));
        }
        None
    }

    /// Apply every filter whose variables are all bound. With
    /// `replace` the filtered plan replaces the original; otherwise
    /// both variants stay in the row.
    fn apply_filters_if_possible(
        &self,
        row: &mut Vec<SubtreePlan>,
        filters: &[Expression],
        replace: bool,
    ) {
        let mut i = 0;
        while i < row.len() {
            for (fi, filter) in filters.iter().enumerate() {
                let bit = 1u64 << fi;
                if row[i].covered_filters & bit != 0 {
                    continue;
                }
                let vars = filter.all_variables();
                if !vars.iter().all(|v| row[i].tree.column_of(v).is_some()) {
                    continue;
                }
                let tree = ExecutionTree::new(Filter::new(
                    &self.ctx,
                    row[i].tree.clone(),
                    filter.clone(),
                ));
                let plan = SubtreePlan {
                    tree,
                    covered_nodes: row[i].covered_nodes,
                    covered_filters: row[i].covered_filters | bit,
                    plan_type: row[i].plan_type,
                    seed: SeedKind::Plain,
                };
                if replace {
                    row[i] = plan;
                } else {
                    row.push(plan);
                }
            }
            i += 1;
        }
    }

    /// Dominance pruning: per (covered nodes, covered filters, sort
    /// order) keep only the cheapest plan. Ties break by cache key in
    /// test mode and by first appearance otherwise.
    ///
    /// When a row still exceeds [`MAX_PLANS_PER_ROW`] the sort-order
    /// distinction is dropped and only the cheapest plan per covered
    /// set survives; large patterns stay plannable at the price of an
    /// occasional extra sort.
    fn prune(&self, plans: Vec<SubtreePlan>) -> Vec<SubtreePlan> {
        let pruned = self.prune_by(plans, pruning_key);
        if pruned.len() <= MAX_PLANS_PER_ROW {
            return pruned;
        }
        self.prune_by(pruned, |plan| {
            format!("{:x}|{:x}", plan.covered_nodes, plan.covered_filters)
        })
    }

    fn prune_by(
        &self,
        plans: Vec<SubtreePlan>,
        key_of: impl Fn(&SubtreePlan) -> String,
    ) -> Vec<SubtreePlan> {
        let mut best: BTreeMap<String, SubtreePlan> = BTreeMap::new();
        for plan in plans {
            let key = key_of(&plan);
            match best.get(&key) {
                None => {
                    best.insert(key, plan);
                }
                Some(current) => {
                    let better = match plan.cost().cmp(&current.cost()) {
                        std::cmp::Ordering::Less => true,
                        std::cmp::Ordering::Equal if self.ctx.test_mode() => {
                            plan.tree.cache_key() < current.tree.cache_key()
                        }
                        _ => false,
                    };
                    if better {
                        best.insert(key, plan);
                    }
                }
            }
        }
        best.into_values().collect()
    }

    fn apply_optional_minus(
        &self,
        row: Vec<SubtreePlan>,
        inner: &GraphPattern,
        plan_type: PlanType,
    ) -> Result<Vec<SubtreePlan>> {
        let inner_row = self.optimize(inner)?;
        let inner_best = inner_row[self.find_cheapest_execution_tree(&inner_row)?]
            .tree
            .clone();
        let mut out = Vec::with_capacity(row.len());
        for plan in row {
            let jcs = join_columns(&plan.tree, &inner_best);
            if jcs.is_empty() {
                match plan_type {
                    // MINUS without shared variables removes nothing.
                    PlanType::Minus => {
                        out.push(plan);
                        continue;
                    }
                    _ => {
                        return Err(QueryError::NotYetImplemented(
                            "OPTIONAL without shared variables".into(),
                        ))
                    }
                }
            }
            let tree = match plan_type {
                PlanType::Optional => ExecutionTree::new(OptionalJoin::new(
                    plan.tree.clone(),
                    inner_best.clone(),
                    jcs,
                )),
                PlanType::Minus => ExecutionTree::new(MinusJoin::new(
                    plan.tree.clone(),
                    inner_best.clone(),
                    jcs,
                )),
                PlanType::Basic => unreachable!(),
            };
            out.push(SubtreePlan {
                tree,
                seed: SeedKind::Plain,
                ..plan
            });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Top-of-query finalisation
    // ------------------------------------------------------------------

    /// Plans for a detected pattern trick: the full pattern-table walk
    /// when the trick triple was the whole WHERE clause, otherwise the
    /// bound form counting over the planned remainder's subject column
    /// (deduplicated first for a DISTINCT count).
    fn pattern_trick_row(&self, trick: &PatternTrick) -> Result<Vec<SubtreePlan>> {
        let tuple = &trick.tuple;
        let Some(remainder) = &trick.remainder else {
            let op = CountAvailablePredicates::full(
                &self.ctx,
                tuple.predicate_var.clone(),
                tuple.count_var.clone(),
            );
            return Ok(vec![SubtreePlan::basic(ExecutionTree::new(op))]);
        };
        let subject = tuple.subject_var.as_ref().ok_or_else(|| {
            QueryError::Internal("pattern-trick remainder without a subject variable".into())
        })?;
        let row = self.optimize(remainder)?;
        row.into_iter()
            .map(|plan| {
                let mut tree = plan.tree.clone();
                let col = tree.column_of(subject).ok_or_else(|| {
                    QueryError::Internal(format!(
                        "pattern-trick remainder does not bind {subject}"
                    ))
                })?;
                if tuple.distinct {
                    tree = ExecutionTree::new(Distinct::new(tree, vec![col]));
                }
                let op = CountAvailablePredicates::for_subtree(
                    tree,
                    col,
                    tuple.predicate_var.clone(),
                    tuple.count_var.clone(),
                );
                Ok(SubtreePlan {
                    tree: ExecutionTree::new(op),
                    seed: SeedKind::Plain,
                    ..plan
                })
            })
            .collect()
    }

    fn group_by_row(
        &self,
        query: &ParsedQuery,
        row: Vec<SubtreePlan>,
    ) -> Result<Vec<SubtreePlan>> {
        let aliases: Vec<(Expression, Variable)> = query
            .select
            .aliases()
            .into_iter()
            .map(|(e, v)| (e.clone(), v.clone()))
            .collect();
        let group_vars = query.modifiers.group_by.clone();
        row.into_iter()
            .map(|plan| {
                let op = GroupBy::new(plan.tree.clone(), group_vars.clone(), aliases.clone())?;
                Ok(SubtreePlan {
                    tree: ExecutionTree::new(op),
                    seed: SeedKind::Plain,
                    ..plan
                })
            })
            .collect()
    }

    fn having_row(
        &self,
        query: &ParsedQuery,
        row: Vec<SubtreePlan>,
    ) -> Result<Vec<SubtreePlan>> {
        for expr in &query.modifiers.having {
            if expr.contains_aggregate() {
                return Err(QueryError::NotYetImplemented(
                    "aggregates inside HAVING; alias the aggregate in SELECT instead".into(),
                ));
            }
        }
        Ok(row
            .into_iter()
            .map(|plan| {
                let mut tree = plan.tree.clone();
                for expr in &query.modifiers.having {
                    tree = ExecutionTree::new(Filter::new(&self.ctx, tree, expr.clone()));
                }
                SubtreePlan {
                    tree,
                    seed: SeedKind::Plain,
                    ..plan
                }
            })
            .collect())
    }

    /// Projection and DISTINCT. Non-aggregate select aliases evaluate
    /// as BINDs here when the query has no grouping.
    fn select_row(
        &self,
        query: &ParsedQuery,
        row: Vec<SubtreePlan>,
        grouped: bool,
    ) -> Result<Vec<SubtreePlan>> {
        let selected = query.select.selected_variables();
        let mut out = Vec::with_capacity(row.len());
        for plan in row {
            let mut tree = plan.tree.clone();
            if !grouped {
                for (expr, var) in query.select.aliases() {
                    tree = ExecutionTree::new(Bind::new(tree, var.clone(), expr.clone()));
                }
            }
            for var in &selected {
                if tree.column_of(var).is_none() {
                    return Err(QueryError::Planning(format!(
                        "selected variable {var} is not bound by the query body"
                    )));
                }
            }
            let bound: BTreeSet<Variable> = tree
                .variable_columns()
                .iter()
                .map(|(v, _)| v.clone())
                .collect();
            let selected_set: BTreeSet<Variable> = selected.iter().cloned().collect();
            if bound != selected_set {
                tree = ExecutionTree::new(Subquery::new(tree, selected.clone())?);
            }
            if query.select.distinct {
                let cols: Vec<usize> = selected
                    .iter()
                    .map(|v| tree.column_of(v).expect("checked above"))
                    .collect();
                tree = ExecutionTree::new(Distinct::new(tree, cols));
            }
            out.push(SubtreePlan {
                tree,
                seed: SeedKind::Plain,
                ..plan
            });
        }
        Ok(out)
    }

    fn order_by_row(
        &self,
        query: &ParsedQuery,
        row: Vec<SubtreePlan>,
    ) -> Result<Vec<SubtreePlan>> {
        let mut out = Vec::with_capacity(row.len());
        for plan in row {
            let mut keys = Vec::with_capacity(query.modifiers.order_by.len());
            for key in &query.modifiers.order_by {
                let col = plan.tree.column_of(&key.variable).ok_or_else(|| {
                    QueryError::Planning(format!(
                        "ORDER BY variable {} is not bound by the result",
                        key.variable
                    ))
                })?;
                keys.push(SortKey {
                    col,
                    descending: key.descending,
                });
            }
            let tree = match keys.as_slice() {
                [only] if !only.descending => {
                    ExecutionTree::new(Sort::new(&self.ctx, plan.tree.clone(), only.col))
                }
                _ => ExecutionTree::new(OrderBy::new(&self.ctx, plan.tree.clone(), keys)),
            };
            out.push(SubtreePlan {
                tree,
                seed: SeedKind::Plain,
                ..plan
            });
        }
        Ok(out)
    }
}

/// `(left column, right column)` pairs for the shared variables of two
/// trees, in variable order.
fn join_columns(left: &ExecutionTree, right: &ExecutionTree) -> Vec<(usize, usize)> {
    left.variable_columns()
        .shared_variables(right.variable_columns())
        .into_iter()
        .map(|var| {
            (
                left.column_of(&var).unwrap(),
                right.column_of(&var).unwrap(),
            )
        })
        .collect()
}

fn connected(a: &SubtreePlan, b: &SubtreePlan, adj_mask: &[u64]) -> bool {
    let mut reach = 0u64;
    let mut bits = a.covered_nodes;
    while bits != 0 {
        let i = bits.trailing_zeros() as usize;
        reach |= adj_mask[i];
        bits &= bits - 1;
    }
    reach & b.covered_nodes != 0
}

/// Dominance key: covered nodes, covered filters, and the sort order
/// expressed through variable names (column indices are not comparable
/// across different scans of the same node).
fn pruning_key(plan: &SubtreePlan) -> String {
    let sort_vars: Vec<String> = plan
        .tree
        .result_sorted_on()
        .iter()
        .filter_map(|&c| {
            plan.tree
                .variable_columns()
                .variable_at(c)
                .map(|v| v.name().to_owned())
        })
        .collect();
    format!(
        "{:x}|{:x}|{}",
        plan.covered_nodes,
        plan.covered_filters,
        sort_vars.join(",")
    )
}

/// For subqueries without ORDER BY: keep the cheapest plan per leading
/// sort variable (including "unsorted").
fn keep_one_plan_per_ordering(row: Vec<SubtreePlan>) -> Vec<SubtreePlan> {
    let mut best: BTreeMap<String, SubtreePlan> = BTreeMap::new();
    for plan in row {
        let key = plan
            .tree
            .result_sorted_on()
            .first()
            .and_then(|&c| plan.tree.variable_columns().variable_at(c))
            .map(|v| v.name().to_owned())
            .unwrap_or_default();
        match best.get(&key) {
            Some(current) if current.cost() <= plan.cost() => {}
            _ => {
                best.insert(key, plan);
            }
        }
    }
    best.into_values().collect()
}
