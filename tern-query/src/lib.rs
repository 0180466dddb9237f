//! # Tern Query
//!
//! Query planner and execution core for the Tern graph engine.
//!
//! This crate provides:
//! - A concurrent, bounded result cache with single-flight computation
//!   and pinning ([`cache::ResultCache`])
//! - The per-query [`context::ExecutionContext`]
//! - A closed set of executable operators ([`op`]) behind the
//!   [`operator::Operation`] trait, memoised through the cache
//! - The dynamic-programming [`planner::QueryPlanner`] over the triple
//!   graph, with property-path expansion, text-clique collapse and the
//!   pattern trick
//! - An [`expression`] evaluator with distinct-aware aggregates
//!
//! ## Quick start
//!
//! Build an [`ir::ParsedQuery`], create an `ExecutionContext` over a
//! [`tern_core::TripleIndex`] and a shared `ResultCache`, plan with
//! `QueryPlanner::create_execution_tree`, then await
//! `tree.get_query_result(&ctx)`.

pub mod cache;
pub mod config;
pub mod context;
pub mod cost;
pub mod deadline;
pub mod error;
pub mod expression;
pub mod ir;
pub mod op;
pub mod operator;
pub mod planner;
pub mod runtime_info;
pub mod var_map;

// Re-exports
pub use cache::{CacheStatsSnapshot, CacheValue, ResultCache};
pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use cost::{CostFactors, SortCostModel};
pub use deadline::Deadline;
pub use error::{QueryError, Result};
pub use expression::{
    AggregateKind, BinaryOp, EvaluationContext, Expression, ExpressionResult, IntervalSet,
    Numeric, UnaryOp, Value,
};
pub use ir::{
    GraphPattern, Modifiers, OrderKey, ParsedQuery, PatternOperation, PropertyPath, SelectClause,
    SelectEntry, SparqlTriple, TripleComponent, ValueTerm, ValuesClause, Variable,
};
pub use operator::{ExecutionTree, Operation};
pub use planner::{PlannedQuery, QueryPlanner, SubtreePlan};
pub use runtime_info::{CacheStatus, RuntimeInformation};
pub use var_map::VariableColumns;
