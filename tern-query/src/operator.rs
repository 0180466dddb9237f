//! The operator abstraction and the execution tree.
//!
//! An [`Operation`] is one node of an executable plan: it knows its size
//! and cost estimates, its variable-to-column mapping, its guaranteed
//! sort order, a deterministic cache key, and how to compute its result
//! table. The operator set is closed; polymorphism is dynamic dispatch
//! over the sealed set of implementations in [`crate::op`].
//!
//! [`ExecutionTree`] wraps an operation behind an `Arc` and mediates
//! every result through the shared [`ResultCache`], so identical
//! subtrees across concurrent queries compute at most once.

use crate::cache::CacheValue;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::runtime_info::{CacheStatus, RuntimeInformation};
use crate::var_map::VariableColumns;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tern_core::ResultTable;
use tracing::{debug_span, Instrument};

/// One executable operator.
///
/// Estimates and the cache key are pure functions of the construction
/// parameters and the children; they never depend on clocks, addresses,
/// or unordered-map iteration.
#[async_trait]
pub trait Operation: Send + Sync + std::fmt::Debug {
    /// Operator name as shown in runtime statistics, e.g. `"Join"`.
    fn name(&self) -> &'static str;

    /// Deterministic key identifying the result of this subtree. Includes
    /// the operator name, all result-affecting parameters and the
    /// children's keys; pinning flags are excluded.
    fn cache_key(&self) -> String;

    /// Estimated result cardinality.
    fn estimated_size(&self) -> usize;

    /// Estimated total cost including the children.
    fn cost_estimate(&self) -> usize;

    /// The variables bound by the result and their columns.
    fn variable_columns(&self) -> &VariableColumns;

    /// The guaranteed sort prefix of the result (column indices).
    fn result_sorted_on(&self) -> &[usize];

    /// Child subtrees, in operand order.
    fn children(&self) -> Vec<&ExecutionTree>;

    /// Compute the result table. Implementations poll the deadline at
    /// batch boundaries and must not hold locks across child calls.
    async fn compute(&self, ctx: &ExecutionContext) -> Result<ResultTable>;
}

/// A shareable handle on one operator subtree.
#[derive(Clone, Debug)]
pub struct ExecutionTree {
    op: Arc<dyn Operation>,
    cache_key: Arc<str>,
    runtime: Arc<Mutex<Option<RuntimeInformation>>>,
}

impl ExecutionTree {
    pub fn new(op: impl Operation + 'static) -> Self {
        let op: Arc<dyn Operation> = Arc::new(op);
        let cache_key: Arc<str> = Arc::from(op.cache_key());
        Self {
            op,
            cache_key,
            runtime: Arc::new(Mutex::new(None)),
        }
    }

    pub fn op(&self) -> &Arc<dyn Operation> {
        &self.op
    }

    /// The precomputed cache key of the root operator.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn estimated_size(&self) -> usize {
        self.op.estimated_size()
    }

    pub fn cost_estimate(&self) -> usize {
        self.op.cost_estimate()
    }

    pub fn variable_columns(&self) -> &VariableColumns {
        self.op.variable_columns()
    }

    pub fn result_sorted_on(&self) -> &[usize] {
        self.op.result_sorted_on()
    }

    /// Column of `var`, if bound by this subtree.
    pub fn column_of(&self, var: &crate::ir::Variable) -> Option<usize> {
        self.op.variable_columns().get(var)
    }

    /// Result width.
    pub fn width(&self) -> usize {
        self.op.variable_columns().len()
    }

    /// The statistics of the most recent `get_result` on this handle.
    pub fn runtime_info(&self) -> Option<RuntimeInformation> {
        self.runtime.lock().unwrap().clone()
    }

    /// Obtain the result of an intermediate subtree, memoised through
    /// the cache and pinned when the context pins subtrees.
    pub async fn get_result(&self, ctx: &ExecutionContext) -> Result<Arc<CacheValue>> {
        self.get_result_impl(ctx, ctx.pin_subtrees()).await
    }

    /// Obtain the result of the query root; additionally honours the
    /// `pin_result` flag.
    pub async fn get_query_result(&self, ctx: &ExecutionContext) -> Result<Arc<CacheValue>> {
        self.get_result_impl(ctx, ctx.pin_subtrees() || ctx.pin_result())
            .await
    }

    async fn get_result_impl(&self, ctx: &ExecutionContext, pin: bool) -> Result<Arc<CacheValue>> {
        ctx.check_deadline()?;
        let span = debug_span!("compute", operator = self.op.name());
        let (value, status) = ctx
            .cache()
            .compute_if_absent(&self.cache_key, pin, || {
                async {
                    let start = Instant::now();
                    let table = self.op.compute(ctx).await?;
                    let time_ms = start.elapsed().as_millis() as u64;
                    let children = self
                        .op
                        .children()
                        .iter()
                        .map(|child| {
                            child.runtime_info().unwrap_or_else(|| {
                                RuntimeInformation::not_computed(child.op().name())
                            })
                        })
                        .collect();
                    let runtime = RuntimeInformation {
                        operator: self.op.name().to_owned(),
                        rows: table.num_rows(),
                        cols: table.width(),
                        time_ms,
                        cache_status: CacheStatus::Computed,
                        children,
                    };
                    Ok(CacheValue::new(table, runtime))
                }
                .instrument(span)
            })
            .await?;

        let runtime = match status {
            CacheStatus::Computed => value.runtime.clone(),
            hit => value.runtime.clone().as_cache_hit(hit),
        };
        *self.runtime.lock().unwrap() = Some(runtime);
        Ok(value)
    }
}
