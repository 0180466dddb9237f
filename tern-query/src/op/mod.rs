//! The executable operator set.
//!
//! Each module implements one operator of the plan language. The set is
//! closed; the planner is the only producer.

pub mod bind;
pub mod count_predicates;
pub mod distinct;
pub mod filter;
pub mod group_by;
pub mod has_predicate_scan;
pub mod join;
pub mod minus;
pub mod neutral;
pub mod optional;
pub mod scan;
pub mod sort;
pub mod subquery;
pub mod text;
pub mod transitive_path;
pub mod union;
pub mod values;

pub use bind::Bind;
pub use count_predicates::CountAvailablePredicates;
pub use distinct::Distinct;
pub use filter::Filter;
pub use group_by::GroupBy;
pub use has_predicate_scan::HasPredicateScan;
pub use join::{HashJoin, Join};
pub use minus::MinusJoin;
pub use neutral::NeutralElement;
pub use optional::OptionalJoin;
pub use scan::{IndexScan, ScanTerm};
pub use sort::{ensure_sorted_on, OrderBy, Sort};
pub use subquery::Subquery;
pub use text::{TextOperationWithFilter, TextOperationWithoutFilter};
pub use transitive_path::{PathEnd, TransitivePath};
pub use union::Union;
pub use values::Values;

use rustc_hash::FxHashMap;
use tern_core::{Id, LocalVocab, ResultTable};

/// Rows processed between deadline polls in operator loops.
pub(crate) const BATCH_CHECK: usize = 1024;

/// Merge the local vocabularies of two inputs. Returns the combined
/// vocabulary and the id remap to apply to the right input's local ids
/// (`None` when the right input has no local vocabulary).
pub(crate) fn merge_vocabs(
    left: &ResultTable,
    right: &ResultTable,
) -> (LocalVocab, Option<FxHashMap<u64, u64>>) {
    let mut vocab = left.local_vocab().clone();
    if right.local_vocab().is_empty() {
        return (vocab, None);
    }
    let remap = vocab.absorb(right.local_vocab());
    (vocab, Some(remap))
}

/// Apply a local-vocab id remap to one id.
#[inline]
pub(crate) fn remap_id(id: Id, remap: Option<&FxHashMap<u64, u64>>) -> Id {
    match remap {
        Some(map) if id.is_local_vocab() => {
            let old = id.vocab_index().unwrap();
            Id::from_local_vocab(*map.get(&old).unwrap_or(&old))
        }
        _ => id,
    }
}
