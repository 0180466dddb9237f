//! Triple-index interface and the in-memory reference implementation.
//!
//! The execution core only ever talks to [`TripleIndex`]: ordered scans
//! over the six permutations, cardinality counts for the planner, the
//! vocabulary, the precomputed subject-pattern table, and the text-record
//! postings. On-disk implementations live elsewhere; [`MemoryIndex`] backs
//! tests and embedded use.
//!
//! All scans yield rows sorted by the requested permutation.

use crate::alloc::MemoryBudget;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::permutation::Permutation;
use crate::table::IdTable;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Handle of one entry in the predicate-pattern table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PatternId(pub u32);

/// Read-only triple index.
#[async_trait]
pub trait TripleIndex: Send + Sync + std::fmt::Debug {
    /// Total number of triples.
    fn num_triples(&self) -> usize;

    /// Number of triples whose leading key columns (in `perm` order)
    /// equal `prefix`. `prefix` may have zero to three entries.
    fn count_with_prefix(&self, perm: Permutation, prefix: &[Id]) -> usize;

    /// Scan the triples matching `prefix` under `perm`. The returned
    /// table has one column per non-fixed position, in permutation key
    /// order, and its rows are sorted.
    async fn scan(&self, perm: Permutation, prefix: &[Id], budget: &MemoryBudget)
        -> Result<IdTable>;

    /// Encode a vocabulary term.
    fn vocab_id(&self, term: &str) -> Option<Id>;

    /// Decode a global vocabulary id.
    fn vocab_lookup(&self, id: Id) -> Option<Arc<str>>;

    /// The pattern of predicates attached to `subject`, if any.
    fn pattern_for(&self, subject: Id) -> Option<PatternId>;

    /// Predicates of one pattern, sorted.
    fn predicates_in_pattern(&self, pattern: PatternId) -> &[Id];

    /// All `(subject, pattern)` entries, sorted by subject.
    fn subject_patterns(&self) -> &[(Id, PatternId)];

    /// Text records containing `word` (exact, or prefix when `word` ends
    /// with `*`), sorted.
    fn text_records(&self, word: &str) -> Vec<Id>;

    /// Entities co-occurring in a text record.
    fn entities_in_record(&self, record: Id) -> &[Id];
}

/// Builder for [`MemoryIndex`].
#[derive(Debug, Default)]
pub struct MemoryIndexBuilder {
    triples: Vec<[String; 3]>,
    text: Vec<(Vec<String>, Vec<String>)>,
}

impl MemoryIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one triple of vocabulary terms.
    pub fn add_triple(
        &mut self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> &mut Self {
        self.triples
            .push([subject.into(), predicate.into(), object.into()]);
        self
    }

    /// Add a text record containing `words`, mentioning `entities`
    /// (vocabulary terms).
    pub fn add_text_record(
        &mut self,
        words: impl IntoIterator<Item = impl Into<String>>,
        entities: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.text.push((
            words.into_iter().map(Into::into).collect(),
            entities.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Freeze into an immutable index. Vocabulary ids are assigned in
    /// lexicographic term order so id order equals string order.
    pub fn build(self) -> MemoryIndex {
        let mut terms: BTreeSet<String> = BTreeSet::new();
        for t in &self.triples {
            terms.extend(t.iter().cloned());
        }
        for (_, entities) in &self.text {
            terms.extend(entities.iter().cloned());
        }

        let vocab: Vec<Arc<str>> = terms.into_iter().map(Arc::from).collect();
        let by_term: FxHashMap<Arc<str>, u64> = vocab
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u64))
            .collect();
        let encode = |term: &str| Id::from_vocab(by_term[term]);

        let mut triples: Vec<[Id; 3]> = self
            .triples
            .iter()
            .map(|[s, p, o]| [encode(s), encode(p), encode(o)])
            .collect();
        triples.sort_unstable();
        triples.dedup();

        let mut permutations = FxHashMap::default();
        for perm in Permutation::ALL {
            let order = perm.key_order();
            let mut sorted: Vec<[Id; 3]> = triples
                .iter()
                .map(|t| [t[order[0]], t[order[1]], t[order[2]]])
                .collect();
            sorted.sort_unstable();
            permutations.insert(perm, sorted);
        }

        // Predicate patterns: group each subject's predicate set, then
        // deduplicate the sets.
        let mut per_subject: BTreeMap<Id, BTreeSet<Id>> = BTreeMap::new();
        for [s, p, _] in &triples {
            per_subject.entry(*s).or_default().insert(*p);
        }
        let mut pattern_ids: BTreeMap<Vec<Id>, PatternId> = BTreeMap::new();
        let mut patterns: Vec<Vec<Id>> = Vec::new();
        let mut subject_patterns: Vec<(Id, PatternId)> = Vec::new();
        for (subject, preds) in per_subject {
            let key: Vec<Id> = preds.into_iter().collect();
            let pid = *pattern_ids.entry(key.clone()).or_insert_with(|| {
                patterns.push(key);
                PatternId(patterns.len() as u32 - 1)
            });
            subject_patterns.push((subject, pid));
        }

        let mut records: Vec<TextRecord> = Vec::new();
        for (idx, (words, entities)) in self.text.into_iter().enumerate() {
            let mut entity_ids: Vec<Id> = entities.iter().map(|e| encode(e)).collect();
            entity_ids.sort_unstable();
            entity_ids.dedup();
            records.push(TextRecord {
                id: Id::from_text(idx as u64),
                words,
                entities: entity_ids,
            });
        }

        MemoryIndex {
            vocab,
            by_term,
            permutations,
            num_triples: triples.len(),
            patterns,
            subject_patterns,
            records,
        }
    }
}

#[derive(Debug)]
struct TextRecord {
    id: Id,
    words: Vec<String>,
    entities: Vec<Id>,
}

/// In-memory [`TripleIndex`]: six sorted triple arrays plus the pattern
/// and text tables.
#[derive(Debug)]
pub struct MemoryIndex {
    vocab: Vec<Arc<str>>,
    by_term: FxHashMap<Arc<str>, u64>,
    permutations: FxHashMap<Permutation, Vec<[Id; 3]>>,
    num_triples: usize,
    patterns: Vec<Vec<Id>>,
    subject_patterns: Vec<(Id, PatternId)>,
    records: Vec<TextRecord>,
}

impl MemoryIndex {
    pub fn builder() -> MemoryIndexBuilder {
        MemoryIndexBuilder::new()
    }

    /// The half-open range of rows matching `prefix` in a sorted
    /// permutation array.
    fn prefix_range(rows: &[[Id; 3]], prefix: &[Id]) -> (usize, usize) {
        let matches = |row: &[Id; 3]| -> std::cmp::Ordering {
            for (i, p) in prefix.iter().enumerate() {
                match row[i].cmp(p) {
                    std::cmp::Ordering::Equal => continue,
                    other => return other,
                }
            }
            std::cmp::Ordering::Equal
        };
        let start = rows.partition_point(|r| matches(r) == std::cmp::Ordering::Less);
        let end = rows.partition_point(|r| matches(r) != std::cmp::Ordering::Greater);
        (start, end)
    }
}

#[async_trait]
impl TripleIndex for MemoryIndex {
    fn num_triples(&self) -> usize {
        self.num_triples
    }

    fn count_with_prefix(&self, perm: Permutation, prefix: &[Id]) -> usize {
        debug_assert!(prefix.len() <= 3);
        let rows = &self.permutations[&perm];
        let (start, end) = Self::prefix_range(rows, prefix);
        end - start
    }

    async fn scan(
        &self,
        perm: Permutation,
        prefix: &[Id],
        budget: &MemoryBudget,
    ) -> Result<IdTable> {
        if prefix.len() > 3 {
            return Err(Error::Index(format!(
                "scan prefix has {} components, at most 3 allowed",
                prefix.len()
            )));
        }
        let rows = &self.permutations[&perm];
        let (start, end) = Self::prefix_range(rows, prefix);
        let width = 3 - prefix.len();
        let mut table = IdTable::new(width, budget);
        table.reserve(end - start);
        let mut row_buf = [Id::UNDEFINED; 3];
        for row in &rows[start..end] {
            row_buf[..width].copy_from_slice(&row[prefix.len()..]);
            table.push_row(&row_buf[..width])?;
        }
        Ok(table)
    }

    fn vocab_id(&self, term: &str) -> Option<Id> {
        self.by_term.get(term).map(|&i| Id::from_vocab(i))
    }

    fn vocab_lookup(&self, id: Id) -> Option<Arc<str>> {
        if id.is_local_vocab() {
            return None;
        }
        self.vocab.get(id.vocab_index()? as usize).cloned()
    }

    fn pattern_for(&self, subject: Id) -> Option<PatternId> {
        self.subject_patterns
            .binary_search_by_key(&subject, |(s, _)| *s)
            .ok()
            .map(|i| self.subject_patterns[i].1)
    }

    fn predicates_in_pattern(&self, pattern: PatternId) -> &[Id] {
        &self.patterns[pattern.0 as usize]
    }

    fn subject_patterns(&self) -> &[(Id, PatternId)] {
        &self.subject_patterns
    }

    fn text_records(&self, word: &str) -> Vec<Id> {
        let matches: Box<dyn Fn(&str) -> bool> = match word.strip_suffix('*') {
            Some(stem) => {
                let stem = stem.to_owned();
                Box::new(move |w: &str| w.starts_with(&stem))
            }
            None => {
                let word = word.to_owned();
                Box::new(move |w: &str| w == word)
            }
        };
        self.records
            .iter()
            .filter(|r| r.words.iter().any(|w| matches(w)))
            .map(|r| r.id)
            .collect()
    }

    fn entities_in_record(&self, record: Id) -> &[Id] {
        match record.datatype() {
            crate::id::Datatype::TextIndex => self
                .records
                .get(record.payload() as usize)
                .map(|r| r.entities.as_slice())
                .unwrap_or(&[]),
            _ => &[],
        }
    }
}
