//! Result-local vocabulary.
//!
//! Strings produced during query execution (VALUES literals, BIND results)
//! that are not part of the global index vocabulary are appended here and
//! addressed by local-vocab ids (see [`Id::from_local_vocab`]).

use crate::id::Id;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Append-only list of strings private to one result table.
#[derive(Debug, Default, Clone)]
pub struct LocalVocab {
    words: Vec<Arc<str>>,
    by_word: FxHashMap<Arc<str>, u64>,
}

impl LocalVocab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `word`, returning a local-vocab id. Re-interning the same
    /// word returns the same id.
    pub fn intern(&mut self, word: &str) -> Id {
        if let Some(&idx) = self.by_word.get(word) {
            return Id::from_local_vocab(idx);
        }
        let idx = self.words.len() as u64;
        let shared: Arc<str> = Arc::from(word);
        self.words.push(shared.clone());
        self.by_word.insert(shared, idx);
        Id::from_local_vocab(idx)
    }

    /// Look up a previously interned word by its local-vocab id.
    pub fn lookup(&self, id: Id) -> Option<&Arc<str>> {
        if !id.is_local_vocab() {
            return None;
        }
        self.words.get(id.vocab_index()? as usize)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Absorb another local vocab, returning the id offset applied to the
    /// other's entries. Used when merging child results.
    pub fn absorb(&mut self, other: &LocalVocab) -> FxHashMap<u64, u64> {
        let mut remap = FxHashMap::default();
        for (idx, word) in other.words.iter().enumerate() {
            let new_id = self.intern(word);
            remap.insert(idx as u64, new_id.vocab_index().unwrap());
        }
        remap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut vocab = LocalVocab::new();
        let a = vocab.intern("alpha");
        let b = vocab.intern("beta");
        assert_ne!(a, b);
        assert_eq!(vocab.intern("alpha"), a);
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.lookup(a).unwrap().as_ref(), "alpha");
    }

    #[test]
    fn test_absorb_remaps() {
        let mut left = LocalVocab::new();
        left.intern("x");
        let mut right = LocalVocab::new();
        right.intern("y");
        right.intern("x");
        let remap = left.absorb(&right);
        assert_eq!(remap[&0], 1); // "y" landed at index 1
        assert_eq!(remap[&1], 0); // "x" already present at index 0
    }
}
