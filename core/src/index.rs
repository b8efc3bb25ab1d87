use std::collections::HashMap;

use crate::error::IndexError;
use crate::{DocKey, Posting};

/// term -> posting list. Every posting list is strictly increasing.
#[derive(Debug, Default, Clone)]
pub struct InvertedIndex {
    postings: HashMap<String, Vec<DocKey>>,
    num_docs: u32,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Posting list for `term`, empty if the term never occurred.
    pub fn postings(&self, term: &str) -> &[DocKey] {
        self.postings.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, term: &str) -> bool { self.postings.contains_key(term) }

    pub fn num_terms(&self) -> usize { self.postings.len() }

    pub fn num_docs(&self) -> u32 { self.num_docs }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &[DocKey])> {
        self.postings.iter().map(|(t, keys)| (t.as_str(), keys.as_slice()))
    }

    // Appends unless `doc_key` is already the tail; relies on callers feeding keys in ascending order.
    fn insert(&mut self, term: &str, doc_key: DocKey) {
        match self.postings.get_mut(term) {
            Some(keys) => {
                if keys.last() != Some(&doc_key) {
                    keys.push(doc_key);
                }
            }
            None => {
                self.postings.insert(term.to_string(), vec![doc_key]);
            }
        }
    }
}

/// Folds per-document posting sequences into an [`InvertedIndex`].
///
/// Sequences must arrive in ascending doc-key order (an ordered store scan
/// provides that); a sequence for a lower key than one already folded is
/// rejected instead of breaking posting-list order.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    index: InvertedIndex,
    last_doc: Option<DocKey>,
}

impl IndexBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn add_sequence(&mut self, postings: &[Posting]) -> Result<(), IndexError> {
        for posting in postings {
            self.observe(posting.doc_key)?;
            self.index.insert(&posting.term, posting.doc_key);
        }
        Ok(())
    }

    /// Records a document even when it produced no terms, so `num_docs` stays accurate.
    pub fn add_document(&mut self, doc_key: DocKey, postings: &[Posting]) -> Result<(), IndexError> {
        self.observe(doc_key)?;
        self.add_sequence(postings)
    }

    fn observe(&mut self, doc_key: DocKey) -> Result<(), IndexError> {
        match self.last_doc {
            Some(previous) if doc_key < previous => Err(IndexError::OutOfOrder { previous, got: doc_key }),
            Some(previous) if doc_key == previous => Ok(()),
            _ => {
                self.last_doc = Some(doc_key);
                self.index.num_docs += 1;
                Ok(())
            }
        }
    }

    pub fn finish(self) -> InvertedIndex { self.index }
}
