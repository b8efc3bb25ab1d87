use std::sync::Arc;

use crate::tokenizer::{Tokenizer, WordTokenizer};
use crate::{Posting, StoredDocument};

/// Turns a stored document into its postings, sorted by term.
///
/// The sort is what lets [`crate::IndexBuilder`] drop repeated terms of one
/// document by looking only at the last key of each posting list.
#[derive(Clone)]
pub struct TokenSequenceBuilder {
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for TokenSequenceBuilder {
    fn default() -> Self { Self::new(Arc::new(WordTokenizer)) }
}

impl TokenSequenceBuilder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self { Self { tokenizer } }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> { &self.tokenizer }

    pub fn build(&self, doc: &StoredDocument) -> Vec<Posting> {
        let terms = self.tokenizer.tokenize(&doc.document.body_text);
        merge_sort(terms)
            .into_iter()
            .map(|term| Posting { doc_key: doc.doc_key, term })
            .collect()
    }
}

/// Stable top-down merge sort, O(n log n).
pub fn merge_sort<T: Ord>(mut items: Vec<T>) -> Vec<T> {
    if items.len() < 2 {
        return items;
    }
    let right = items.split_off(items.len() / 2);
    merge(merge_sort(items), merge_sort(right))
}

fn merge<T: Ord>(left: Vec<T>, right: Vec<T>) -> Vec<T> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        // `<=` keeps equal elements from the left half first
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l <= r,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        out.extend(next);
    }
    out
}
