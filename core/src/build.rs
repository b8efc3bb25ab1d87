//! Store -> postings -> inverted index.

use crate::error::IndexError;
use crate::index::{IndexBuilder, InvertedIndex};
use crate::limiter::RateLimiter;
use crate::sequence::TokenSequenceBuilder;
use crate::store::DocumentStore;
use crate::StoredDocument;

/// Builds the index from a full ordered scan of `store`.
pub fn build_index(store: &DocumentStore, sequencer: &TokenSequenceBuilder) -> Result<InvertedIndex, IndexError> {
    let mut builder = IndexBuilder::new();
    for row in store.scan_all() {
        fold(&mut builder, sequencer, &row?)?;
    }
    let index = builder.finish();
    tracing::info!(num_docs = index.num_docs(), num_terms = index.num_terms(), "index built");
    Ok(index)
}

/// Same as [`build_index`], but every row read goes through `limiter` so the
/// scan does not crowd out concurrent writers.
pub async fn build_index_throttled(
    store: &DocumentStore,
    sequencer: &TokenSequenceBuilder,
    limiter: &RateLimiter,
) -> Result<InvertedIndex, IndexError> {
    let mut scan = store.scan_all();
    let mut builder = IndexBuilder::new();
    loop {
        let cursor = &mut scan;
        let row = limiter.schedule(move || async move { cursor.next() }).await;
        match row {
            Some(row) => fold(&mut builder, sequencer, &row?)?,
            None => break,
        }
    }
    let index = builder.finish();
    tracing::info!(num_docs = index.num_docs(), num_terms = index.num_terms(), "index built (throttled)");
    Ok(index)
}

fn fold(builder: &mut IndexBuilder, sequencer: &TokenSequenceBuilder, doc: &StoredDocument) -> Result<(), IndexError> {
    let postings = sequencer.build(doc);
    builder.add_document(doc.doc_key, &postings)
}
