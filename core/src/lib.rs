pub mod build;
pub mod error;
pub mod hook;
pub mod index;
pub mod limiter;
pub mod query;
pub mod sequence;
pub mod store;
pub mod tokenizer;

pub use build::{build_index, build_index_throttled};
pub use error::{IndexError, StoreError};
pub use hook::{RunHook, TracingHook};
pub use index::{IndexBuilder, InvertedIndex};
pub use limiter::{LimiterConfig, RateLimiter};
pub use query::{intersect, query_and};
pub use sequence::{merge_sort, TokenSequenceBuilder};
pub use store::{DocumentStore, InsertOutcome, InsertSummary};
pub use tokenizer::{Tokenizer, WordTokenizer};

use serde::{Deserialize, Serialize};

/// Store-assigned row identity; defines fold order for index construction.
pub type DocKey = u64;

/// One article as extracted from a result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub section: String,
    pub body_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_key: DocKey,
    pub document: Document,
}

/// A single (doc_key, term) occurrence. Not deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Posting {
    pub doc_key: DocKey,
    pub term: String,
}
