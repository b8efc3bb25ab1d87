//! Durable document storage on sled.
//!
//! Layout:
//! - `documents`: big-endian doc key -> bincode `StoredDocument`, so iteration
//!   order is doc-key order
//! - `unique`: `len(external_id) as u64 BE ++ external_id ++ title` -> doc key
//! - `meta`: schema version

use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use crate::error::StoreError;
use crate::{DocKey, Document, StoredDocument};

const SCHEMA_VERSION: u32 = 2;
const SCHEMA_KEY: &[u8] = b"schema_version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(DocKey),
    /// (external_id, title) already stored; not an error.
    Duplicate,
    Rejected(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

impl InsertSummary {
    fn from_outcomes(outcomes: &[InsertOutcome]) -> Self {
        let mut s = Self::default();
        for o in outcomes {
            match o {
                InsertOutcome::Inserted(_) => s.inserted += 1,
                InsertOutcome::Duplicate => s.duplicates += 1,
                InsertOutcome::Rejected(_) => s.rejected += 1,
            }
        }
        s
    }
}

pub struct DocumentStore {
    db: Db,
    docs: Tree,
    unique: Tree,
    // one writer transaction at a time; key allocation depends on it
    writer: Mutex<()>,
}

impl DocumentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref()).map_err(|e| StoreError::Init {
            reason: format!("{}: {e}", path.as_ref().display()),
        })?;
        Self::initialize(db)
    }

    /// Throwaway store, removed when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Init { reason: e.to_string() })?;
        Self::initialize(db)
    }

    /// Ensures the trees exist and carry the expected schema version. Safe to
    /// run against an already initialized database.
    pub fn initialize(db: Db) -> Result<Self, StoreError> {
        let init = |e: sled::Error| StoreError::Init { reason: e.to_string() };
        let docs = db.open_tree("documents").map_err(init)?;
        let unique = db.open_tree("unique").map_err(init)?;
        let meta = db.open_tree("meta").map_err(init)?;

        match meta.get(SCHEMA_KEY).map_err(init)? {
            Some(raw) => {
                let found = <[u8; 4]>::try_from(raw.as_ref()).map(u32::from_be_bytes).ok();
                if found != Some(SCHEMA_VERSION) {
                    return Err(StoreError::Init {
                        reason: format!("unsupported schema version {found:?}, expected {SCHEMA_VERSION}"),
                    });
                }
            }
            None => {
                meta.insert(SCHEMA_KEY, SCHEMA_VERSION.to_be_bytes().to_vec()).map_err(init)?;
            }
        }
        tracing::debug!(rows = docs.len(), "document store ready");
        Ok(Self { db, docs, unique, writer: Mutex::new(()) })
    }

    /// Inserts a batch in one transaction and flushes it to disk.
    ///
    /// Duplicates and rows that cannot be encoded are skipped and logged; the
    /// rest of the batch still commits. Only storage failures return `Err`.
    pub fn insert_many(&self, documents: &[Document]) -> Result<InsertSummary, StoreError> {
        if documents.is_empty() {
            return Ok(InsertSummary::default());
        }
        let _writer = self.writer.lock();
        let first_key = self.high_water_mark()? + 1;

        let outcomes = (&self.docs, &self.unique)
            .transaction(|(docs, unique)| {
                let mut next = first_key;
                let mut outcomes = Vec::with_capacity(documents.len());
                for doc in documents {
                    let uniq = unique_key(&doc.external_id, &doc.title);
                    if unique.get(&uniq)?.is_some() {
                        outcomes.push(InsertOutcome::Duplicate);
                        continue;
                    }
                    let row = StoredDocument { doc_key: next, document: doc.clone() };
                    let bytes = match bincode::serialize(&row) {
                        Ok(b) => b,
                        Err(e) => {
                            outcomes.push(InsertOutcome::Rejected(e.to_string()));
                            continue;
                        }
                    };
                    let key = next.to_be_bytes().to_vec();
                    docs.insert(key.clone(), bytes)?;
                    unique.insert(uniq, key)?;
                    outcomes.push(InsertOutcome::Inserted(next));
                    next += 1;
                }
                Ok::<_, ConflictableTransactionError<()>>(outcomes)
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => StoreError::Io(e),
                TransactionError::Abort(()) => StoreError::Io(sled::Error::ReportableBug(
                    "insert transaction aborted".into(),
                )),
            })?;
        self.db.flush()?;

        for (doc, outcome) in documents.iter().zip(&outcomes) {
            match outcome {
                InsertOutcome::Duplicate => {
                    tracing::debug!(external_id = %doc.external_id, "duplicate row skipped")
                }
                InsertOutcome::Rejected(reason) => {
                    tracing::warn!(external_id = %doc.external_id, %reason, "row rejected")
                }
                InsertOutcome::Inserted(_) => {}
            }
        }
        Ok(InsertSummary::from_outcomes(&outcomes))
    }

    /// First row stored under `external_id`, if any.
    pub fn get_by_external_id(&self, external_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let prefix = unique_key(external_id, "");
        let mut keys = Vec::new();
        for entry in self.unique.scan_prefix(&prefix) {
            let (_, key) = entry?;
            keys.push(decode_key(&key)?);
        }
        match keys.into_iter().min() {
            Some(key) => self.get(key),
            None => Ok(None),
        }
    }

    pub fn get(&self, doc_key: DocKey) -> Result<Option<StoredDocument>, StoreError> {
        match self.docs.get(doc_key.to_be_bytes())? {
            Some(raw) => decode_row(doc_key, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize { self.docs.len() }

    pub fn is_empty(&self) -> bool { self.docs.is_empty() }

    /// Highest key handed out so far, 0 for an empty store.
    pub fn high_water_mark(&self) -> Result<DocKey, StoreError> {
        match self.docs.last()? {
            Some((key, _)) => decode_key(&key),
            None => Ok(0),
        }
    }

    /// Lazy scan over every row in ascending doc-key order. Each call starts
    /// a fresh pass.
    pub fn scan_all(&self) -> DocumentScan {
        self.scan_from(0)
    }

    /// Like [`scan_all`](Self::scan_all) but starting at `doc_key` (inclusive).
    pub fn scan_from(&self, doc_key: DocKey) -> DocumentScan {
        DocumentScan { iter: self.docs.range(doc_key.to_be_bytes()..) }
    }
}

/// Pulls one row per `next()`; nothing beyond the current row is held.
pub struct DocumentScan {
    iter: sled::Iter,
}

impl Iterator for DocumentScan {
    type Item = Result<StoredDocument, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, raw) = match self.iter.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        Some(decode_key(&key).and_then(|k| decode_row(k, &raw)))
    }
}

/// Length-prefixed so that no (id, title) pair can spell another one, and
/// the key for an empty title is exactly the lookup prefix for an id.
fn unique_key(external_id: &str, title: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + external_id.len() + title.len());
    key.extend_from_slice(&(external_id.len() as u64).to_be_bytes());
    key.extend_from_slice(external_id.as_bytes());
    key.extend_from_slice(title.as_bytes());
    key
}

fn decode_key(raw: &[u8]) -> Result<DocKey, StoreError> {
    <[u8; 8]>::try_from(raw)
        .map(DocKey::from_be_bytes)
        .map_err(|_| StoreError::Corrupt { key: 0, reason: format!("bad key length {}", raw.len()) })
}

fn decode_row(key: DocKey, raw: &[u8]) -> Result<StoredDocument, StoreError> {
    bincode::deserialize(raw).map_err(|e| StoreError::Corrupt { key, reason: e.to_string() })
}
