use pressdex_core::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Page-level failures. None of them stop a crawl past page 1.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page {page}: request failed: {reason}")]
    Transport { page: u32, reason: String },
    #[error("page {page}: HTTP {status}")]
    Status { page: u32, status: u16 },
    #[error("page {page}: malformed payload: {reason}")]
    Parse { page: u32, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("record has no `{0}` field")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("first page unavailable: {0}")]
    FirstPage(#[source] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to write {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
