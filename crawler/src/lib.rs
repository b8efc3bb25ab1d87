pub mod crawl;
pub mod error;
pub mod extract;
pub mod source;

pub use crawl::{write_ids_file, CrawlConfig, CrawlReport, CrawlState, Crawler};
pub use error::{CrawlError, ExtractError, FetchError};
pub use source::{ApiPage, HttpPageSource, PageSource};
