use anyhow::{anyhow, Result};
use clap::Parser;
use crawler::{write_ids_file, CrawlConfig, Crawler, HttpPageSource};
use pressdex_core::{DocumentStore, LimiterConfig};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Harvest paginated articles from the content API into the document store")]
struct Cli {
    /// Document store directory
    #[arg(long, default_value = "./storage/articles.db")]
    store: PathBuf,
    /// Directory for the ids-<first id>.json artifact
    #[arg(long, default_value = "./storage")]
    out_dir: PathBuf,
    /// Search endpoint of the content API
    #[arg(long, default_value = "https://content.guardianapis.com/search")]
    base_url: String,
    /// API key sent with every request
    #[arg(long, env = "GUARDIAN_API_KEY", hide_env_values = true)]
    api_key: String,
    /// Results per page
    #[arg(long, default_value_t = 50)]
    page_size: u32,
    /// Never request more pages than this, whatever the API declares
    #[arg(long, default_value_t = 200)]
    max_pages: u32,
    /// Requests in flight at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
    /// Minimum milliseconds between two requests
    #[arg(long, default_value_t = 500)]
    delay_ms: u64,
    /// Request timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    #[arg(long, default_value = "pressdex-crawler/0.1")]
    user_agent: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let base = Url::parse(&args.base_url).map_err(|e| anyhow!("invalid --base-url {}: {e}", args.base_url))?;
    let client = Client::builder()
        .user_agent(args.user_agent.clone())
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;
    let source = HttpPageSource::new(client, base, args.api_key.clone(), args.page_size);

    if let Some(dir) = args.store.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = Arc::new(DocumentStore::open(&args.store)?);
    tracing::info!(
        store = %args.store.display(),
        existing_rows = store.len(),
        max_pages = args.max_pages,
        concurrency = args.concurrency,
        delay_ms = args.delay_ms,
        "crawler starting"
    );

    let config = CrawlConfig {
        max_pages: args.max_pages,
        limiter: LimiterConfig { max_concurrent: args.concurrency, min_delay: Duration::from_millis(args.delay_ms) },
    };
    let crawler = Crawler::new(source, store, config);
    let out_dir = args.out_dir.clone();
    let report = crawler.run(|report| write_ids_file(&out_dir, &report.ids).map(|_| ())).await?;

    if !report.failed_pages.is_empty() {
        tracing::warn!(pages = ?report.failed_pages, "some pages were not ingested");
    }
    Ok(())
}
